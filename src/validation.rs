use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::choices::{
    AbsenceAction, GaugeSpec, LeafletStatus, LeafletType, OpenStatus, PrStatus, ValveAttach,
    ValveState, OPEN_ROUND_MAX, OPEN_ROUND_MIN,
};
use crate::models::Assignment;

static ORDER_NO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][0-9]{5}$").expect("valid order number pattern"));

pub const PROJECT_NAME_MAX_CHARS: usize = 200;

/// A rejected value, reported against the field that carried it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Blank input means "no order number".
pub fn validate_order_no(raw: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if !ORDER_NO_PATTERN.is_match(value) {
        return Err(ValidationError::new(
            "order_no",
            "order number must be one uppercase letter followed by 5 digits (e.g. A01234)",
        ));
    }
    Ok(Some(value.to_string()))
}

pub fn validate_project_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("name", "name must not be empty"));
    }
    check_max_chars("name", trimmed, PROJECT_NAME_MAX_CHARS)?;
    Ok(trimmed.to_string())
}

pub fn check_max_chars(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::new(
            field,
            format!("must be at most {max} characters"),
        ));
    }
    Ok(())
}

/// Visit-progress fields of an assignment in typed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitStatus {
    pub pr_status: PrStatus,
    pub open_round: i16,
    pub open_status: OpenStatus,
    pub performed_by: Option<Uuid>,
    pub checked_by: Option<Uuid>,
    pub gauge_spec: GaugeSpec,
    pub absence_action: AbsenceAction,
    pub leaflet_type: LeafletType,
    pub leaflet_status: Option<LeafletStatus>,
    pub m_valve_state: ValveState,
    pub m_valve_attach: ValveAttach,
}

impl VisitStatus {
    pub fn from_assignment(assignment: &Assignment) -> Result<Self, ValidationError> {
        Ok(Self {
            pr_status: PrStatus::parse(&assignment.pr_status)?,
            open_round: assignment.open_round,
            open_status: OpenStatus::parse(&assignment.open_status)?,
            performed_by: assignment.performed_by,
            checked_by: assignment.checked_by,
            gauge_spec: GaugeSpec::parse(&assignment.gauge_spec)?,
            absence_action: AbsenceAction::parse(&assignment.absence_action)?,
            leaflet_type: LeafletType::parse(&assignment.leaflet_type)?,
            leaflet_status: assignment
                .leaflet_status
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(LeafletStatus::parse)
                .transpose()?,
            m_valve_state: ValveState::parse(&assignment.m_valve_state)?,
            m_valve_attach: ValveAttach::parse(&assignment.m_valve_attach)?,
        })
    }

    /// Checks cross-field rules. A leaflet type of `none` clears the leaflet status.
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        if !(OPEN_ROUND_MIN..=OPEN_ROUND_MAX).contains(&self.open_round) {
            return Err(ValidationError::new(
                "open_round",
                format!("open round must be between {OPEN_ROUND_MIN} and {OPEN_ROUND_MAX}"),
            ));
        }

        if let (Some(performer), Some(checker)) = (self.performed_by, self.checked_by) {
            if performer == checker {
                return Err(ValidationError::new(
                    "checked_by",
                    "performer and checker must be different users",
                ));
            }
        }

        if self.leaflet_type == LeafletType::None {
            self.leaflet_status = None;
        } else if self.leaflet_status.is_none() {
            return Err(ValidationError::new(
                "leaflet_status",
                "leaflet status is required when a leaflet type is selected",
            ));
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_status() -> VisitStatus {
        VisitStatus {
            pr_status: PrStatus::NotVisited,
            open_round: 1,
            open_status: OpenStatus::NotVisited,
            performed_by: None,
            checked_by: None,
            gauge_spec: GaugeSpec::None,
            absence_action: AbsenceAction::Open,
            leaflet_type: LeafletType::None,
            leaflet_status: None,
            m_valve_state: ValveState::Closed,
            m_valve_attach: ValveAttach::Attached,
        }
    }

    #[test]
    fn order_no_accepts_letter_and_five_digits() {
        assert_eq!(
            validate_order_no(Some(" A01234 ")).unwrap(),
            Some("A01234".to_string())
        );
        assert_eq!(validate_order_no(Some("")).unwrap(), None);
        assert_eq!(validate_order_no(None).unwrap(), None);
    }

    #[test]
    fn order_no_rejects_bad_shapes() {
        for bad in ["a01234", "A1234", "AB1234", "A012345", "A0123X"] {
            let err = validate_order_no(Some(bad)).unwrap_err();
            assert_eq!(err.field, "order_no", "input {bad}");
        }
    }

    #[test]
    fn project_name_is_trimmed_and_required() {
        assert_eq!(validate_project_name("  棟A  ").unwrap(), "棟A");
        assert_eq!(validate_project_name("   ").unwrap_err().field, "name");
        assert!(validate_project_name(&"x".repeat(201)).is_err());
    }

    #[test]
    fn leaflet_type_none_forces_status_empty() {
        let status = VisitStatus {
            leaflet_status: Some(LeafletStatus::Posted),
            ..base_status()
        };
        let validated = status.validated().unwrap();
        assert_eq!(validated.leaflet_status, None);
    }

    #[test]
    fn leaflet_type_requires_status() {
        let status = VisitStatus {
            leaflet_type: LeafletType::Shu,
            ..base_status()
        };
        let err = status.validated().unwrap_err();
        assert_eq!(err.field, "leaflet_status");

        let status = VisitStatus {
            leaflet_type: LeafletType::F,
            leaflet_status: Some(LeafletStatus::NotPosted),
            ..base_status()
        };
        assert!(status.validated().is_ok());
    }

    #[test]
    fn performer_and_checker_must_differ() {
        let user = Uuid::new_v4();
        let status = VisitStatus {
            performed_by: Some(user),
            checked_by: Some(user),
            ..base_status()
        };
        assert_eq!(status.validated().unwrap_err().field, "checked_by");

        let status = VisitStatus {
            performed_by: Some(user),
            checked_by: Some(Uuid::new_v4()),
            ..base_status()
        };
        assert!(status.validated().is_ok());
    }

    #[test]
    fn open_round_is_bounded() {
        for round in [0, 6] {
            let status = VisitStatus {
                open_round: round,
                ..base_status()
            };
            assert_eq!(status.validated().unwrap_err().field, "open_round");
        }
    }
}
