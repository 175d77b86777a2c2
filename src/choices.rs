//! Fixed value sets for assignment status fields and photo categories.
//!
//! Values are stored in the database as their wire string (`as_str`) and exchanged
//! over the API in the same form.

use serde::{Deserialize, Serialize};

use crate::validation::ValidationError;

macro_rules! choice_enum {
    (
        $(#[$meta:meta])*
        $name:ident, field = $field:literal {
            $($variant:ident => $value:literal, $label:literal;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $value)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            pub fn parse(value: &str) -> Result<Self, ValidationError> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(ValidationError::new(
                        $field,
                        format!("unknown value '{other}'"),
                    )),
                }
            }
        }
    };
}

choice_enum! {
    /// Pre-visit contact status.
    PrStatus, field = "pr_status" {
        NotVisited => "not_visited", "未訪問";
        Home => "home", "在宅";
        Absent => "absent", "不在";
    }
}

choice_enum! {
    OpenStatus, field = "open_status" {
        NotVisited => "not_visited", "未訪問";
        InProgress => "in_progress", "開栓作業中";
        NotDone => "not_done", "開栓未実施";
        Completed => "completed", "開栓完了";
        FinalChecked => "final_checked", "最終チェック完了";
    }
}

choice_enum! {
    GaugeSpec, field = "gauge_spec" {
        None => "none", "不要";
        Supply => "supply", "供給圧";
        Test => "test", "テスト圧";
    }
}

choice_enum! {
    AbsenceAction, field = "absence_action" {
        Open => "open", "開栓";
        Safety => "safety", "保安閉栓";
    }
}

choice_enum! {
    LeafletType, field = "leaflet_type" {
        None => "none", "不要";
        Shu => "shu", "修";
        F => "f", "F";
        Other => "other", "その他";
    }
}

choice_enum! {
    LeafletStatus, field = "leaflet_status" {
        NotPosted => "not_posted", "未投函";
        Posted => "posted", "投函済";
    }
}

choice_enum! {
    ValveState, field = "m_valve_state" {
        Closed => "closed", "シマリ";
        Open => "open", "アキ";
    }
}

choice_enum! {
    ValveAttach, field = "m_valve_attach" {
        Attached => "attached", "取付";
        Detached => "detached", "取外";
    }
}

choice_enum! {
    /// Shot categories a field technician photographs during a visit.
    PhotoType, field = "photo_type" {
        Before => "before", "施工前";
        UnionRust => "union_rust", "ユニオン錆確認";
        Packing => "packing", "パッキン取付";
        MAttach => "m_attach", "M取付";
        PrePurge => "pre_purge", "パージ前";
        PostPurge => "post_purge", "パージ後";
        Chart => "chart", "チャートor5分指針";
        SafetyClose => "safety_close", "保安閉栓";
        MOpenMeter => "m_open_meter", "M栓開+メーター";
        Other => "other", "その他";
    }
}

pub const OPEN_ROUND_MIN: i16 = 1;
pub const OPEN_ROUND_MAX: i16 = 5;

/// Valve state given to a freshly imported assignment, regardless of meter type.
pub const DEFAULT_VALVE_STATE: ValveState = ValveState::Closed;
