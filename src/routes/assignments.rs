use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::projects::load_visible_project;
use crate::auth::AuthenticatedUser;
use crate::choices::{
    AbsenceAction, GaugeSpec, LeafletStatus, LeafletType, OpenStatus, PhotoType, PrStatus,
    ValveAttach, ValveState,
};
use crate::error::{AppError, AppResult};
use crate::models::{Assignment, Customer, NewPhoto, Photo};
use crate::schema::{assignments, customers, photos, users};
use crate::state::AppState;
use crate::utils::json::double_option;
use crate::validation::{ValidationError, VisitStatus};

const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;

/// One row of a project's assignment table.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentView {
    pub id: Uuid,
    pub project_id: Uuid,
    pub customer_id: Uuid,
    pub sequence: i32,
    pub usage_no: String,
    pub customer_name: String,
    pub room_number: String,
    pub block_number: String,
    pub building_number: String,
    pub meter_type: String,
    pub meter_number: String,
    pub pr_status: String,
    pub open_round: i16,
    pub open_status: String,
    pub performed_by: Option<Uuid>,
    pub performed_at: Option<NaiveDateTime>,
    pub checked_by: Option<Uuid>,
    pub checked_at: Option<NaiveDateTime>,
    pub gauge_spec: String,
    pub absence_action: String,
    pub leaflet_type: String,
    pub leaflet_status: Option<String>,
    pub m_valve_state: String,
    pub m_valve_attach: String,
    pub updated_at: NaiveDateTime,
}

impl AssignmentView {
    pub fn new(assignment: &Assignment, customer: &Customer) -> Self {
        Self {
            id: assignment.id,
            project_id: assignment.project_id,
            customer_id: assignment.customer_id,
            sequence: assignment.sequence,
            usage_no: customer.usage_no.clone(),
            customer_name: customer.name.clone(),
            room_number: customer.room_number.clone(),
            block_number: assignment.block_number.clone(),
            building_number: assignment.building_number.clone(),
            meter_type: assignment.meter_type.clone(),
            meter_number: assignment.meter_number.clone(),
            pr_status: assignment.pr_status.clone(),
            open_round: assignment.open_round,
            open_status: assignment.open_status.clone(),
            performed_by: assignment.performed_by,
            performed_at: assignment.performed_at,
            checked_by: assignment.checked_by,
            checked_at: assignment.checked_at,
            gauge_spec: assignment.gauge_spec.clone(),
            absence_action: assignment.absence_action.clone(),
            leaflet_type: assignment.leaflet_type.clone(),
            leaflet_status: assignment.leaflet_status.clone(),
            m_valve_state: assignment.m_valve_state.clone(),
            m_valve_attach: assignment.m_valve_attach.clone(),
            updated_at: assignment.updated_at,
        }
    }

    #[cfg(test)]
    pub(crate) fn empty_for_tests() -> Self {
        Self {
            id: Uuid::nil(),
            project_id: Uuid::nil(),
            customer_id: Uuid::nil(),
            sequence: 0,
            usage_no: String::new(),
            customer_name: String::new(),
            room_number: String::new(),
            block_number: String::new(),
            building_number: String::new(),
            meter_type: String::new(),
            meter_number: String::new(),
            pr_status: PrStatus::NotVisited.as_str().to_string(),
            open_round: 1,
            open_status: OpenStatus::NotVisited.as_str().to_string(),
            performed_by: None,
            performed_at: None,
            checked_by: None,
            checked_at: None,
            gauge_spec: GaugeSpec::None.as_str().to_string(),
            absence_action: AbsenceAction::Open.as_str().to_string(),
            leaflet_type: LeafletType::None.as_str().to_string(),
            leaflet_status: None,
            m_valve_state: ValveState::Closed.as_str().to_string(),
            m_valve_attach: ValveAttach::Attached.as_str().to_string(),
            updated_at: NaiveDateTime::default(),
        }
    }
}

fn load_project_assignment(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    project_id: Uuid,
    assignment_id: Uuid,
) -> AppResult<(Assignment, Customer)> {
    load_visible_project(conn, user, project_id)?;
    let row = assignments::table
        .inner_join(customers::table)
        .filter(assignments::id.eq(assignment_id))
        .filter(assignments::project_id.eq(project_id))
        .first::<(Assignment, Customer)>(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    Ok(row)
}

#[derive(Debug, Serialize)]
pub struct PhotoView {
    pub id: Uuid,
    pub photo_type: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub taken_at: NaiveDateTime,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PhotoSlot {
    pub photo_type: PhotoType,
    pub label: &'static str,
    pub photo: Option<PhotoView>,
}

#[derive(Debug, Serialize)]
pub struct AssignmentDetailResponse {
    pub assignment: AssignmentView,
    pub photos: Vec<PhotoSlot>,
}

async fn photo_view(state: &AppState, photo: Photo) -> AppResult<PhotoView> {
    let url = state
        .storage
        .presign_get_object(
            &photo.s3_key,
            Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
        )
        .await
        .map_err(|err| {
            error!(photo_id = %photo.id, error = %err, "failed to presign photo URL");
            AppError::internal(err)
        })?;

    Ok(PhotoView {
        id: photo.id,
        photo_type: photo.photo_type,
        content_type: photo.content_type,
        size_bytes: photo.size_bytes,
        taken_at: photo.taken_at,
        url,
    })
}

/// The assignment with one slot per photo category holding its latest photo.
pub async fn get_assignment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, assignment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<AssignmentDetailResponse>> {
    let (assignment, customer, mut stored) = {
        let mut conn = state.db()?;
        let (assignment, customer) =
            load_project_assignment(&mut conn, &user, project_id, assignment_id)?;
        let stored: Vec<Photo> = photos::table
            .filter(photos::assignment_id.eq(assignment_id))
            .order(photos::taken_at.desc())
            .load(&mut conn)?;
        (assignment, customer, stored)
    };

    let mut slots = Vec::with_capacity(PhotoType::ALL.len());
    for photo_type in PhotoType::ALL {
        let latest = stored
            .iter()
            .position(|photo| photo.photo_type == photo_type.as_str())
            .map(|index| stored.remove(index));
        let photo = match latest {
            Some(photo) => Some(photo_view(&state, photo).await?),
            None => None,
        };
        slots.push(PhotoSlot {
            photo_type: *photo_type,
            label: photo_type.label(),
            photo,
        });
    }

    Ok(Json(AssignmentDetailResponse {
        assignment: AssignmentView::new(&assignment, &customer),
        photos: slots,
    }))
}

/// Status fields a visit can change. Absent keys are left alone; `null` clears a
/// nullable field.
#[derive(Debug, Default, Deserialize)]
pub struct AssignmentUpdate {
    pub pr_status: Option<String>,
    pub open_round: Option<i16>,
    pub open_status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub performed_by: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub checked_by: Option<Option<Uuid>>,
    pub gauge_spec: Option<String>,
    pub absence_action: Option<String>,
    pub leaflet_type: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub leaflet_status: Option<Option<String>>,
    pub m_valve_state: Option<String>,
    pub m_valve_attach: Option<String>,
}

impl AssignmentUpdate {
    fn is_empty(&self) -> bool {
        self.pr_status.is_none()
            && self.open_round.is_none()
            && self.open_status.is_none()
            && self.performed_by.is_none()
            && self.checked_by.is_none()
            && self.gauge_spec.is_none()
            && self.absence_action.is_none()
            && self.leaflet_type.is_none()
            && self.leaflet_status.is_none()
            && self.m_valve_state.is_none()
            && self.m_valve_attach.is_none()
    }

    /// Overlays the given fields on `status` and checks the result.
    pub fn apply(&self, mut status: VisitStatus) -> Result<VisitStatus, ValidationError> {
        if let Some(value) = &self.pr_status {
            status.pr_status = PrStatus::parse(value)?;
        }
        if let Some(value) = self.open_round {
            status.open_round = value;
        }
        if let Some(value) = &self.open_status {
            status.open_status = OpenStatus::parse(value)?;
        }
        if let Some(value) = self.performed_by {
            status.performed_by = value;
        }
        if let Some(value) = self.checked_by {
            status.checked_by = value;
        }
        if let Some(value) = &self.gauge_spec {
            status.gauge_spec = GaugeSpec::parse(value)?;
        }
        if let Some(value) = &self.absence_action {
            status.absence_action = AbsenceAction::parse(value)?;
        }
        if let Some(value) = &self.leaflet_type {
            status.leaflet_type = LeafletType::parse(value)?;
        }
        if let Some(value) = &self.leaflet_status {
            status.leaflet_status = value
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(LeafletStatus::parse)
                .transpose()?;
        }
        if let Some(value) = &self.m_valve_state {
            status.m_valve_state = ValveState::parse(value)?;
        }
        if let Some(value) = &self.m_valve_attach {
            status.m_valve_attach = ValveAttach::parse(value)?;
        }
        status.validated()
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = assignments, treat_none_as_null = true)]
struct VisitStatusChangeset {
    pr_status: &'static str,
    open_round: i16,
    open_status: &'static str,
    performed_by: Option<Uuid>,
    performed_at: Option<NaiveDateTime>,
    checked_by: Option<Uuid>,
    checked_at: Option<NaiveDateTime>,
    gauge_spec: &'static str,
    absence_action: &'static str,
    leaflet_type: &'static str,
    leaflet_status: Option<&'static str>,
    m_valve_state: &'static str,
    m_valve_attach: &'static str,
    updated_at: NaiveDateTime,
}

// A performer or checker timestamp moves only when the person changes.
fn stamp(
    previous: Option<Uuid>,
    current: Option<Uuid>,
    previous_at: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    match current {
        None => None,
        Some(_) if current == previous => previous_at,
        Some(_) => Some(now),
    }
}

fn ensure_user_exists(conn: &mut PgConnection, field: &str, user_id: Uuid) -> AppResult<()> {
    let found: i64 = users::table
        .filter(users::id.eq(user_id))
        .count()
        .get_result(conn)?;
    if found == 0 {
        return Err(AppError::invalid_field(field, "user does not exist"));
    }
    Ok(())
}

fn apply_visit_update(
    conn: &mut PgConnection,
    existing: &Assignment,
    update: &AssignmentUpdate,
) -> AppResult<Assignment> {
    let status = update.apply(VisitStatus::from_assignment(existing)?)?;

    if let Some(Some(performer)) = update.performed_by {
        ensure_user_exists(conn, "performed_by", performer)?;
    }
    if let Some(Some(checker)) = update.checked_by {
        ensure_user_exists(conn, "checked_by", checker)?;
    }

    let now = Utc::now().naive_utc();
    let changeset = VisitStatusChangeset {
        pr_status: status.pr_status.as_str(),
        open_round: status.open_round,
        open_status: status.open_status.as_str(),
        performed_by: status.performed_by,
        performed_at: stamp(
            existing.performed_by,
            status.performed_by,
            existing.performed_at,
            now,
        ),
        checked_by: status.checked_by,
        checked_at: stamp(
            existing.checked_by,
            status.checked_by,
            existing.checked_at,
            now,
        ),
        gauge_spec: status.gauge_spec.as_str(),
        absence_action: status.absence_action.as_str(),
        leaflet_type: status.leaflet_type.as_str(),
        leaflet_status: status.leaflet_status.map(LeafletStatus::as_str),
        m_valve_state: status.m_valve_state.as_str(),
        m_valve_attach: status.m_valve_attach.as_str(),
        updated_at: now,
    };

    let updated = diesel::update(assignments::table.find(existing.id))
        .set(&changeset)
        .get_result(conn)?;
    Ok(updated)
}

pub async fn update_assignment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, assignment_id)): Path<(Uuid, Uuid)>,
    Json(update): Json<AssignmentUpdate>,
) -> AppResult<Json<AssignmentView>> {
    let mut conn = state.db()?;
    let (updated, customer) = conn.transaction::<_, AppError, _>(|conn| {
        let (_, customer) = load_project_assignment(conn, &user, project_id, assignment_id)?;
        let current: Assignment = assignments::table
            .find(assignment_id)
            .for_update()
            .first(conn)?;
        let updated = apply_visit_update(conn, &current, &update)?;
        Ok((updated, customer))
    })?;
    info!(
        project_id = %project_id,
        assignment_id = %assignment_id,
        open_status = %updated.open_status,
        "assignment updated"
    );
    Ok(Json(AssignmentView::new(&updated, &customer)))
}

#[derive(Debug, Deserialize)]
pub struct BulkAssignmentUpdateRequest {
    pub assignment_ids: Vec<Uuid>,
    #[serde(flatten)]
    pub update: AssignmentUpdate,
}

#[derive(Debug, Serialize)]
pub struct BulkAssignmentUpdateResponse {
    pub updated: usize,
}

/// All selected assignments change together or not at all.
pub async fn bulk_update_assignments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<BulkAssignmentUpdateRequest>,
) -> AppResult<Json<BulkAssignmentUpdateResponse>> {
    let mut assignment_ids = payload.assignment_ids;
    if assignment_ids.is_empty() {
        return Err(AppError::invalid_field(
            "assignment_ids",
            "select at least one assignment",
        ));
    }
    if payload.update.is_empty() {
        return Err(AppError::bad_request("no fields to update"));
    }
    assignment_ids.sort();
    assignment_ids.dedup();

    let mut conn = state.db()?;
    load_visible_project(&mut conn, &user, project_id)?;

    let updated = conn.transaction::<usize, AppError, _>(|conn| {
        let targets: Vec<Assignment> = assignments::table
            .filter(assignments::project_id.eq(project_id))
            .filter(assignments::id.eq_any(&assignment_ids))
            .order(assignments::sequence.asc())
            .for_update()
            .load(conn)?;
        if targets.len() != assignment_ids.len() {
            return Err(AppError::not_found());
        }

        for assignment in &targets {
            apply_visit_update(conn, assignment, &payload.update)?;
        }
        Ok(targets.len())
    })?;

    info!(project_id = %project_id, updated, "assignments bulk updated");
    Ok(Json(BulkAssignmentUpdateResponse { updated }))
}

fn photo_extension(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpg"),
        _ => None,
    }
}

/// Accepts PNG or JPEG bytes that actually decode; returns the file extension.
pub fn check_photo(bytes: &[u8]) -> Result<&'static str, ValidationError> {
    let invalid = || ValidationError::new("image", "image must be a PNG or JPEG file");
    let format = image::guess_format(bytes).map_err(|_| invalid())?;
    let extension = photo_extension(format).ok_or_else(invalid)?;
    image::load_from_memory_with_format(bytes, format).map_err(|_| invalid())?;
    Ok(extension)
}

pub fn photo_key(taken_at: NaiveDateTime, photo_id: Uuid, extension: &str) -> String {
    format!(
        "photos/{}/{}.{}",
        taken_at.format("%Y/%m/%d"),
        photo_id,
        extension
    )
}

pub async fn upload_photo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, assignment_id)): Path<(Uuid, Uuid)>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<PhotoView>)> {
    {
        let mut conn = state.db()?;
        load_project_assignment(&mut conn, &user, project_id, assignment_id)?;
    }

    let mut photo_type: Option<PhotoType> = None;
    let mut image_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        match field.name() {
            Some("photo_type") => {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid photo type: {err}"))
                })?;
                photo_type = Some(PhotoType::parse(value.trim())?);
            }
            Some("image") => {
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read image bytes");
                    AppError::bad_request(format!("failed to read image bytes: {err}"))
                })?;
                image_bytes = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let photo_type = photo_type
        .ok_or_else(|| AppError::invalid_field("photo_type", "photo type is required"))?;
    let image_bytes = image_bytes
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::invalid_field("image", "image is required"))?;
    let extension = check_photo(&image_bytes)?;

    let now = Utc::now().naive_utc();
    let photo_id = Uuid::new_v4();
    let key = photo_key(now, photo_id, extension);
    let content_type = mime_guess::from_ext(extension)
        .first_or_octet_stream()
        .to_string();
    let size_bytes = image_bytes.len() as i64;

    state
        .storage
        .put_object(&key, image_bytes, Some(content_type.clone()))
        .await
        .map_err(|err| {
            error!(error = %err, key = %key, "photo upload to storage failed");
            AppError::internal(err)
        })?;

    let inserted = {
        let mut conn = state.db()?;
        diesel::insert_into(photos::table)
            .values(&NewPhoto {
                id: photo_id,
                assignment_id,
                photo_type: photo_type.as_str().to_string(),
                s3_key: key.clone(),
                content_type: Some(content_type),
                size_bytes,
            })
            .get_result::<Photo>(&mut conn)
    };

    let photo = match inserted {
        Ok(photo) => photo,
        Err(err) => {
            if let Err(cleanup) = state.storage.delete_object(&key).await {
                warn!(error = %cleanup, key = %key, "failed to remove orphaned photo object");
            }
            return Err(AppError::from(err));
        }
    };

    info!(
        assignment_id = %assignment_id,
        photo_type = photo_type.as_str(),
        size_bytes,
        "photo uploaded"
    );
    Ok((StatusCode::CREATED, Json(photo_view(&state, photo).await?)))
}

/// Removes every photo of one category from the assignment.
pub async fn delete_photos(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((project_id, assignment_id, photo_type)): Path<(Uuid, Uuid, String)>,
) -> AppResult<StatusCode> {
    let photo_type = PhotoType::parse(&photo_type)?;

    let keys: Vec<String> = {
        let mut conn = state.db()?;
        load_project_assignment(&mut conn, &user, project_id, assignment_id)?;
        diesel::delete(
            photos::table
                .filter(photos::assignment_id.eq(assignment_id))
                .filter(photos::photo_type.eq(photo_type.as_str())),
        )
        .returning(photos::s3_key)
        .get_results(&mut conn)?
    };

    for key in &keys {
        if let Err(err) = state.storage.delete_object(key).await {
            warn!(error = %err, key = %key, "failed to delete photo object");
        }
    }

    info!(
        assignment_id = %assignment_id,
        photo_type = photo_type.as_str(),
        deleted = keys.len(),
        "photos deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let image = image::RgbImage::from_pixel(2, 2, image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

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
    fn accepts_png_and_rejects_other_bytes() {
        assert_eq!(check_photo(&png_bytes()).unwrap(), "png");
        assert_eq!(check_photo(b"GIF89a....").unwrap_err().field, "image");
        // Valid signature, truncated body.
        let mut truncated = png_bytes();
        truncated.truncate(20);
        assert!(check_photo(&truncated).is_err());
    }

    #[test]
    fn photo_keys_are_dated() {
        let taken_at = NaiveDate::from_ymd_opt(2025, 3, 7)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        let id = Uuid::nil();
        assert_eq!(
            photo_key(taken_at, id, "jpg"),
            format!("photos/2025/03/07/{id}.jpg")
        );
    }

    #[test]
    fn update_rejects_unknown_choice_with_field() {
        let update = AssignmentUpdate {
            open_status: Some("finished".into()),
            ..Default::default()
        };
        assert_eq!(update.apply(base_status()).unwrap_err().field, "open_status");
    }

    #[test]
    fn update_clears_leaflet_status_with_type_none() {
        let status = VisitStatus {
            leaflet_type: LeafletType::F,
            leaflet_status: Some(LeafletStatus::Posted),
            ..base_status()
        };
        let update = AssignmentUpdate {
            leaflet_type: Some("none".into()),
            ..Default::default()
        };
        let applied = update.apply(status).unwrap();
        assert_eq!(applied.leaflet_status, None);
    }

    #[test]
    fn update_deserializes_null_as_clear() {
        let update: AssignmentUpdate =
            serde_json::from_value(serde_json::json!({ "performed_by": null })).unwrap();
        assert_eq!(update.performed_by, Some(None));
        assert!(update.checked_by.is_none());
        assert!(!update.is_empty());
    }

    #[test]
    fn stamps_move_only_when_person_changes() {
        let earlier = NaiveDateTime::default();
        let now = Utc::now().naive_utc();
        let person = Uuid::new_v4();
        assert_eq!(stamp(Some(person), Some(person), Some(earlier), now), Some(earlier));
        assert_eq!(stamp(None, Some(person), None, now), Some(now));
        assert_eq!(stamp(Some(person), None, Some(earlier), now), None);
    }
}
