//! Two-step spreadsheet imports: upload to stage, review and edit rows, confirm.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::projects::{create_project_record, load_visible_project, validated_allowed_users};
use crate::auth::{password, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::import::normalize::{
    normalize_meter_number, normalize_usage_no, normalize_user_code, parse_customer_rows,
    parse_user_rows,
};
use crate::import::reconcile::{import_customer_rows, ImportSummary};
use crate::import::{
    read_sheet, CustomerImportTarget, CustomerRow, ParsedRows, ProjectDraft, RowId, RowRejection,
    StagedBatch, StagedRow, StagingError, UserRow,
};
use crate::models::{NewUser, User};
use crate::schema::users;
use crate::state::AppState;
use crate::validation::{validate_order_no, validate_project_name, ValidationError};

#[derive(Debug, Default)]
struct UploadedFile {
    file_name: Option<String>,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct ImportForm {
    name: Option<String>,
    order_no: Option<String>,
    allowed_user_ids: Vec<Uuid>,
    file: Option<UploadedFile>,
}

fn parse_user_ids(raw: &str) -> AppResult<Vec<Uuid>> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            Uuid::parse_str(value).map_err(|_| {
                AppError::invalid_field("allowed_user_ids", "user ids must be valid UUIDs")
            })
        })
        .collect()
}

async fn read_import_form(mut multipart: Multipart) -> AppResult<ImportForm> {
    let mut form = ImportForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read uploaded file");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                // Browsers send an empty part when no file was picked.
                if !data.is_empty() {
                    form.file = Some(UploadedFile {
                        file_name,
                        bytes: data.to_vec(),
                    });
                }
            }
            Some(text_field @ ("name" | "order_no" | "allowed_user_ids")) => {
                let text_field = text_field.to_string();
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid {text_field} field: {err}"))
                })?;
                match text_field.as_str() {
                    "name" => form.name = Some(value),
                    "order_no" => form.order_no = Some(value),
                    _ => form.allowed_user_ids.extend(parse_user_ids(&value)?),
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

fn parse_customer_file(file: &UploadedFile) -> AppResult<ParsedRows<CustomerRow>> {
    let grid = read_sheet(file.file_name.as_deref(), &file.bytes)?;
    let parsed = parse_customer_rows(&grid)?;
    Ok(parsed)
}

#[derive(Debug, Serialize)]
pub struct StagedImportResponse<C, R> {
    pub token: Uuid,
    pub context: C,
    pub rows: Vec<StagedRow<R>>,
    pub rejected: Vec<RowRejection>,
    pub expires_at: DateTime<Utc>,
}

impl<C, R: Clone> From<StagedBatch<C, R>> for StagedImportResponse<C, R> {
    fn from(batch: StagedBatch<C, R>) -> Self {
        Self {
            token: batch.token,
            rows: batch.rows(),
            context: batch.context,
            rejected: batch.rejected,
            expires_at: batch.expires_at,
        }
    }
}

type CustomerImportResponse = StagedImportResponse<CustomerImportTarget, CustomerRow>;
type UserImportResponse = StagedImportResponse<(), UserRow>;

/// Stages the project creation wizard. The file is optional; without it the
/// project is created empty on confirmation.
pub async fn stage_new_project_import(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<CustomerImportResponse>)> {
    user.require_staff()?;
    let form = read_import_form(multipart).await?;

    let name = validate_project_name(form.name.as_deref().unwrap_or(""))?;
    let order_no = validate_order_no(form.order_no.as_deref())?;
    let allowed_user_ids = {
        let mut conn = state.db()?;
        validated_allowed_users(&mut conn, form.allowed_user_ids)?
    };

    let parsed = match &form.file {
        Some(file) => parse_customer_file(file)?,
        None => ParsedRows {
            rows: Vec::new(),
            rejected: Vec::new(),
        },
    };

    let target = CustomerImportTarget::NewProject(ProjectDraft {
        name,
        order_no,
        allowed_user_ids,
    });
    let batch = state
        .imports
        .customers
        .stage(user.user_id, target, parsed.rows, parsed.rejected)
        .await;

    info!(
        token = %batch.token,
        rows = batch.row_count(),
        rejected = batch.rejected.len(),
        "project import staged"
    );
    Ok((StatusCode::CREATED, Json(batch.into())))
}

pub async fn stage_project_import(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<CustomerImportResponse>)> {
    user.require_staff()?;
    {
        let mut conn = state.db()?;
        load_visible_project(&mut conn, &user, project_id)?;
    }

    let form = read_import_form(multipart).await?;
    let file = form
        .file
        .ok_or_else(|| AppError::invalid_field("file", "file is required"))?;
    let parsed = parse_customer_file(&file)?;

    let batch = state
        .imports
        .customers
        .stage(
            user.user_id,
            CustomerImportTarget::ExistingProject { project_id },
            parsed.rows,
            parsed.rejected,
        )
        .await;

    info!(
        token = %batch.token,
        project_id = %project_id,
        rows = batch.row_count(),
        rejected = batch.rejected.len(),
        "customer import staged"
    );
    Ok((StatusCode::CREATED, Json(batch.into())))
}

pub async fn get_customer_import(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(token): Path<Uuid>,
) -> AppResult<Json<CustomerImportResponse>> {
    user.require_staff()?;
    let batch = state.imports.customers.get(user.user_id, token).await?;
    Ok(Json(batch.into()))
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomerRowUpdate {
    pub usage_no: Option<String>,
    pub name: Option<String>,
    pub room_number: Option<String>,
    pub meter_type: Option<String>,
    pub meter_number: Option<String>,
}

impl CustomerRowUpdate {
    /// Applies the edit with the same normalization as a spreadsheet cell.
    pub fn apply(&self, row: &CustomerRow) -> Result<CustomerRow, ValidationError> {
        let mut updated = row.clone();
        if let Some(value) = &self.usage_no {
            updated.usage_no = normalize_usage_no(value)
                .ok_or_else(|| ValidationError::new("usage_no", "usage number is required"))?;
        }
        if let Some(value) = &self.name {
            updated.name = value.trim().to_string();
        }
        if let Some(value) = &self.room_number {
            updated.room_number = value.trim().to_string();
        }
        if let Some(value) = &self.meter_type {
            updated.meter_type = value.trim().to_string();
        }
        if let Some(value) = &self.meter_number {
            updated.meter_number = normalize_meter_number(value);
        }
        updated.validate()?;
        Ok(updated)
    }
}

pub async fn update_customer_row(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((token, row_id)): Path<(Uuid, RowId)>,
    Json(update): Json<CustomerRowUpdate>,
) -> AppResult<Json<CustomerImportResponse>> {
    user.require_staff()?;
    let batch = state
        .imports
        .customers
        .update_row(user.user_id, token, row_id, |row| {
            update.apply(row).map_err(AppError::from)
        })
        .await?;
    Ok(Json(batch.into()))
}

pub async fn delete_customer_row(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((token, row_id)): Path<(Uuid, RowId)>,
) -> AppResult<Json<CustomerImportResponse>> {
    user.require_staff()?;
    let batch = state
        .imports
        .customers
        .remove_row(user.user_id, token, row_id)
        .await?;
    Ok(Json(batch.into()))
}

#[derive(Debug, Serialize)]
pub struct CustomerImportResult {
    pub project_id: Uuid,
    #[serde(flatten)]
    pub summary: ImportSummary,
}

fn commit_customer_batch(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    target: &CustomerImportTarget,
    rows: Vec<&CustomerRow>,
) -> AppResult<CustomerImportResult> {
    conn.transaction::<CustomerImportResult, AppError, _>(|conn| {
        let project_id = match target {
            CustomerImportTarget::NewProject(draft) => {
                let creator: User = users::table.find(user.user_id).first(conn)?;
                create_project_record(conn, &creator, draft)?.id
            }
            CustomerImportTarget::ExistingProject { project_id } => {
                load_visible_project(conn, user, *project_id)?.id
            }
        };
        let summary = import_customer_rows(conn, project_id, rows)?;
        Ok(CustomerImportResult {
            project_id,
            summary,
        })
    })
}

/// Commits the staged rows in one transaction. On failure the batch stays
/// staged so the import can be retried.
pub async fn confirm_customer_import(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(token): Path<Uuid>,
) -> AppResult<Json<CustomerImportResult>> {
    user.require_staff()?;
    let batch = state.imports.customers.take(user.user_id, token).await?;

    let outcome = match state.db() {
        Ok(mut conn) => {
            commit_customer_batch(&mut conn, &user, &batch.context, batch.row_data().collect())
        }
        Err(err) => Err(err),
    };

    match outcome {
        Ok(result) => {
            info!(
                token = %token,
                project_id = %result.project_id,
                customers = result.summary.customers,
                created = result.summary.assignments_created,
                updated = result.summary.assignments_updated,
                "customer import committed"
            );
            Ok(Json(result))
        }
        Err(err) => {
            error!(token = %token, error = ?err, "customer import commit failed");
            state.imports.customers.restore(batch).await;
            Err(err)
        }
    }
}

pub async fn cancel_customer_import(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(token): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_staff()?;
    state.imports.customers.cancel(user.user_id, token).await?;
    info!(token = %token, "customer import cancelled");
    Ok(StatusCode::NO_CONTENT)
}

fn user_exists(conn: &mut PgConnection, code: &str) -> QueryResult<bool> {
    let count: i64 = users::table
        .filter(users::code.eq(code).or(users::username.eq(code)))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

pub async fn stage_user_import(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<UserImportResponse>)> {
    user.require_staff()?;
    let form = read_import_form(multipart).await?;
    let file = form
        .file
        .ok_or_else(|| AppError::invalid_field("file", "file is required"))?;

    let grid = read_sheet(file.file_name.as_deref(), &file.bytes)?;
    let mut parsed = parse_user_rows(&grid)?;

    {
        let mut conn = state.db()?;
        for row in &mut parsed.rows {
            row.exists = user_exists(&mut conn, &row.code)?;
        }
    }

    let batch = state
        .imports
        .users
        .stage(user.user_id, (), parsed.rows, parsed.rejected)
        .await;

    info!(
        token = %batch.token,
        rows = batch.row_count(),
        rejected = batch.rejected.len(),
        "user import staged"
    );
    Ok((StatusCode::CREATED, Json(batch.into())))
}

pub async fn get_user_import(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(token): Path<Uuid>,
) -> AppResult<Json<UserImportResponse>> {
    user.require_staff()?;
    let batch = state.imports.users.get(user.user_id, token).await?;
    Ok(Json(batch.into()))
}

#[derive(Debug, Default, Deserialize)]
pub struct UserRowUpdate {
    pub code: Option<String>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub company: Option<String>,
    pub district: Option<String>,
    pub team: Option<String>,
    pub group: Option<String>,
    pub is_staff: Option<bool>,
}

impl UserRowUpdate {
    /// `exists` is the registration state of the resulting code.
    pub fn apply(&self, row: &UserRow, exists: bool) -> Result<UserRow, ValidationError> {
        let mut updated = row.clone();
        if let Some(value) = &self.code {
            updated.code = normalize_user_code(value)
                .ok_or_else(|| ValidationError::new("code", "code is required"))?;
        }
        let text_fields = [
            (&self.last_name, &mut updated.last_name),
            (&self.first_name, &mut updated.first_name),
            (&self.company, &mut updated.company),
            (&self.district, &mut updated.district),
            (&self.team, &mut updated.team),
            (&self.group, &mut updated.group),
        ];
        for (source, target) in text_fields {
            if let Some(value) = source {
                *target = value.trim().to_string();
            }
        }
        if let Some(value) = self.is_staff {
            updated.is_staff = value;
        }
        updated.exists = exists;
        updated.validate()?;
        Ok(updated)
    }
}

pub async fn update_user_row(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((token, row_id)): Path<(Uuid, RowId)>,
    Json(update): Json<UserRowUpdate>,
) -> AppResult<Json<UserImportResponse>> {
    user.require_staff()?;

    let current = state.imports.users.get(user.user_id, token).await?;
    let existing_row = current
        .rows()
        .into_iter()
        .find(|staged| staged.row_id == row_id)
        .map(|staged| staged.data)
        .ok_or(StagingError::RowNotFound(row_id))?;

    let code = match update.code.as_deref().and_then(normalize_user_code) {
        Some(code) => code,
        None => existing_row.code.clone(),
    };
    let exists = {
        let mut conn = state.db()?;
        user_exists(&mut conn, &code)?
    };

    let batch = state
        .imports
        .users
        .update_row(user.user_id, token, row_id, |row| {
            update.apply(row, exists).map_err(AppError::from)
        })
        .await?;
    Ok(Json(batch.into()))
}

pub async fn delete_user_row(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((token, row_id)): Path<(Uuid, RowId)>,
) -> AppResult<Json<UserImportResponse>> {
    user.require_staff()?;
    let batch = state
        .imports
        .users
        .remove_row(user.user_id, token, row_id)
        .await?;
    Ok(Json(batch.into()))
}

#[derive(Debug, Serialize)]
pub struct UserImportResult {
    pub imported: usize,
    pub skipped: usize,
}

/// New users log in with their code as the initial password. Argon2 is slow,
/// so the hashes are computed on the blocking pool before any row is locked.
async fn hash_initial_passwords(codes: Vec<String>) -> AppResult<Vec<String>> {
    let hashes = task::spawn_blocking(move || {
        codes
            .iter()
            .map(|code| password::hash_password(code))
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await
    .map_err(AppError::internal)??;
    Ok(hashes)
}

fn commit_user_rows(
    conn: &mut PgConnection,
    rows: Vec<(&UserRow, String)>,
) -> AppResult<UserImportResult> {
    conn.transaction::<UserImportResult, AppError, _>(|conn| {
        let mut result = UserImportResult {
            imported: 0,
            skipped: 0,
        };
        for (row, password_hash) in rows {
            if user_exists(conn, &row.code)? {
                result.skipped += 1;
                continue;
            }
            let new_user = NewUser {
                id: Uuid::new_v4(),
                code: row.code.clone(),
                username: row.code.clone(),
                password_hash,
                last_name: row.last_name.clone(),
                first_name: row.first_name.clone(),
                company: row.company.clone(),
                district: row.district.clone(),
                team: row.team.clone(),
                group_name: row.group.clone(),
                is_staff: row.is_staff,
            };
            diesel::insert_into(users::table)
                .values(&new_user)
                .execute(conn)?;
            result.imported += 1;
        }
        Ok(result)
    })
}

pub async fn confirm_user_import(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(token): Path<Uuid>,
) -> AppResult<Json<UserImportResult>> {
    user.require_staff()?;
    let batch = state.imports.users.take(user.user_id, token).await?;

    let codes = batch.row_data().map(|row| row.code.clone()).collect();
    let outcome = match hash_initial_passwords(codes).await {
        Ok(hashes) => state.db().and_then(|mut conn| {
            commit_user_rows(&mut conn, batch.row_data().zip(hashes).collect())
        }),
        Err(err) => Err(err),
    };

    match outcome {
        Ok(result) => {
            info!(
                token = %token,
                imported = result.imported,
                skipped = result.skipped,
                "user import committed"
            );
            Ok(Json(result))
        }
        Err(err) => {
            warn!(token = %token, error = ?err, "user import commit failed");
            state.imports.users.restore(batch).await;
            Err(err)
        }
    }
}

pub async fn cancel_user_import(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(token): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_staff()?;
    state.imports.users.cancel(user.user_id, token).await?;
    info!(token = %token, "user import cancelled");
    Ok(StatusCode::NO_CONTENT)
}
