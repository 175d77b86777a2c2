use std::collections::{BTreeMap, BTreeSet};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use diesel::{dsl::exists, prelude::*, select};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::assignments::AssignmentView;
use crate::auth::AuthenticatedUser;
use crate::choices::{OpenStatus, PrStatus};
use crate::error::{AppError, AppResult};
use crate::import::ProjectDraft;
use crate::models::{Assignment, Customer, NewProject, NewProjectAllowedUser, Project, User};
use crate::schema::{assignments, customers, project_allowed_users, projects, users};
use crate::state::AppState;
use crate::utils::json::{classify_nullable, NullableValue};
use crate::validation::{validate_order_no, validate_project_name};

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub order_no: Option<String>,
    pub name: String,
    pub date: NaiveDate,
    pub district: String,
    pub is_completed: bool,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Project> for ProjectResponse {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            order_no: project.order_no,
            name: project.name,
            date: project.date,
            district: project.district,
            is_completed: project.is_completed,
            created_by: project.created_by,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

/// Loads a project the caller may see. Staff see every live project; everyone
/// else only projects they are allowed on. Anything else is reported as missing.
pub(crate) fn load_visible_project(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    project_id: Uuid,
) -> AppResult<Project> {
    let project: Project = projects::table
        .find(project_id)
        .filter(projects::is_deleted.eq(false))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if user.is_staff {
        return Ok(project);
    }

    let allowed: bool = select(exists(
        project_allowed_users::table
            .filter(project_allowed_users::project_id.eq(project_id))
            .filter(project_allowed_users::user_id.eq(user.user_id)),
    ))
    .get_result(conn)?;

    if allowed {
        Ok(project)
    } else {
        Err(AppError::not_found())
    }
}

pub(crate) fn validated_allowed_users(
    conn: &mut PgConnection,
    mut user_ids: Vec<Uuid>,
) -> AppResult<Vec<Uuid>> {
    user_ids.sort();
    user_ids.dedup();
    if user_ids.is_empty() {
        return Ok(user_ids);
    }

    let found: i64 = users::table
        .filter(users::id.eq_any(&user_ids))
        .count()
        .get_result(conn)?;
    if found as usize != user_ids.len() {
        return Err(AppError::invalid_field(
            "allowed_user_ids",
            "one or more selected users do not exist",
        ));
    }
    Ok(user_ids)
}

/// Inserts the project with the creator's district; the creator is always allowed.
pub(crate) fn create_project_record(
    conn: &mut PgConnection,
    creator: &User,
    draft: &ProjectDraft,
) -> QueryResult<Project> {
    conn.transaction(|conn| {
        let project: Project = diesel::insert_into(projects::table)
            .values(&NewProject {
                id: Uuid::new_v4(),
                order_no: draft.order_no.clone(),
                name: draft.name.clone(),
                district: creator.district.clone(),
                created_by: Some(creator.id),
            })
            .get_result(conn)?;

        let mut allowed = draft.allowed_user_ids.clone();
        allowed.push(creator.id);
        allowed.sort();
        allowed.dedup();

        let grants: Vec<NewProjectAllowedUser> = allowed
            .into_iter()
            .map(|user_id| NewProjectAllowedUser {
                project_id: project.id,
                user_id,
            })
            .collect();
        diesel::insert_into(project_allowed_users::table)
            .values(&grants)
            .on_conflict_do_nothing()
            .execute(conn)?;

        Ok(project)
    })
}

#[derive(Debug, Deserialize)]
pub struct ProjectListQuery {
    pub district: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectListResponse {
    pub in_progress: Vec<ProjectResponse>,
    pub completed: Vec<ProjectResponse>,
    pub district_choices: Vec<String>,
    pub selected_district: String,
}

fn parse_date_param(field: &str, raw: Option<&str>) -> AppResult<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| AppError::invalid_field(field, "date must be formatted as YYYY-MM-DD")),
    }
}

/// The completed list defaults to the caller's district; an empty `district` shows all.
pub async fn list_projects(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ProjectListQuery>,
) -> AppResult<Json<ProjectListResponse>> {
    let date_from = parse_date_param("date_from", query.date_from.as_deref())?;
    let date_to = parse_date_param("date_to", query.date_to.as_deref())?;

    let mut conn = state.db()?;
    let current: User = users::table.find(user.user_id).first(&mut conn)?;

    let mut visible = projects::table
        .filter(projects::is_deleted.eq(false))
        .into_boxed();
    if !user.is_staff {
        visible = visible.filter(
            projects::id.eq_any(
                project_allowed_users::table
                    .filter(project_allowed_users::user_id.eq(user.user_id))
                    .select(project_allowed_users::project_id),
            ),
        );
    }
    let all: Vec<Project> = visible
        .order((projects::date.desc(), projects::created_at.desc()))
        .load(&mut conn)?;

    let selected_district = query
        .district
        .map(|district| district.trim().to_string())
        .unwrap_or_else(|| current.district.clone());

    let district_choices: Vec<String> = all
        .iter()
        .map(|project| project.district.clone())
        .filter(|district| !district.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let (completed, in_progress): (Vec<Project>, Vec<Project>) =
        all.into_iter().partition(|project| project.is_completed);

    let completed = completed
        .into_iter()
        .filter(|project| selected_district.is_empty() || project.district == selected_district)
        .filter(|project| date_from.map_or(true, |from| project.date >= from))
        .filter(|project| date_to.map_or(true, |to| project.date <= to))
        .map(ProjectResponse::from)
        .collect();

    Ok(Json(ProjectListResponse {
        in_progress: in_progress.into_iter().map(ProjectResponse::from).collect(),
        completed,
        district_choices,
        selected_district,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub order_no: Option<String>,
    #[serde(default)]
    pub allowed_user_ids: Vec<Uuid>,
}

pub async fn create_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateProjectRequest>,
) -> AppResult<(StatusCode, Json<ProjectResponse>)> {
    user.require_staff()?;

    let name = validate_project_name(&payload.name)?;
    let order_no = validate_order_no(payload.order_no.as_deref())?;

    let mut conn = state.db()?;
    let allowed_user_ids = validated_allowed_users(&mut conn, payload.allowed_user_ids)?;
    let creator: User = users::table.find(user.user_id).first(&mut conn)?;

    let draft = ProjectDraft {
        name,
        order_no,
        allowed_user_ids,
    };
    let project = create_project_record(&mut conn, &creator, &draft)?;

    info!(project_id = %project.id, name = %project.name, "project created");
    Ok((StatusCode::CREATED, Json(ProjectResponse::from(project))))
}

#[derive(Debug, Deserialize)]
pub struct ProjectDetailQuery {
    pub room: Option<String>,
    #[serde(default)]
    pub strip_building: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub done: usize,
    pub not_done: usize,
    pub pct: usize,
    pub not_pct: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrSummaryEntry {
    pub status: PrStatus,
    pub label: &'static str,
    pub count: usize,
    pub pct: usize,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetailResponse {
    pub project: ProjectResponse,
    pub allowed_user_ids: Vec<Uuid>,
    pub assignments: Vec<AssignmentView>,
    pub progress: ProgressSummary,
    pub pr_summary: Vec<PrSummaryEntry>,
}

fn floored_pct(count: usize, total: usize) -> usize {
    if total == 0 {
        0
    } else {
        count * 100 / total
    }
}

pub fn progress_summary<'a>(open_statuses: impl IntoIterator<Item = &'a str>) -> ProgressSummary {
    let mut total = 0;
    let mut done = 0;
    for status in open_statuses {
        total += 1;
        if status == OpenStatus::Completed.as_str() {
            done += 1;
        }
    }
    let not_done = total - done;
    ProgressSummary {
        total,
        done,
        not_done,
        pct: floored_pct(done, total),
        not_pct: floored_pct(not_done, total),
    }
}

pub fn pr_summary<'a>(pr_statuses: impl IntoIterator<Item = &'a str>) -> Vec<PrSummaryEntry> {
    let statuses: Vec<&str> = pr_statuses.into_iter().collect();
    let total = statuses.len();
    PrStatus::ALL
        .iter()
        .map(|status| {
            let count = statuses
                .iter()
                .filter(|value| **value == status.as_str())
                .count();
            PrSummaryEntry {
                status: *status,
                label: status.label(),
                count,
                pct: floored_pct(count, total),
            }
        })
        .collect()
}

/// Room number with the building prefix (text up to the first `-`) removed.
pub fn strip_building_prefix(room: &str) -> &str {
    room.split_once('-').map_or(room, |(_, rest)| rest)
}

fn load_project_assignments(
    conn: &mut PgConnection,
    project_id: Uuid,
) -> QueryResult<Vec<(Assignment, Customer)>> {
    assignments::table
        .inner_join(customers::table)
        .filter(assignments::project_id.eq(project_id))
        .order(assignments::sequence.asc())
        .load(conn)
}

pub async fn get_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    Query(query): Query<ProjectDetailQuery>,
) -> AppResult<Json<ProjectDetailResponse>> {
    let mut conn = state.db()?;
    let project = load_visible_project(&mut conn, &user, project_id)?;
    let rows = load_project_assignments(&mut conn, project_id)?;

    let progress = progress_summary(rows.iter().map(|(a, _)| a.open_status.as_str()));
    let pr_summary = pr_summary(rows.iter().map(|(a, _)| a.pr_status.as_str()));

    let room_filter = query
        .room
        .as_deref()
        .map(str::trim)
        .filter(|room| !room.is_empty());

    let assignments = rows
        .iter()
        .filter(|(_, customer)| room_filter.map_or(true, |room| customer.room_number.contains(room)))
        .map(|(assignment, customer)| {
            let mut view = AssignmentView::new(assignment, customer);
            if query.strip_building {
                view.room_number = strip_building_prefix(&view.room_number).to_string();
            }
            view
        })
        .collect();

    let allowed_user_ids: Vec<Uuid> = project_allowed_users::table
        .filter(project_allowed_users::project_id.eq(project_id))
        .select(project_allowed_users::user_id)
        .load(&mut conn)?;

    Ok(Json(ProjectDetailResponse {
        project: ProjectResponse::from(project),
        allowed_user_ids,
        assignments,
        progress,
        pr_summary,
    }))
}

#[derive(AsChangeset)]
#[diesel(table_name = projects)]
struct UpdateProjectChangeset {
    name: Option<String>,
    order_no: Option<Option<String>>,
    updated_at: NaiveDateTime,
}

/// Accepts `{name?, order_no?}`; `order_no: null` clears the order number.
pub async fn update_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<ProjectResponse>> {
    user.require_staff()?;

    let name = match classify_nullable(body.get("name")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::invalid_field("name", "name cannot be null")),
        NullableValue::String(value) => Some(validate_project_name(&value)?),
    };
    let order_no = match classify_nullable(body.get("order_no")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => Some(None),
        NullableValue::String(value) => Some(validate_order_no(Some(value.as_str()))?),
    };

    let mut conn = state.db()?;
    load_visible_project(&mut conn, &user, project_id)?;

    let updated: Project = diesel::update(projects::table.find(project_id))
        .set(&UpdateProjectChangeset {
            name,
            order_no,
            updated_at: Utc::now().naive_utc(),
        })
        .get_result(&mut conn)?;

    info!(project_id = %updated.id, "project updated");
    Ok(Json(ProjectResponse::from(updated)))
}

#[derive(Debug, Serialize)]
pub struct FloorGroup {
    /// `None` collects rooms whose floor cannot be derived.
    pub floor: Option<u64>,
    pub assignments: Vec<AssignmentView>,
}

/// Floor of an all-digit room number: the room without its last two digits,
/// the first digit of a two-digit room, or 0 for a single digit.
pub fn floor_of(room: &str) -> Option<u64> {
    if room.is_empty() || !room.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match room.len() {
        1 => Some(0),
        2 => room[..1].parse().ok(),
        len => room[..len - 2].parse().ok(),
    }
}

/// Highest floor first; the unknown group, if any, comes last.
pub fn group_by_floor(views: Vec<AssignmentView>) -> Vec<FloorGroup> {
    let mut floors: BTreeMap<u64, Vec<AssignmentView>> = BTreeMap::new();
    let mut unknown = Vec::new();
    for view in views {
        match floor_of(&view.room_number) {
            Some(floor) => floors.entry(floor).or_default().push(view),
            None => unknown.push(view),
        }
    }

    let mut groups: Vec<FloorGroup> = floors
        .into_iter()
        .rev()
        .map(|(floor, mut assignments)| {
            assignments.sort_by(|a, b| {
                a.room_number
                    .cmp(&b.room_number)
                    .then(a.sequence.cmp(&b.sequence))
            });
            FloorGroup {
                floor: Some(floor),
                assignments,
            }
        })
        .collect();
    if !unknown.is_empty() {
        groups.push(FloorGroup {
            floor: None,
            assignments: unknown,
        });
    }
    groups
}

pub async fn project_map(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<FloorGroup>>> {
    let mut conn = state.db()?;
    load_visible_project(&mut conn, &user, project_id)?;
    let rows = load_project_assignments(&mut conn, project_id)?;

    let views = rows
        .iter()
        .map(|(assignment, customer)| AssignmentView::new(assignment, customer))
        .collect();
    Ok(Json(group_by_floor(views)))
}

#[derive(Debug, Serialize)]
pub struct StripBuildingResponse {
    pub updated: usize,
}

/// Rewrites the stored room numbers of the project's customers.
pub async fn strip_building(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<StripBuildingResponse>> {
    user.require_staff()?;
    let mut conn = state.db()?;
    load_visible_project(&mut conn, &user, project_id)?;

    let updated = conn.transaction::<usize, AppError, _>(|conn| {
        let rooms: Vec<(Uuid, String)> = customers::table
            .inner_join(assignments::table)
            .filter(assignments::project_id.eq(project_id))
            .filter(customers::room_number.like("%-%"))
            .select((customers::id, customers::room_number))
            .load(conn)?;

        let mut updated = 0;
        for (customer_id, room) in rooms {
            diesel::update(customers::table.find(customer_id))
                .set(customers::room_number.eq(strip_building_prefix(&room)))
                .execute(conn)?;
            updated += 1;
        }
        Ok(updated)
    })?;

    info!(project_id = %project_id, updated, "building prefix removed from room numbers");
    Ok(Json(StripBuildingResponse { updated }))
}

pub async fn complete_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ProjectResponse>> {
    user.require_staff()?;
    let mut conn = state.db()?;
    load_visible_project(&mut conn, &user, project_id)?;

    let updated: Project = diesel::update(projects::table.find(project_id))
        .set((
            projects::is_completed.eq(true),
            projects::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;

    info!(project_id = %project_id, "project completed");
    Ok(Json(ProjectResponse::from(updated)))
}

/// Soft delete. The project disappears at once and is purged after the grace period.
pub async fn delete_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_staff()?;
    let mut conn = state.db()?;
    load_visible_project(&mut conn, &user, project_id)?;

    let now = Utc::now();
    let purge_after = now + ChronoDuration::days(state.config.project_purge_days);
    diesel::update(projects::table.find(project_id))
        .set((
            projects::is_deleted.eq(true),
            projects::deleted_at.eq(Some(purge_after.naive_utc())),
            projects::updated_at.eq(now.naive_utc()),
        ))
        .execute(&mut conn)?;

    info!(project_id = %project_id, purge_after = %purge_after, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}
