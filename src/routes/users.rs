use std::collections::BTreeSet;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::schema::users;
use crate::state::AppState;
use crate::validation::check_max_chars;

const USER_NAME_MAX_CHARS: usize = 150;
const USER_ATTRIBUTE_MAX_CHARS: usize = 50;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub code: String,
    pub username: String,
    pub last_name: String,
    pub first_name: String,
    pub full_name: String,
    pub company: String,
    pub district: String,
    pub team: String,
    pub group: String,
    pub is_staff: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        let full_name = user.full_name();
        Self {
            id: user.id,
            code: user.code,
            username: user.username,
            last_name: user.last_name,
            first_name: user.first_name,
            full_name,
            company: user.company,
            district: user.district,
            team: user.team,
            group: user.group_name,
            is_staff: user.is_staff,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub company: Option<String>,
    pub district: Option<String>,
    pub team: Option<String>,
    pub group: Option<String>,
    pub is_staff: Option<bool>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn filtered_users(conn: &mut PgConnection, filter: &UserFilter) -> QueryResult<Vec<User>> {
    let mut query = users::table.into_boxed();
    if let Some(company) = non_blank(&filter.company) {
        query = query.filter(users::company.eq(company.to_string()));
    }
    if let Some(district) = non_blank(&filter.district) {
        query = query.filter(users::district.eq(district.to_string()));
    }
    if let Some(team) = non_blank(&filter.team) {
        query = query.filter(users::team.eq(team.to_string()));
    }
    if let Some(group) = non_blank(&filter.group) {
        query = query.filter(users::group_name.eq(group.to_string()));
    }
    if let Some(is_staff) = filter.is_staff {
        query = query.filter(users::is_staff.eq(is_staff));
    }
    query.order(users::code.asc()).load(conn)
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filter): Query<UserFilter>,
) -> AppResult<Json<Vec<UserResponse>>> {
    user.require_staff()?;
    let mut conn = state.db()?;
    let users = filtered_users(&mut conn, &filter)?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct UserChoicesResponse {
    pub companies: Vec<String>,
    pub districts: Vec<String>,
    pub teams: Vec<String>,
    pub groups: Vec<String>,
    pub users: Vec<UserResponse>,
}

/// Filter values for picking the users allowed on a project, plus the matching users.
pub async fn user_choices(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filter): Query<UserFilter>,
) -> AppResult<Json<UserChoicesResponse>> {
    user.require_staff()?;
    let mut conn = state.db()?;

    let attributes: Vec<(String, String, String, String)> = users::table
        .select((
            users::company,
            users::district,
            users::team,
            users::group_name,
        ))
        .load(&mut conn)?;

    let mut companies = BTreeSet::new();
    let mut districts = BTreeSet::new();
    let mut teams = BTreeSet::new();
    let mut groups = BTreeSet::new();
    for (company, district, team, group) in attributes {
        companies.insert(company);
        districts.insert(district);
        teams.insert(team);
        groups.insert(group);
    }

    let matching = filtered_users(&mut conn, &filter)?;
    let without_blank = |set: BTreeSet<String>| -> Vec<String> {
        set.into_iter().filter(|value| !value.is_empty()).collect()
    };

    Ok(Json(UserChoicesResponse {
        companies: without_blank(companies),
        districts: without_blank(districts),
        teams: without_blank(teams),
        groups: without_blank(groups),
        users: matching.into_iter().map(UserResponse::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub company: Option<String>,
    pub district: Option<String>,
    pub team: Option<String>,
    pub group: Option<String>,
    pub is_staff: Option<bool>,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UpdateUserChangeset {
    last_name: Option<String>,
    first_name: Option<String>,
    company: Option<String>,
    district: Option<String>,
    team: Option<String>,
    group_name: Option<String>,
    is_staff: Option<bool>,
    updated_at: chrono::NaiveDateTime,
}

fn checked(field: &str, value: Option<String>, max: usize) -> AppResult<Option<String>> {
    match value {
        Some(value) => {
            let trimmed = value.trim().to_string();
            check_max_chars(field, &trimmed, max)?;
            Ok(Some(trimmed))
        }
        None => Ok(None),
    }
}

/// The code (and the username derived from it) cannot be changed.
pub async fn update_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    user.require_staff()?;

    let changeset = UpdateUserChangeset {
        last_name: checked("last_name", payload.last_name, USER_NAME_MAX_CHARS)?,
        first_name: checked("first_name", payload.first_name, USER_NAME_MAX_CHARS)?,
        company: checked("company", payload.company, USER_ATTRIBUTE_MAX_CHARS)?,
        district: checked("district", payload.district, USER_ATTRIBUTE_MAX_CHARS)?,
        team: checked("team", payload.team, USER_ATTRIBUTE_MAX_CHARS)?,
        group_name: checked("group", payload.group, USER_ATTRIBUTE_MAX_CHARS)?,
        is_staff: payload.is_staff,
        updated_at: Utc::now().naive_utc(),
    };

    let mut conn = state.db()?;
    let updated: User = diesel::update(users::table.find(user_id))
        .set(&changeset)
        .get_result(&mut conn)?;

    info!(user_id = %updated.id, code = %updated.code, "user updated");
    Ok(Json(UserResponse::from(updated)))
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteUsersRequest {
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BulkDeleteUsersResponse {
    pub deleted: usize,
}

pub async fn bulk_delete_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<BulkDeleteUsersRequest>,
) -> AppResult<Json<BulkDeleteUsersResponse>> {
    user.require_staff()?;

    let mut user_ids = payload.user_ids;
    if user_ids.is_empty() {
        return Err(AppError::invalid_field(
            "user_ids",
            "select at least one user to delete",
        ));
    }
    if user_ids.contains(&user.user_id) {
        return Err(AppError::invalid_field(
            "user_ids",
            "you cannot delete your own account",
        ));
    }
    user_ids.sort();
    user_ids.dedup();

    let mut conn = state.db()?;
    let deleted =
        diesel::delete(users::table.filter(users::id.eq_any(&user_ids))).execute(&mut conn)?;

    info!(requested = user_ids.len(), deleted, "users deleted");
    Ok(Json(BulkDeleteUsersResponse { deleted }))
}
