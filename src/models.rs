use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub code: String,
    pub username: String,
    pub password_hash: String,
    pub last_name: String,
    pub first_name: String,
    pub company: String,
    pub district: String,
    pub team: String,
    pub group_name: String,
    pub is_staff: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub code: String,
    pub username: String,
    pub password_hash: String,
    pub last_name: String,
    pub first_name: String,
    pub company: String,
    pub district: String,
    pub team: String,
    pub group_name: String,
    pub is_staff: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: Uuid,
    pub order_no: Option<String>,
    pub name: String,
    pub date: NaiveDate,
    pub district: String,
    pub is_completed: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub id: Uuid,
    pub order_no: Option<String>,
    pub name: String,
    pub district: String,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = project_allowed_users)]
pub struct NewProjectAllowedUser {
    pub project_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable)]
#[diesel(table_name = customers)]
pub struct Customer {
    pub id: Uuid,
    pub usage_no: String,
    pub name: String,
    pub room_number: String,
    pub building_name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = customers)]
pub struct NewCustomer {
    pub id: Uuid,
    pub usage_no: String,
    pub name: String,
    pub room_number: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = assignments)]
#[diesel(belongs_to(Project))]
#[diesel(belongs_to(Customer))]
pub struct Assignment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub customer_id: Uuid,
    pub sequence: i32,
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
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = assignments)]
pub struct NewAssignment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub customer_id: Uuid,
    pub sequence: i32,
    pub block_number: String,
    pub building_number: String,
    pub meter_type: String,
    pub meter_number: String,
    pub m_valve_state: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = photos)]
#[diesel(belongs_to(Assignment))]
pub struct Photo {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub photo_type: String,
    pub s3_key: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub taken_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = photos)]
pub struct NewPhoto {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub photo_type: String,
    pub s3_key: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
