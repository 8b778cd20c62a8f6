use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = accounts)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = accounts)]
pub struct NewAccount {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = companies)]
#[diesel(primary_key(code))]
pub struct Company {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = companies)]
pub struct NewCompany {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = reservist_details)]
#[diesel(primary_key(account_id))]
#[diesel(belongs_to(Account))]
pub struct ReservistDetail {
    pub account_id: Uuid,
    pub service_number: Option<String>,
    pub rank: Option<String>,
    pub company: Option<String>,
    pub readiness_status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = reservist_details)]
pub struct NewReservistDetail {
    pub account_id: Uuid,
    pub service_number: Option<String>,
    pub rank: Option<String>,
    pub company: Option<String>,
    pub readiness_status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = staff_details)]
#[diesel(primary_key(account_id))]
#[diesel(belongs_to(Account))]
pub struct StaffDetail {
    pub account_id: Uuid,
    pub position: Option<String>,
    pub assigned_companies: Vec<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = staff_details)]
pub struct NewStaffDetail {
    pub account_id: Uuid,
    pub position: Option<String>,
    pub assigned_companies: Vec<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(Account))]
pub struct RefreshToken {
    pub id: Uuid,
    pub account_id: Uuid,
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
    pub account_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub reservist_id: Uuid,
    pub document_type: String,
    pub title: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub s3_key: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<NaiveDateTime>,
    pub uploaded_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub reservist_id: Uuid,
    pub document_type: String,
    pub title: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub s3_key: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = rids_forms)]
pub struct RidsForm {
    pub id: Uuid,
    pub reservist_id: Uuid,
    pub status: String,
    pub version: i32,
    pub personal_info: serde_json::Value,
    pub submitted_at: Option<NaiveDateTime>,
    pub approved_at: Option<NaiveDateTime>,
    pub approved_by: Option<Uuid>,
    pub rejected_at: Option<NaiveDateTime>,
    pub rejection_reason: Option<String>,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = rids_forms)]
pub struct NewRidsForm {
    pub id: Uuid,
    pub reservist_id: Uuid,
    pub status: String,
    pub version: i32,
    pub personal_info: serde_json::Value,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = rids_entries)]
#[diesel(belongs_to(RidsForm))]
pub struct RidsEntry {
    pub id: Uuid,
    pub rids_form_id: Uuid,
    pub section: String,
    pub position: i32,
    pub data: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = rids_entries)]
pub struct NewRidsEntry {
    pub id: Uuid,
    pub rids_form_id: Uuid,
    pub section: String,
    pub position: i32,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = training_sessions)]
pub struct TrainingSession {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub starts_at: NaiveDateTime,
    pub ends_at: Option<NaiveDateTime>,
    pub capacity: Option<i32>,
    pub status: String,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = training_sessions)]
pub struct NewTrainingSession {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub starts_at: NaiveDateTime,
    pub ends_at: Option<NaiveDateTime>,
    pub capacity: Option<i32>,
    pub status: String,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = training_registrations)]
#[diesel(belongs_to(TrainingSession))]
pub struct TrainingRegistration {
    pub id: Uuid,
    pub training_session_id: Uuid,
    pub reservist_id: Uuid,
    pub status: String,
    pub completion_status: Option<String>,
    pub hours_completed: Option<i32>,
    pub registered_at: NaiveDateTime,
    pub attended_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = training_registrations)]
pub struct NewTrainingRegistration {
    pub id: Uuid,
    pub training_session_id: Uuid,
    pub reservist_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = training_hours)]
pub struct TrainingHours {
    pub id: Uuid,
    pub reservist_id: Uuid,
    pub training_session_id: Uuid,
    pub hours: i32,
    pub completion_status: String,
    pub awarded_by: Option<Uuid>,
    pub awarded_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = training_hours)]
pub struct NewTrainingHours {
    pub id: Uuid,
    pub reservist_id: Uuid,
    pub training_session_id: Uuid,
    pub hours: i32,
    pub completion_status: String,
    pub awarded_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_id: Option<Uuid>,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = audit_logs)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLog {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub details: serde_json::Value,
}
