use axum::extract::{Query, State};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::AppResult,
    models::AuditLog,
    response::{ApiResponse, PageParams},
    schema::audit_logs,
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogFilters {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct AuditLogResponse {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub details: Value,
    pub created_at: NaiveDateTime,
}

impl From<AuditLog> for AuditLogResponse {
    fn from(entry: AuditLog) -> Self {
        Self {
            id: entry.id,
            actor_id: entry.actor_id,
            action: entry.action,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            details: entry.details,
            created_at: entry.created_at,
        }
    }
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filters): Query<AuditLogFilters>,
    Query(page): Query<PageParams>,
) -> AppResult<ApiResponse<Vec<AuditLogResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let build = || {
        let mut query = audit_logs::table.into_boxed();
        if let Some(entity_type) = &filters.entity_type {
            query = query.filter(audit_logs::entity_type.eq(entity_type.clone()));
        }
        if let Some(entity_id) = filters.entity_id {
            query = query.filter(audit_logs::entity_id.eq(entity_id));
        }
        if let Some(actor_id) = filters.actor_id {
            query = query.filter(audit_logs::actor_id.eq(actor_id));
        }
        query
    };

    let total: i64 = build().count().get_result(&mut conn)?;
    let rows: Vec<AuditLog> = build()
        .order(audit_logs::created_at.desc())
        .limit(page.per_page())
        .offset(page.offset())
        .load(&mut conn)?;

    let data = rows.into_iter().map(AuditLogResponse::from).collect();
    Ok(ApiResponse::paginated(data, page.paginate(total)))
}
