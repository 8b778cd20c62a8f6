use diesel::{prelude::*, PgConnection};
use serde_json::Value;
use uuid::Uuid;

use crate::{error::AppResult, models::NewAuditLog, schema::audit_logs};

pub const ENTITY_ACCOUNT: &str = "account";
pub const ENTITY_COMPANY: &str = "company";
pub const ENTITY_DOCUMENT: &str = "document";
pub const ENTITY_RIDS: &str = "rids_form";
pub const ENTITY_TRAINING: &str = "training_session";

pub fn record(
    conn: &mut PgConnection,
    actor_id: Option<Uuid>,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
    details: Value,
) -> AppResult<()> {
    let entry = NewAuditLog {
        id: Uuid::new_v4(),
        actor_id,
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        details,
    };

    diesel::insert_into(audit_logs::table)
        .values(&entry)
        .execute(conn)?;

    tracing::debug!(%action, %entity_type, ?entity_id, "audit entry recorded");
    Ok(())
}
