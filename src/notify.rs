use diesel::{prelude::*, PgConnection};
use uuid::Uuid;

use crate::{error::AppResult, models::NewNotification, schema::notifications};

pub const KIND_DOCUMENT: &str = "document";
pub const KIND_RIDS: &str = "rids";
pub const KIND_TRAINING: &str = "training";

pub fn send(
    conn: &mut PgConnection,
    account_id: Uuid,
    kind: &str,
    title: impl Into<String>,
    message: impl Into<String>,
    related_id: Option<Uuid>,
) -> AppResult<()> {
    let notification = NewNotification {
        id: Uuid::new_v4(),
        account_id,
        kind: kind.to_string(),
        title: title.into(),
        message: message.into(),
        related_id,
    };

    diesel::insert_into(notifications::table)
        .values(&notification)
        .execute(conn)?;
    Ok(())
}
