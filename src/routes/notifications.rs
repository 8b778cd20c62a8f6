use axum::extract::{Path, Query, State};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::Notification,
    response::{ApiResponse, PageParams},
    schema::notifications,
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct NotificationFilters {
    pub unread: Option<bool>,
}

#[derive(Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_id: Option<Uuid>,
    pub read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl From<Notification> for NotificationResponse {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            kind: notification.kind,
            title: notification.title,
            message: notification.message,
            related_id: notification.related_id,
            read: notification.read_at.is_some(),
            read_at: notification.read_at,
            created_at: notification.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct MarkAllReadResponse {
    pub updated: usize,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filters): Query<NotificationFilters>,
    Query(page): Query<PageParams>,
) -> AppResult<ApiResponse<Vec<NotificationResponse>>> {
    let mut conn = state.db()?;

    let build = || {
        let mut query = notifications::table
            .filter(notifications::account_id.eq(user.account_id))
            .into_boxed();
        match filters.unread {
            Some(true) => query = query.filter(notifications::read_at.is_null()),
            Some(false) => query = query.filter(notifications::read_at.is_not_null()),
            None => {}
        }
        query
    };

    let total: i64 = build().count().get_result(&mut conn)?;
    let rows: Vec<Notification> = build()
        .order(notifications::created_at.desc())
        .limit(page.per_page())
        .offset(page.offset())
        .load(&mut conn)?;

    let data = rows.into_iter().map(NotificationResponse::from).collect();
    Ok(ApiResponse::paginated(data, page.paginate(total)))
}

/// Other accounts' notifications answer 404, never 403.
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<ApiResponse<NotificationResponse>> {
    let mut conn = state.db()?;
    let notification: Notification = notifications::table
        .filter(notifications::id.eq(notification_id))
        .filter(notifications::account_id.eq(user.account_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if notification.read_at.is_some() {
        return Ok(ApiResponse::success(notification.into()));
    }

    let updated: Notification = diesel::update(notifications::table.find(notification.id))
        .set(notifications::read_at.eq(Some(Utc::now().naive_utc())))
        .get_result(&mut conn)?;
    Ok(ApiResponse::success(updated.into()))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<ApiResponse<MarkAllReadResponse>> {
    let mut conn = state.db()?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::account_id.eq(user.account_id))
            .filter(notifications::read_at.is_null()),
    )
    .set(notifications::read_at.eq(Some(Utc::now().naive_utc())))
    .execute(&mut conn)?;

    tracing::debug!(account_id = %user.account_id, updated, "notifications marked read");
    Ok(ApiResponse::success(MarkAllReadResponse { updated }))
}
