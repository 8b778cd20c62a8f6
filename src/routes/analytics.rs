use std::collections::BTreeMap;

use axum::extract::State;
use chrono::Utc;
use diesel::{
    dsl::{count_star, sum},
    prelude::*,
    PgConnection,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::AppResult,
    response::ApiResponse,
    schema::{accounts, documents, rids_forms, training_hours, training_sessions},
    scope::{reservist_ids_in, AccessScope},
    state::AppState,
    workflow::{
        accounts::{AccountStatus, Role},
        documents::DocumentStatus,
        rids::RidsStatus,
        training::TrainingStatus,
    },
};

#[derive(Serialize)]
pub struct Overview {
    pub reservists: StatusCounts,
    pub documents: StatusCounts,
    pub rids: StatusCounts,
    pub upcoming_training_sessions: i64,
    pub total_training_hours: i64,
}

#[derive(Serialize)]
pub struct StatusCounts {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
}

impl StatusCounts {
    /// Every known status is present, zero when no rows carry it.
    fn tally(known: &[&'static str], rows: Vec<(String, i64)>) -> Self {
        let mut by_status: BTreeMap<String, i64> =
            known.iter().map(|status| (status.to_string(), 0)).collect();
        let mut total = 0;
        for (status, count) in rows {
            total += count;
            *by_status.entry(status).or_insert(0) += count;
        }
        Self { total, by_status }
    }
}

fn names<T: Copy>(all: &[T], as_str: fn(T) -> &'static str) -> Vec<&'static str> {
    all.iter().map(|value| as_str(*value)).collect()
}

/// Reservist ids the caller may count, `None` meaning no restriction.
fn visible_reservists(
    conn: &mut PgConnection,
    scope: &AccessScope,
) -> AppResult<Option<Vec<Uuid>>> {
    match scope {
        AccessScope::All => Ok(None),
        AccessScope::Companies(companies) => Ok(Some(reservist_ids_in(conn, companies)?)),
        AccessScope::Reservist(own_id) => Ok(Some(vec![*own_id])),
    }
}

pub async fn overview(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<ApiResponse<Overview>> {
    user.require_staff_or_above()?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let visible = visible_reservists(&mut conn, &scope)?;

    let mut reservist_query = accounts::table
        .filter(accounts::role.eq(Role::Reservist.as_str()))
        .group_by(accounts::status)
        .select((accounts::status, count_star()))
        .into_boxed();
    if let Some(ids) = &visible {
        reservist_query = reservist_query.filter(accounts::id.eq_any(ids.clone()));
    }
    let reservists = StatusCounts::tally(
        &names(AccountStatus::ALL, AccountStatus::as_str),
        reservist_query.load(&mut conn)?,
    );

    let mut document_query = documents::table
        .group_by(documents::status)
        .select((documents::status, count_star()))
        .into_boxed();
    if let Some(ids) = &visible {
        document_query = document_query.filter(documents::reservist_id.eq_any(ids.clone()));
    }
    let documents = StatusCounts::tally(
        &names(DocumentStatus::ALL, DocumentStatus::as_str),
        document_query.load(&mut conn)?,
    );

    let mut rids_query = rids_forms::table
        .group_by(rids_forms::status)
        .select((rids_forms::status, count_star()))
        .into_boxed();
    if let Some(ids) = &visible {
        rids_query = rids_query.filter(rids_forms::reservist_id.eq_any(ids.clone()));
    }
    let rids = StatusCounts::tally(
        &names(RidsStatus::ALL, RidsStatus::as_str),
        rids_query.load(&mut conn)?,
    );

    let mut session_query = training_sessions::table
        .filter(training_sessions::status.eq(TrainingStatus::Scheduled.as_str()))
        .filter(training_sessions::starts_at.ge(Utc::now().naive_utc()))
        .into_boxed();
    if let AccessScope::Companies(companies) = &scope {
        session_query = session_query.filter(
            training_sessions::company
                .is_null()
                .or(training_sessions::company.eq_any(companies.clone())),
        );
    }
    let upcoming_training_sessions: i64 = session_query.count().get_result(&mut conn)?;

    let mut hours_query = training_hours::table
        .select(sum(training_hours::hours))
        .into_boxed();
    if let Some(ids) = &visible {
        hours_query = hours_query.filter(training_hours::reservist_id.eq_any(ids.clone()));
    }
    let total_training_hours: Option<i64> = hours_query.first(&mut conn)?;

    Ok(ApiResponse::success(Overview {
        reservists,
        documents,
        rids,
        upcoming_training_sessions,
        total_training_hours: total_training_hours.unwrap_or(0),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_fills_missing_statuses_with_zero() {
        let counts = StatusCounts::tally(
            &names(RidsStatus::ALL, RidsStatus::as_str),
            vec![("submitted".to_string(), 3), ("approved".to_string(), 2)],
        );
        assert_eq!(counts.total, 5);
        assert_eq!(counts.by_status["submitted"], 3);
        assert_eq!(counts.by_status["draft"], 0);
        assert_eq!(counts.by_status.len(), 4);
    }
}
