use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    accounts::{self as account_ops, NewAccountFields, StatusChangeRequest},
    audit,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Account, NewReservistDetail, ReservistDetail},
    response::{ApiResponse, PageParams},
    schema::{accounts, reservist_details},
    scope::AccessScope,
    state::AppState,
    utils::json::{nullable_text, required_text},
    workflow::accounts::{AccountStatus, ReadinessStatus, Role},
};

use super::companies::ensure_companies_exist;

#[derive(Debug, Default, Deserialize)]
pub struct ReservistFilters {
    pub company: Option<String>,
    pub status: Option<String>,
    pub readiness: Option<String>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateReservistRequest {
    #[serde(flatten)]
    pub account: NewAccountFields,
    pub service_number: Option<String>,
    pub rank: Option<String>,
    pub company: Option<String>,
    pub readiness_status: Option<ReadinessStatus>,
}

#[derive(Serialize)]
pub struct ReservistResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub status: String,
    pub service_number: Option<String>,
    pub rank: Option<String>,
    pub company: Option<String>,
    pub readiness_status: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

pub(crate) fn to_response(account: Account, detail: Option<ReservistDetail>) -> ReservistResponse {
    ReservistResponse {
        id: account.id,
        email: account.email,
        first_name: account.first_name,
        last_name: account.last_name,
        status: account.status,
        service_number: detail.as_ref().and_then(|d| d.service_number.clone()),
        rank: detail.as_ref().and_then(|d| d.rank.clone()),
        company: detail.as_ref().and_then(|d| d.company.clone()),
        readiness_status: detail.as_ref().map(|d| d.readiness_status.clone()),
        created_at: account.created_at,
        updated_at: account.updated_at,
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = accounts)]
struct AccountProfileChangeset<'a> {
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
    updated_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = reservist_details)]
struct ReservistDetailChangeset<'a> {
    service_number: Option<Option<&'a str>>,
    rank: Option<Option<&'a str>>,
    company: Option<Option<&'a str>>,
    readiness_status: Option<&'a str>,
    updated_at: NaiveDateTime,
}

/// Fields a reservist may not change on their own profile.
const STAFF_ONLY_FIELDS: &[&str] = &[
    "service_number",
    "rank",
    "company",
    "readiness_status",
];

pub async fn list_reservists(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filters): Query<ReservistFilters>,
    Query(page): Query<PageParams>,
) -> AppResult<ApiResponse<Vec<ReservistResponse>>> {
    user.require_staff_or_above()?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    scope.check_company_filter(filters.company.as_deref())?;

    let status = filters
        .status
        .as_deref()
        .map(str::parse::<AccountStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;
    let readiness = filters
        .readiness
        .as_deref()
        .map(str::parse::<ReadinessStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;
    let pattern = filters
        .search
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("%{value}%"));

    let build = || {
        let mut query = accounts::table
            .left_join(reservist_details::table)
            .filter(accounts::role.eq(Role::Reservist.as_str()))
            .into_boxed();

        match &scope {
            AccessScope::All => {}
            AccessScope::Companies(companies) => {
                query = query.filter(reservist_details::company.eq_any(companies.clone()));
            }
            AccessScope::Reservist(own_id) => {
                query = query.filter(accounts::id.eq(*own_id));
            }
        }
        if let Some(company) = &filters.company {
            query = query.filter(reservist_details::company.eq(company.clone()));
        }
        if let Some(status) = status {
            query = query.filter(accounts::status.eq(status.as_str()));
        }
        if let Some(readiness) = readiness {
            query = query.filter(reservist_details::readiness_status.eq(readiness.as_str()));
        }
        if let Some(pattern) = &pattern {
            query = query.filter(
                accounts::first_name
                    .ilike(pattern.clone())
                    .or(accounts::last_name.ilike(pattern.clone()))
                    .or(accounts::email.ilike(pattern.clone()))
                    .or(reservist_details::service_number.ilike(pattern.clone())),
            );
        }
        query
    };

    let total: i64 = build().count().get_result(&mut conn)?;
    let rows: Vec<(Account, Option<ReservistDetail>)> = build()
        .select((
            accounts::all_columns,
            reservist_details::all_columns.nullable(),
        ))
        .order((accounts::last_name.asc(), accounts::first_name.asc()))
        .limit(page.per_page())
        .offset(page.offset())
        .load(&mut conn)?;

    let data = rows
        .into_iter()
        .map(|(account, detail)| to_response(account, detail))
        .collect();
    Ok(ApiResponse::paginated(data, page.paginate(total)))
}

pub async fn create_reservist(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateReservistRequest>,
) -> AppResult<ApiResponse<ReservistResponse>> {
    user.require_staff_or_above()?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;

    let company = trimmed(payload.company.as_deref());
    if let AccessScope::Companies(_) = scope {
        match company.as_deref() {
            Some(code) if scope.allows_company(Some(code)) => {}
            Some(code) => {
                return Err(AppError::forbidden(format!(
                    "company {code} is outside your assignment"
                )))
            }
            None => {
                return Err(AppError::bad_request(
                    "company is required when staff create a reservist",
                ))
            }
        }
    }
    if let Some(code) = &company {
        ensure_companies_exist(&mut conn, std::slice::from_ref(code))?;
    }

    let new_account =
        account_ops::prepare_account(&payload.account, Role::Reservist, AccountStatus::Active)?;

    let (account, detail) = conn.transaction::<_, AppError, _>(|conn| {
        let account = account_ops::insert_account(conn, &new_account)?;
        let detail = NewReservistDetail {
            account_id: account.id,
            service_number: trimmed(payload.service_number.as_deref()),
            rank: trimmed(payload.rank.as_deref()),
            company: company.clone(),
            readiness_status: payload
                .readiness_status
                .unwrap_or(ReadinessStatus::Ready)
                .as_str()
                .to_string(),
        };
        match diesel::insert_into(reservist_details::table)
            .values(&detail)
            .execute(conn)
        {
            Ok(_) => {}
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => {
                return Err(AppError::conflict("service number is already in use"));
            }
            Err(err) => return Err(AppError::from(err)),
        }
        let detail: ReservistDetail = reservist_details::table.find(account.id).first(conn)?;

        audit::record(
            conn,
            Some(user.account_id),
            "reservist.created",
            audit::ENTITY_ACCOUNT,
            Some(account.id),
            json!({ "company": detail.company }),
        )?;
        Ok((account, detail))
    })?;

    tracing::info!(reservist_id = %account.id, created_by = %user.account_id, "reservist created");
    Ok(ApiResponse::created(to_response(account, Some(detail))))
}

pub async fn get_reservist(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(reservist_id): Path<Uuid>,
) -> AppResult<ApiResponse<ReservistResponse>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let (account, detail) = scope.load_reservist(&mut conn, reservist_id)?;
    Ok(ApiResponse::success(to_response(account, detail)))
}

pub async fn update_reservist(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(reservist_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<ApiResponse<ReservistResponse>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let (account, detail) = scope.load_reservist(&mut conn, reservist_id)?;

    if scope.is_reservist() {
        if let Some(field) = STAFF_ONLY_FIELDS
            .iter()
            .find(|field| body.get(**field).is_some())
        {
            return Err(AppError::forbidden(format!(
                "{field} can only be changed by staff"
            )));
        }
    }

    let first_name = required_text(&body, "first_name").map_err(AppError::bad_request)?;
    let last_name = required_text(&body, "last_name").map_err(AppError::bad_request)?;
    let service_number = nullable_text(&body, "service_number").map_err(AppError::bad_request)?;
    let rank = nullable_text(&body, "rank").map_err(AppError::bad_request)?;
    let company = nullable_text(&body, "company").map_err(AppError::bad_request)?;
    let readiness = required_text(&body, "readiness_status")
        .map_err(AppError::bad_request)?
        .map(|value| value.parse::<ReadinessStatus>())
        .transpose()
        .map_err(AppError::bad_request)?;

    if let Some(new_company) = &company {
        if let AccessScope::Companies(_) = scope {
            if !scope.allows_company(new_company.as_deref()) {
                return Err(AppError::forbidden(
                    "reservists can only be moved between your assigned companies",
                ));
            }
        }
        if let Some(code) = new_company {
            ensure_companies_exist(&mut conn, std::slice::from_ref(code))?;
        }
    }

    conn.transaction::<_, AppError, _>(|conn| {
        let now = Utc::now().naive_utc();
        if first_name.is_some() || last_name.is_some() {
            diesel::update(accounts::table.find(account.id))
                .set(&AccountProfileChangeset {
                    first_name: first_name.as_deref(),
                    last_name: last_name.as_deref(),
                    updated_at: now,
                })
                .execute(conn)?;
        }

        let detail_changed = service_number.is_some()
            || rank.is_some()
            || company.is_some()
            || readiness.is_some();
        if detail_changed {
            if detail.is_none() {
                diesel::insert_into(reservist_details::table)
                    .values(&NewReservistDetail {
                        account_id: account.id,
                        service_number: None,
                        rank: None,
                        company: None,
                        readiness_status: ReadinessStatus::Ready.as_str().to_string(),
                    })
                    .execute(conn)?;
            }
            let result = diesel::update(reservist_details::table.find(account.id))
                .set(&ReservistDetailChangeset {
                    service_number: service_number.as_ref().map(|value| value.as_deref()),
                    rank: rank.as_ref().map(|value| value.as_deref()),
                    company: company.as_ref().map(|value| value.as_deref()),
                    readiness_status: readiness.map(ReadinessStatus::as_str),
                    updated_at: now,
                })
                .execute(conn);
            match result {
                Ok(_) => {}
                Err(diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                )) => return Err(AppError::conflict("service number is already in use")),
                Err(err) => return Err(AppError::from(err)),
            }
        }

        audit::record(
            conn,
            Some(user.account_id),
            "reservist.updated",
            audit::ENTITY_ACCOUNT,
            Some(account.id),
            json!({ "fields": body.as_object().map(|map| map.keys().cloned().collect::<Vec<_>>()) }),
        )?;
        Ok(())
    })?;

    let (account, detail) = scope.load_reservist(&mut conn, reservist_id)?;
    Ok(ApiResponse::success(to_response(account, detail)))
}

pub async fn change_reservist_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(reservist_id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest>,
) -> AppResult<ApiResponse<ReservistResponse>> {
    user.require_staff_or_above()?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let (account, detail) = scope.load_reservist(&mut conn, reservist_id)?;

    let updated = account_ops::change_status(&mut conn, &user, &account, &payload)?;
    Ok(ApiResponse::success(to_response(updated, detail)))
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}
