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
    models::{Account, NewStaffDetail, StaffDetail},
    response::{ApiResponse, PageParams},
    schema::{accounts, staff_details},
    state::AppState,
    utils::json::nullable_text,
    workflow::accounts::{AccountStatus, Role},
};

use super::companies::ensure_companies_exist;

#[derive(Debug, Default, Deserialize)]
pub struct StaffFilters {
    pub company: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateStaffRequest {
    #[serde(flatten)]
    pub account: NewAccountFields,
    pub position: Option<String>,
    #[serde(default)]
    pub assigned_companies: Vec<String>,
}

#[derive(Serialize)]
pub struct StaffResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub status: String,
    pub position: Option<String>,
    pub assigned_companies: Vec<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

fn to_response(account: Account, detail: Option<StaffDetail>) -> StaffResponse {
    let (position, assigned_companies) = match detail {
        Some(detail) => (detail.position, detail.assigned_companies),
        None => (None, Vec::new()),
    };
    StaffResponse {
        id: account.id,
        email: account.email,
        first_name: account.first_name,
        last_name: account.last_name,
        status: account.status,
        position,
        assigned_companies,
        created_at: account.created_at,
        updated_at: account.updated_at,
    }
}

/// Trims, drops blanks and de-duplicates company codes, keeping order.
fn normalize_companies(codes: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(codes.len());
    for code in codes {
        let code = code.trim();
        if !code.is_empty() && !normalized.iter().any(|existing| existing == code) {
            normalized.push(code.to_string());
        }
    }
    normalized
}

fn load_staff(conn: &mut PgConnection, staff_id: Uuid) -> AppResult<(Account, Option<StaffDetail>)> {
    Ok(accounts::table
        .left_join(staff_details::table)
        .filter(accounts::id.eq(staff_id))
        .filter(accounts::role.eq(Role::Staff.as_str()))
        .select((accounts::all_columns, staff_details::all_columns.nullable()))
        .first(conn)?)
}

pub async fn list_staff(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filters): Query<StaffFilters>,
    Query(page): Query<PageParams>,
) -> AppResult<ApiResponse<Vec<StaffResponse>>> {
    user.require_admin()?;
    let status = filters
        .status
        .as_deref()
        .map(str::parse::<AccountStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;
    let mut conn = state.db()?;

    let build = || {
        let mut query = accounts::table
            .left_join(staff_details::table)
            .filter(accounts::role.eq(Role::Staff.as_str()))
            .into_boxed();
        if let Some(company) = &filters.company {
            query = query.filter(staff_details::assigned_companies.contains(vec![company.clone()]));
        }
        if let Some(status) = status {
            query = query.filter(accounts::status.eq(status.as_str()));
        }
        query
    };

    let total: i64 = build().count().get_result(&mut conn)?;
    let rows: Vec<(Account, Option<StaffDetail>)> = build()
        .select((accounts::all_columns, staff_details::all_columns.nullable()))
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

pub async fn create_staff(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateStaffRequest>,
) -> AppResult<ApiResponse<StaffResponse>> {
    user.require_admin()?;
    let assigned_companies = normalize_companies(&payload.assigned_companies);
    let mut conn = state.db()?;
    ensure_companies_exist(&mut conn, &assigned_companies)?;

    let new_account =
        account_ops::prepare_account(&payload.account, Role::Staff, AccountStatus::Active)?;

    let (account, detail) = conn.transaction::<_, AppError, _>(|conn| {
        let account = account_ops::insert_account(conn, &new_account)?;
        diesel::insert_into(staff_details::table)
            .values(&NewStaffDetail {
                account_id: account.id,
                position: payload
                    .position
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_owned),
                assigned_companies: assigned_companies.clone(),
            })
            .execute(conn)?;
        let detail: StaffDetail = staff_details::table.find(account.id).first(conn)?;

        audit::record(
            conn,
            Some(user.account_id),
            "staff.created",
            audit::ENTITY_ACCOUNT,
            Some(account.id),
            json!({ "assigned_companies": detail.assigned_companies }),
        )?;
        Ok((account, detail))
    })?;

    Ok(ApiResponse::created(to_response(account, Some(detail))))
}

pub async fn get_staff(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(staff_id): Path<Uuid>,
) -> AppResult<ApiResponse<StaffResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let (account, detail) = load_staff(&mut conn, staff_id)?;
    Ok(ApiResponse::success(to_response(account, detail)))
}

pub async fn update_staff(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(staff_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<ApiResponse<StaffResponse>> {
    user.require_admin()?;
    let position = nullable_text(&body, "position").map_err(AppError::bad_request)?;
    let assigned_companies = match body.get("assigned_companies") {
        None => None,
        Some(value) => {
            let codes: Vec<String> = serde_json::from_value(value.clone()).map_err(|_| {
                AppError::bad_request("assigned_companies must be an array of company codes")
            })?;
            Some(normalize_companies(&codes))
        }
    };

    let mut conn = state.db()?;
    let (account, detail) = load_staff(&mut conn, staff_id)?;
    if let Some(codes) = &assigned_companies {
        ensure_companies_exist(&mut conn, codes)?;
    }

    let previous = detail.as_ref().map(|d| d.assigned_companies.clone());
    conn.transaction::<_, AppError, _>(|conn| {
        let now = Utc::now().naive_utc();
        if detail.is_none() {
            diesel::insert_into(staff_details::table)
                .values(&NewStaffDetail {
                    account_id: account.id,
                    position: None,
                    assigned_companies: Vec::new(),
                })
                .execute(conn)?;
        }
        if let Some(position) = &position {
            diesel::update(staff_details::table.find(account.id))
                .set((
                    staff_details::position.eq(position.as_deref()),
                    staff_details::updated_at.eq(now),
                ))
                .execute(conn)?;
        }
        if let Some(codes) = &assigned_companies {
            diesel::update(staff_details::table.find(account.id))
                .set((
                    staff_details::assigned_companies.eq(codes),
                    staff_details::updated_at.eq(now),
                ))
                .execute(conn)?;
            audit::record(
                conn,
                Some(user.account_id),
                "staff.assignment_changed",
                audit::ENTITY_ACCOUNT,
                Some(account.id),
                json!({ "from": previous, "to": codes }),
            )?;
        }
        Ok(())
    })?;

    let (account, detail) = load_staff(&mut conn, staff_id)?;
    Ok(ApiResponse::success(to_response(account, detail)))
}

pub async fn change_staff_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(staff_id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest>,
) -> AppResult<ApiResponse<StaffResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let (account, detail) = load_staff(&mut conn, staff_id)?;
    let updated = account_ops::change_status(&mut conn, &user, &account, &payload)?;
    Ok(ApiResponse::success(to_response(updated, detail)))
}
