use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{dsl::count_star, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    audit,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Company, NewCompany, StaffDetail},
    response::ApiResponse,
    schema::{companies, reservist_details, staff_details, training_sessions},
    scope::AccessScope,
    state::AppState,
    utils::json::{nullable_text, required_text},
};

const MAX_CODE_LENGTH: usize = 32;

#[derive(Deserialize)]
pub struct CreateCompanyRequest {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = companies)]
struct UpdateCompanyChangeset<'a> {
    name: Option<&'a str>,
    description: Option<Option<&'a str>>,
    updated_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct CompanyResponse {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub reservist_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

fn to_response(company: Company, reservist_count: i64) -> CompanyResponse {
    CompanyResponse {
        code: company.code,
        name: company.name,
        description: company.description,
        reservist_count,
        created_at: company.created_at,
        updated_at: company.updated_at,
    }
}

pub async fn list_companies(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<ApiResponse<Vec<CompanyResponse>>> {
    user.require_staff_or_above()?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;

    let mut query = companies::table.order(companies::code.asc()).into_boxed();
    if let AccessScope::Companies(assigned) = &scope {
        query = query.filter(companies::code.eq_any(assigned.clone()));
    }
    let rows: Vec<Company> = query.load(&mut conn)?;

    let codes: Vec<String> = rows.iter().map(|company| company.code.clone()).collect();
    let counts: HashMap<String, i64> = reservist_details::table
        .filter(reservist_details::company.eq_any(&codes))
        .group_by(reservist_details::company)
        .select((reservist_details::company, count_star()))
        .load::<(Option<String>, i64)>(&mut conn)?
        .into_iter()
        .filter_map(|(code, count)| code.map(|code| (code, count)))
        .collect();

    let response = rows
        .into_iter()
        .map(|company| {
            let count = counts.get(&company.code).copied().unwrap_or(0);
            to_response(company, count)
        })
        .collect();

    Ok(ApiResponse::success(response))
}

pub async fn create_company(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCompanyRequest>,
) -> AppResult<ApiResponse<CompanyResponse>> {
    user.require_admin()?;

    let code = payload.code.trim();
    let name = payload.name.trim();
    if code.is_empty() || name.is_empty() {
        return Err(AppError::bad_request("code and name must not be empty"));
    }
    if code.len() > MAX_CODE_LENGTH {
        return Err(AppError::bad_request(format!(
            "code must be at most {MAX_CODE_LENGTH} characters"
        )));
    }

    let mut conn = state.db()?;
    let new_company = NewCompany {
        code: code.to_string(),
        name: name.to_string(),
        description: payload
            .description
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned),
    };

    match diesel::insert_into(companies::table)
        .values(&new_company)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict(format!("company {code} already exists")));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    audit::record(
        &mut conn,
        Some(user.account_id),
        "company.created",
        audit::ENTITY_COMPANY,
        None,
        json!({ "code": code }),
    )?;

    let company: Company = companies::table.find(code).first(&mut conn)?;
    Ok(ApiResponse::created(to_response(company, 0)))
}

pub async fn update_company(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(code): Path<String>,
    Json(body): Json<Value>,
) -> AppResult<ApiResponse<CompanyResponse>> {
    user.require_admin()?;

    let name = required_text(&body, "name").map_err(AppError::bad_request)?;
    let description = nullable_text(&body, "description").map_err(AppError::bad_request)?;

    let mut conn = state.db()?;
    let existing: Company = companies::table.find(&code).first(&mut conn)?;

    if name.is_some() || description.is_some() {
        let changes = UpdateCompanyChangeset {
            name: name.as_deref(),
            description: description.as_ref().map(|value| value.as_deref()),
            updated_at: Utc::now().naive_utc(),
        };
        diesel::update(companies::table.find(&existing.code))
            .set(&changes)
            .execute(&mut conn)?;
    }

    let company: Company = companies::table.find(&existing.code).first(&mut conn)?;
    let reservist_count: i64 = reservist_details::table
        .filter(reservist_details::company.eq(&company.code))
        .select(count_star())
        .first(&mut conn)?;

    Ok(ApiResponse::success(to_response(company, reservist_count)))
}

/// Refused while reservists or training sessions still point at the company.
/// Staff assignments naming it are pruned in the same transaction.
pub async fn delete_company(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(code): Path<String>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        let company: Company = companies::table.find(&code).first(conn)?;

        let assigned_reservists: i64 = reservist_details::table
            .filter(reservist_details::company.eq(&company.code))
            .select(count_star())
            .first(conn)?;
        if assigned_reservists > 0 {
            return Err(AppError::conflict(format!(
                "company {} still has {assigned_reservists} assigned reservists",
                company.code
            )));
        }

        let sessions: i64 = training_sessions::table
            .filter(training_sessions::company.eq(&company.code))
            .select(count_star())
            .first(conn)?;
        if sessions > 0 {
            return Err(AppError::conflict(format!(
                "company {} still has training sessions",
                company.code
            )));
        }

        let staff_rows: Vec<StaffDetail> = staff_details::table
            .filter(staff_details::assigned_companies.contains(vec![company.code.clone()]))
            .load(conn)?;
        let now = Utc::now().naive_utc();
        for staff in staff_rows {
            let remaining: Vec<String> = staff
                .assigned_companies
                .into_iter()
                .filter(|assigned| *assigned != company.code)
                .collect();
            diesel::update(staff_details::table.find(staff.account_id))
                .set((
                    staff_details::assigned_companies.eq(remaining),
                    staff_details::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        diesel::delete(companies::table.find(&company.code)).execute(conn)?;

        audit::record(
            conn,
            Some(user.account_id),
            "company.deleted",
            audit::ENTITY_COMPANY,
            None,
            json!({ "code": company.code }),
        )?;
        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

/// Fails with 400 when any of `codes` is not a known company.
pub(crate) fn ensure_companies_exist(conn: &mut PgConnection, codes: &[String]) -> AppResult<()> {
    if codes.is_empty() {
        return Ok(());
    }
    let known: Vec<String> = companies::table
        .filter(companies::code.eq_any(codes))
        .select(companies::code)
        .load(conn)?;
    let missing: Vec<&str> = codes
        .iter()
        .filter(|code| !known.contains(code))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "unknown companies: {}",
            missing.join(", ")
        )))
    }
}
