use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit,
    auth::{
        password,
        session::{self, IssuedSession},
        AuthenticatedUser, ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME,
    },
    error::{AppError, AppResult},
    models::Account,
    response::ApiResponse,
    schema::{accounts, reservist_details, staff_details},
    state::AppState,
    workflow::accounts::{AccountStatus, Role},
};

use crate::schema::refresh_tokens::dsl as refresh_dsl;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub role: Role,
    pub redirect_to: &'static str,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_companies: Option<Vec<String>>,
}

impl LoginResponse {
    fn from_session(state: &AppState, session: &IssuedSession) -> Self {
        Self {
            access_token: session.access_token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: state.jwt.expires_in_seconds(),
            role: session.role,
            redirect_to: session.role.home_path(),
        }
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, ApiResponse<LoginResponse>)> {
    let mut conn = state.db()?;
    let email = payload.email.trim().to_lowercase();

    let account: Account = match accounts::table
        .filter(accounts::email.eq(&email))
        .first(&mut conn)
        .optional()?
    {
        Some(account) => account,
        None => return Err(AppError::unauthorized()),
    };

    let valid = password::verify_password(&payload.password, &account.password_hash)
        .map_err(|_| AppError::unauthorized())?;

    if !valid {
        return Err(AppError::unauthorized());
    }

    if account.status != AccountStatus::Active.as_str() {
        tracing::info!(account_id = %account.id, status = %account.status, "login refused for non-active account");
        return Err(AppError::unauthorized());
    }

    let issued = session::start(&state, &mut conn, account)?;

    audit::record(
        &mut conn,
        Some(issued.account.id),
        "account.login",
        audit::ENTITY_ACCOUNT,
        Some(issued.account.id),
        json!({}),
    )?;

    Ok((
        issued.cookies(&state),
        ApiResponse::success(LoginResponse::from_session(&state, &issued)),
    ))
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, ApiResponse<LoginResponse>)> {
    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let presented = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let mut conn = state.db()?;
    let issued = session::rotate(&state, &mut conn, presented)?;

    Ok((
        issued.cookies(&state),
        ApiResponse::success(LoginResponse::from_session(&state, &issued)),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let mut rows_affected = 0;

    if let Some(cookies) = jar {
        if let Some(value) = cookies.get(REFRESH_COOKIE_NAME) {
            let hashed = session::hash_refresh_token(value);
            rows_affected = diesel::update(
                refresh_dsl::refresh_tokens
                    .filter(refresh_dsl::token_hash.eq(hashed))
                    .filter(refresh_dsl::account_id.eq(user.account_id))
                    .filter(refresh_dsl::revoked_at.is_null()),
            )
            .set((
                refresh_dsl::revoked_at.eq(now),
                refresh_dsl::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        }
    }

    if rows_affected == 0 {
        diesel::update(
            refresh_dsl::refresh_tokens
                .filter(refresh_dsl::account_id.eq(user.account_id))
                .filter(refresh_dsl::revoked_at.is_null()),
        )
        .set((
            refresh_dsl::revoked_at.eq(now),
            refresh_dsl::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
    }

    let mut headers = HeaderMap::new();
    for name in [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME] {
        if let Some(cookie) = session::clear_cookie(&state, name) {
            headers.append(SET_COOKIE, cookie);
        }
    }
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<ApiResponse<MeResponse>> {
    let mut conn = state.db()?;
    let account: Account = accounts::table.find(user.account_id).first(&mut conn)?;

    let company = match user.role {
        Role::Reservist => reservist_details::table
            .find(account.id)
            .select(reservist_details::company)
            .first::<Option<String>>(&mut conn)
            .optional()?
            .flatten(),
        _ => None,
    };
    let assigned_companies = match user.role {
        Role::Staff => staff_details::table
            .find(account.id)
            .select(staff_details::assigned_companies)
            .first::<Vec<String>>(&mut conn)
            .optional()?,
        _ => None,
    };

    Ok(ApiResponse::success(MeResponse {
        id: account.id,
        email: account.email,
        role: user.role,
        status: account.status,
        first_name: account.first_name,
        last_name: account.last_name,
        company,
        assigned_companies,
    }))
}
