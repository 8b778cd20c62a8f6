pub mod jwt;
pub mod password;
pub mod session;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization, Cookie};
use axum_extra::TypedHeader;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    schema::accounts,
    state::AppState,
    workflow::accounts::{AccountStatus, Role},
};

pub const ACCESS_COOKIE_NAME: &str = "access_token";
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub account_id: uuid::Uuid,
    pub email: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn require_staff_or_above(&self) -> AppResult<()> {
        if self.role.is_staff_or_above() {
            Ok(())
        } else {
            Err(AppError::forbidden("staff access required"))
        }
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("administrator access required"))
        }
    }

    pub fn require_super_admin(&self) -> AppResult<()> {
        if self.role == Role::SuperAdmin {
            Ok(())
        } else {
            Err(AppError::forbidden("super administrator access required"))
        }
    }
}

/// Access token from `Authorization: Bearer`, falling back to the session
/// cookie set at login.
async fn access_token(parts: &mut Parts, state: &AppState) -> Option<String> {
    if let Ok(TypedHeader(Authorization(bearer))) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await
    {
        return Some(bearer.token().to_owned());
    }

    let TypedHeader(cookies) = TypedHeader::<Cookie>::from_request_parts(parts, state)
        .await
        .ok()?;
    cookies
        .get(ACCESS_COOKIE_NAME)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Verifies the token and that the account behind it is still `active`, so a
/// status change takes effect before the token expires.
pub fn authenticate(state: &AppState, token: &str) -> AppResult<AuthenticatedUser> {
    let claims = state
        .jwt
        .verify_token(token)
        .map_err(|_| AppError::unauthorized())?;

    let mut conn = state.db()?;
    let status: Option<String> = accounts::table
        .find(claims.sub)
        .select(accounts::status)
        .first(&mut conn)
        .optional()?;
    if status.as_deref() != Some(AccountStatus::Active.as_str()) {
        tracing::debug!(account_id = %claims.sub, "access token refused for non-active account");
        return Err(AppError::unauthorized());
    }

    Ok(AuthenticatedUser {
        account_id: claims.sub,
        email: claims.email,
        role: claims.role,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        let token = access_token(parts, state)
            .await
            .ok_or_else(AppError::unauthorized)?;
        let user = authenticate(state, &token)?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}
