//! Refresh token issuing and rotation, and the cookies that carry a session.

use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use chrono::{Duration as ChronoDuration, Utc};
use diesel::{prelude::*, PgConnection};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME},
    error::{AppError, AppResult},
    models::{Account, NewRefreshToken},
    schema::{accounts, refresh_tokens},
    state::AppState,
    workflow::accounts::{AccountStatus, Role},
};

/// Tokens handed out by a login or a refresh.
pub struct IssuedSession {
    pub account: Account,
    pub role: Role,
    pub access_token: String,
    pub refresh_token: String,
}

impl IssuedSession {
    pub fn user(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            account_id: self.account.id,
            email: self.account.email.clone(),
            role: self.role,
        }
    }

    pub fn cookies(&self, state: &AppState) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let access_max_age = state.jwt.expires_in_seconds();
        let refresh_max_age =
            ChronoDuration::days(state.config.refresh_token_expiry_days).num_seconds();

        for (name, value, max_age) in [
            (ACCESS_COOKIE_NAME, self.access_token.as_str(), access_max_age),
            (REFRESH_COOKIE_NAME, self.refresh_token.as_str(), refresh_max_age),
        ] {
            if let Some(cookie) = build_cookie(state, name, value, max_age) {
                headers.append(SET_COOKIE, cookie);
            }
        }
        headers
    }
}

/// Signs an access token and stores a fresh refresh token for `account`.
pub fn start(
    state: &AppState,
    conn: &mut PgConnection,
    account: Account,
) -> AppResult<IssuedSession> {
    let role: Role = account.role.parse().map_err(AppError::internal)?;
    let access_token = state
        .jwt
        .generate_token(account.id, &account.email, role)
        .map_err(AppError::from)?;
    let refresh_token = issue_refresh_token(state, conn, account.id)?;

    Ok(IssuedSession {
        account,
        role,
        access_token,
        refresh_token,
    })
}

/// Redeems a refresh token exactly once and starts a new session for its
/// account. Unknown, expired and already used tokens answer 401, as does an
/// account that is no longer `active`.
pub fn rotate(
    state: &AppState,
    conn: &mut PgConnection,
    presented: &str,
) -> AppResult<IssuedSession> {
    let now = Utc::now().naive_utc();
    let hashed = hash_refresh_token(presented);

    conn.transaction::<_, AppError, _>(|conn| {
        let account_id: Uuid = diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::token_hash.eq(&hashed))
                .filter(refresh_tokens::revoked_at.is_null())
                .filter(refresh_tokens::expires_at.gt(now)),
        )
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .returning(refresh_tokens::account_id)
        .get_result(conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

        let account: Account = accounts::table.find(account_id).first(conn)?;
        if account.status != AccountStatus::Active.as_str() {
            return Err(AppError::unauthorized());
        }
        start(state, conn, account)
    })
}

fn issue_refresh_token(
    state: &AppState,
    conn: &mut PgConnection,
    account_id: Uuid,
) -> AppResult<String> {
    let now = Utc::now();
    let value = generate_refresh_token();
    let new_refresh = NewRefreshToken {
        id: Uuid::new_v4(),
        account_id,
        token_hash: hash_refresh_token(&value),
        issued_at: now.naive_utc(),
        expires_at: (now + ChronoDuration::days(state.config.refresh_token_expiry_days))
            .naive_utc(),
    };

    diesel::insert_into(refresh_tokens::table)
        .values(&new_refresh)
        .execute(conn)?;
    Ok(value)
}

pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn cookie_attributes(
    mut parts: Vec<String>,
    secure: bool,
    domain: Option<&str>,
) -> Option<HeaderValue> {
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    if secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = domain {
        parts.push(format!("Domain={domain}"));
    }
    HeaderValue::from_str(&parts.join("; ")).ok()
}

fn build_cookie(state: &AppState, name: &str, value: &str, max_age: i64) -> Option<HeaderValue> {
    cookie_attributes(
        vec![format!("{name}={value}"), format!("Max-Age={max_age}")],
        state.config.session_cookie_secure,
        state.config.session_cookie_domain.as_deref(),
    )
}

fn expired_cookie(name: &str, secure: bool, domain: Option<&str>) -> Option<HeaderValue> {
    cookie_attributes(
        vec![
            format!("{name}="),
            "Max-Age=0".into(),
            "Expires=Thu, 01 Jan 1970 00:00:00 GMT".into(),
        ],
        secure,
        domain,
    )
}

/// Expires cookie `name`; `None` only when the configured domain is not a
/// valid header value.
pub fn clear_cookie(state: &AppState, name: &str) -> Option<HeaderValue> {
    expired_cookie(
        name,
        state.config.session_cookie_secure,
        state.config.session_cookie_domain.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_tokens_are_stored_hashed() {
        let token = generate_refresh_token();
        assert_eq!(token.len(), 64);
        let hashed = hash_refresh_token(&token);
        assert_ne!(hashed, token);
        assert_eq!(hashed, hash_refresh_token(&token));
        assert_ne!(hashed, hash_refresh_token(&generate_refresh_token()));
    }

    #[test]
    fn cleared_cookie_keeps_its_own_name() {
        let cookie = expired_cookie(REFRESH_COOKIE_NAME, true, Some("portal.example.mil"))
            .expect("valid header");
        let value = cookie.to_str().unwrap();
        assert!(value.starts_with("refresh_token=;"));
        assert!(value.contains("Max-Age=0"));
        assert!(value.contains("Secure"));
        assert!(value.contains("Domain=portal.example.mil"));
    }

    #[test]
    fn unrepresentable_domain_yields_no_cookie() {
        assert!(expired_cookie(ACCESS_COOKIE_NAME, false, Some("bad\ndomain")).is_none());
    }
}
