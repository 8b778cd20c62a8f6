//! Account creation and status changes shared by the reservist, staff and
//! administrator endpoints.

use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit,
    auth::{password, AuthenticatedUser},
    error::{ensure_status_unchanged, AppError, AppResult},
    models::{Account, NewAccount},
    schema::{accounts, refresh_tokens},
    workflow::accounts::{check_status_change, AccountStatus, Role, StatusChange},
};

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub status: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            role: account.role,
            status: account.status,
            first_name: account.first_name,
            last_name: account.last_name,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: String,
    pub reason: Option<String>,
}

/// Account fields common to every create endpoint.
#[derive(Debug, Deserialize)]
pub struct NewAccountFields {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

pub fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if valid {
        Ok(email)
    } else {
        Err(AppError::bad_request("a valid email address is required"))
    }
}

/// Validates the fields and hashes the password; nothing is written yet.
pub fn prepare_account(
    fields: &NewAccountFields,
    role: Role,
    status: AccountStatus,
) -> AppResult<NewAccount> {
    let email = normalize_email(&fields.email)?;
    let first_name = fields.first_name.trim();
    let last_name = fields.last_name.trim();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(AppError::bad_request(
            "first_name and last_name must not be empty",
        ));
    }
    if fields.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let password_hash = password::hash_password(&fields.password)?;
    Ok(NewAccount {
        id: Uuid::new_v4(),
        email,
        password_hash,
        role: role.as_str().to_string(),
        status: status.as_str().to_string(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
    })
}

pub fn insert_account(conn: &mut PgConnection, account: &NewAccount) -> AppResult<Account> {
    match diesel::insert_into(accounts::table)
        .values(account)
        .execute(conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict(format!(
                "email {} is already registered",
                account.email
            )));
        }
        Err(err) => return Err(AppError::from(err)),
    }
    Ok(accounts::table.find(account.id).first(conn)?)
}

/// Applies a gated status change to `target` on behalf of `actor`. Leaving
/// `active` also revokes the target's refresh tokens.
pub fn change_status(
    conn: &mut PgConnection,
    actor: &AuthenticatedUser,
    target: &Account,
    request: &StatusChangeRequest,
) -> AppResult<Account> {
    let to: AccountStatus = request.status.parse().map_err(AppError::bad_request)?;
    let from: AccountStatus = target.status.parse().map_err(AppError::internal)?;
    let target_role: Role = target.role.parse().map_err(AppError::internal)?;

    check_status_change(StatusChange {
        actor_id: actor.account_id,
        actor_role: actor.role,
        target_id: target.id,
        target_role,
        from,
        to,
    })?;

    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());

    conn.transaction::<_, AppError, _>(|conn| {
        let now = Utc::now().naive_utc();
        let rows = diesel::update(
            accounts::table
                .find(target.id)
                .filter(accounts::status.eq(from.as_str())),
        )
        .set((
            accounts::status.eq(to.as_str()),
            accounts::updated_at.eq(now),
        ))
        .execute(conn)?;
        ensure_status_unchanged(rows)?;

        if to != AccountStatus::Active {
            diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::account_id.eq(target.id))
                    .filter(refresh_tokens::revoked_at.is_null()),
            )
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(conn)?;
        }

        audit::record(
            conn,
            Some(actor.account_id),
            "account.status_changed",
            audit::ENTITY_ACCOUNT,
            Some(target.id),
            json!({ "from": from, "to": to, "reason": reason }),
        )?;
        Ok(())
    })?;

    tracing::info!(
        actor_id = %actor.account_id,
        target_id = %target.id,
        from = %from,
        to = %to,
        "account status changed"
    );

    Ok(accounts::table.find(target.id).first(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(email: &str, password: &str) -> NewAccountFields {
        NewAccountFields {
            email: email.to_string(),
            password: password.to_string(),
            first_name: "Juan".to_string(),
            last_name: "Dela Cruz".to_string(),
        }
    }

    #[test]
    fn emails_are_lowercased() {
        assert_eq!(
            normalize_email("  Juan@Battalion.MIL ").unwrap(),
            "juan@battalion.mil"
        );
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@battalion.mil").is_err());
    }

    #[test]
    fn short_passwords_are_rejected() {
        let err = prepare_account(
            &fields("a@b.mil", "short"),
            Role::Reservist,
            AccountStatus::Active,
        )
        .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn prepared_account_carries_role_and_status() {
        let account = prepare_account(
            &fields("a@b.mil", "long enough"),
            Role::Staff,
            AccountStatus::Pending,
        )
        .unwrap();
        assert_eq!(account.role, "staff");
        assert_eq!(account.status, "pending");
        assert_ne!(account.password_hash, "long enough");
    }
}
