//! Company scoping for staff accounts.
//!
//! Staff may only see reservists, documents, RIDS forms and training sessions
//! that belong to one of their `assigned_companies`. Handlers resolve an
//! [`AccessScope`] once per request and push it into their queries, so rows
//! outside the scope are never loaded.

use diesel::{prelude::*, PgConnection};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Account, ReservistDetail},
    schema::{accounts, reservist_details, staff_details},
    workflow::accounts::Role,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    /// Administrators see everything.
    All,
    /// Staff see the listed companies.
    Companies(Vec<String>),
    /// Reservists see their own records.
    Reservist(Uuid),
}

impl AccessScope {
    pub fn resolve(conn: &mut PgConnection, user: &AuthenticatedUser) -> AppResult<Self> {
        match user.role {
            Role::Admin | Role::SuperAdmin => Ok(AccessScope::All),
            Role::Reservist => Ok(AccessScope::Reservist(user.account_id)),
            Role::Staff => {
                let companies: Vec<String> = staff_details::table
                    .find(user.account_id)
                    .select(staff_details::assigned_companies)
                    .first(conn)
                    .optional()?
                    .unwrap_or_default();
                Ok(AccessScope::Companies(companies))
            }
        }
    }

    pub fn is_reservist(&self) -> bool {
        matches!(self, AccessScope::Reservist(_))
    }

    /// Whether a record owned by `reservist_id` in `company` is visible.
    pub fn allows(&self, reservist_id: Uuid, company: Option<&str>) -> bool {
        match self {
            AccessScope::All => true,
            AccessScope::Companies(companies) => company
                .map(|code| companies.iter().any(|assigned| assigned == code))
                .unwrap_or(false),
            AccessScope::Reservist(own_id) => *own_id == reservist_id,
        }
    }

    /// Whether a company itself (or `None` for system-wide) is within scope.
    pub fn allows_company(&self, company: Option<&str>) -> bool {
        match self {
            AccessScope::All => true,
            AccessScope::Companies(companies) => company
                .map(|code| companies.iter().any(|assigned| assigned == code))
                .unwrap_or(false),
            AccessScope::Reservist(_) => false,
        }
    }

    /// Rejects an explicit `?company=` filter that points outside the scope.
    pub fn check_company_filter(&self, requested: Option<&str>) -> AppResult<()> {
        match (self, requested) {
            (AccessScope::Companies(_), Some(code)) if !self.allows_company(Some(code)) => Err(
                AppError::forbidden(format!("company {code} is outside your assignment")),
            ),
            _ => Ok(()),
        }
    }

    /// Loads a reservist account and its detail row, failing with 404 when the
    /// account is not a reservist and 403 when it lies outside the scope.
    pub fn load_reservist(
        &self,
        conn: &mut PgConnection,
        reservist_id: Uuid,
    ) -> AppResult<(Account, Option<ReservistDetail>)> {
        let (account, detail): (Account, Option<ReservistDetail>) = accounts::table
            .left_join(reservist_details::table)
            .filter(accounts::id.eq(reservist_id))
            .filter(accounts::role.eq(Role::Reservist.as_str()))
            .select((
                accounts::all_columns,
                reservist_details::all_columns.nullable(),
            ))
            .first(conn)?;

        let company = detail.as_ref().and_then(|d| d.company.as_deref());
        if !self.allows(account.id, company) {
            return Err(AppError::forbidden(
                "reservist is outside your assigned companies",
            ));
        }

        Ok((account, detail))
    }

    /// Company of a reservist after checking that the caller may act on them.
    pub fn reservist_company(
        &self,
        conn: &mut PgConnection,
        reservist_id: Uuid,
    ) -> AppResult<Option<String>> {
        let (_, detail) = self.load_reservist(conn, reservist_id)?;
        Ok(detail.and_then(|d| d.company))
    }
}

/// Account ids of reservists assigned to any of `companies`.
pub fn reservist_ids_in(conn: &mut PgConnection, companies: &[String]) -> AppResult<Vec<Uuid>> {
    if companies.is_empty() {
        return Ok(Vec::new());
    }
    Ok(reservist_details::table
        .filter(reservist_details::company.eq_any(companies))
        .select(reservist_details::account_id)
        .load(conn)?)
}
