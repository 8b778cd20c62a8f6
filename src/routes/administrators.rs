use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    accounts::{self as account_ops, AccountResponse, NewAccountFields, StatusChangeRequest},
    audit,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::Account,
    response::{ApiResponse, PageParams},
    schema::accounts,
    state::AppState,
    workflow::accounts::{AccountStatus, Role},
};

const ADMIN_ROLES: [&str; 2] = ["admin", "super_admin"];

#[derive(Deserialize)]
pub struct CreateAdministratorRequest {
    #[serde(flatten)]
    pub account: NewAccountFields,
    pub role: Option<Role>,
}

fn load_administrator(conn: &mut PgConnection, account_id: Uuid) -> AppResult<Account> {
    Ok(accounts::table
        .filter(accounts::id.eq(account_id))
        .filter(accounts::role.eq_any(ADMIN_ROLES))
        .first(conn)?)
}

pub async fn list_administrators(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(page): Query<PageParams>,
) -> AppResult<ApiResponse<Vec<AccountResponse>>> {
    user.require_admin()?;
    let mut conn = state.db()?;

    let total: i64 = accounts::table
        .filter(accounts::role.eq_any(ADMIN_ROLES))
        .count()
        .get_result(&mut conn)?;
    let rows: Vec<Account> = accounts::table
        .filter(accounts::role.eq_any(ADMIN_ROLES))
        .order((accounts::last_name.asc(), accounts::first_name.asc()))
        .limit(page.per_page())
        .offset(page.offset())
        .load(&mut conn)?;

    let data = rows.into_iter().map(AccountResponse::from).collect();
    Ok(ApiResponse::paginated(data, page.paginate(total)))
}

pub async fn create_administrator(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateAdministratorRequest>,
) -> AppResult<ApiResponse<AccountResponse>> {
    user.require_super_admin()?;
    let role = payload.role.unwrap_or(Role::Admin);
    if !role.is_admin() {
        return Err(AppError::bad_request(
            "role must be admin or super_admin",
        ));
    }

    let new_account = account_ops::prepare_account(&payload.account, role, AccountStatus::Active)?;
    let mut conn = state.db()?;
    let account = conn.transaction::<_, AppError, _>(|conn| {
        let account = account_ops::insert_account(conn, &new_account)?;
        audit::record(
            conn,
            Some(user.account_id),
            "administrator.created",
            audit::ENTITY_ACCOUNT,
            Some(account.id),
            json!({ "role": role }),
        )?;
        Ok(account)
    })?;

    tracing::info!(account_id = %account.id, role = %role, "administrator created");
    Ok(ApiResponse::created(AccountResponse::from(account)))
}

pub async fn change_administrator_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(account_id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest>,
) -> AppResult<ApiResponse<AccountResponse>> {
    user.require_super_admin()?;
    let mut conn = state.db()?;
    let target = load_administrator(&mut conn, account_id)?;
    let updated = account_ops::change_status(&mut conn, &user, &target, &payload)?;
    Ok(ApiResponse::success(AccountResponse::from(updated)))
}
