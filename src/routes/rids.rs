use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{dsl::max, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    audit,
    auth::AuthenticatedUser,
    error::{ensure_status_unchanged, AppError, AppResult},
    models::{NewRidsEntry, NewRidsForm, RidsEntry, RidsForm},
    notify,
    response::{ApiResponse, PageParams},
    schema::{reservist_details, rids_entries, rids_forms},
    scope::AccessScope,
    state::AppState,
    workflow::{
        require_reason,
        rids::{self as flow, RidsSection, RidsStatus},
    },
};

#[derive(Debug, Default, Deserialize)]
pub struct RidsFilters {
    pub status: Option<String>,
    pub company: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateRidsRequest {
    pub reservist_id: Option<Uuid>,
    #[serde(default)]
    pub personal_info: Option<Value>,
}

#[derive(Deserialize)]
pub struct UpdateRidsRequest {
    pub personal_info: Value,
}

#[derive(Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct StatusChangeRequest {
    pub status: RidsStatus,
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct RidsEntryResponse {
    pub id: Uuid,
    pub section: String,
    pub position: i32,
    pub data: Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<RidsEntry> for RidsEntryResponse {
    fn from(entry: RidsEntry) -> Self {
        Self {
            id: entry.id,
            section: entry.section,
            position: entry.position,
            data: entry.data,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct RidsResponse {
    pub id: Uuid,
    pub reservist_id: Uuid,
    pub status: String,
    pub version: i32,
    pub personal_info: Value,
    pub submitted_at: Option<NaiveDateTime>,
    pub approved_at: Option<NaiveDateTime>,
    pub approved_by: Option<Uuid>,
    pub rejected_at: Option<NaiveDateTime>,
    pub rejection_reason: Option<String>,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<BTreeMap<String, Vec<RidsEntryResponse>>>,
}

fn to_response(
    form: RidsForm,
    sections: Option<BTreeMap<String, Vec<RidsEntryResponse>>>,
) -> RidsResponse {
    RidsResponse {
        id: form.id,
        reservist_id: form.reservist_id,
        status: form.status,
        version: form.version,
        personal_info: form.personal_info,
        submitted_at: form.submitted_at,
        approved_at: form.approved_at,
        approved_by: form.approved_by,
        rejected_at: form.rejected_at,
        rejection_reason: form.rejection_reason,
        created_by: form.created_by,
        created_at: form.created_at,
        updated_at: form.updated_at,
        sections,
    }
}

fn load_form(conn: &mut PgConnection, scope: &AccessScope, form_id: Uuid) -> AppResult<RidsForm> {
    let form: RidsForm = rids_forms::table.find(form_id).first(conn)?;
    scope.load_reservist(conn, form.reservist_id)?;
    Ok(form)
}

fn form_status(form: &RidsForm) -> AppResult<RidsStatus> {
    form.status.parse().map_err(AppError::internal)
}

fn parse_section(raw: &str) -> AppResult<RidsSection> {
    raw.parse().map_err(AppError::bad_request)
}

fn ensure_object(value: &Value, name: &str) -> AppResult<()> {
    if value.is_object() {
        Ok(())
    } else {
        Err(AppError::bad_request(format!("{name} must be a JSON object")))
    }
}

/// Content edits on a rejected form reopen it as a new draft version. Either
/// way the form row stays locked for the rest of the edit's transaction.
fn reopen_for_edit(conn: &mut PgConnection, form: &RidsForm) -> AppResult<()> {
    let current = form_status(form)?;
    let next = flow::status_after_edit(current)?;
    let guarded = rids_forms::table
        .find(form.id)
        .filter(rids_forms::status.eq(current.as_str()));

    let rows = if current == next {
        guarded
            .select(rids_forms::id)
            .for_update()
            .load::<Uuid>(conn)?
            .len()
    } else {
        diesel::update(guarded)
            .set((
                rids_forms::status.eq(next.as_str()),
                rids_forms::rejected_at.eq(None::<NaiveDateTime>),
                rids_forms::rejection_reason.eq(None::<String>),
                rids_forms::version.eq(rids_forms::version + 1),
                rids_forms::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?
    };
    ensure_status_unchanged(rows)
}

/// Runs a guarded lifecycle move and stamps the columns that belong to the
/// target status.
fn apply_transition(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    form: &RidsForm,
    to: RidsStatus,
    reason: Option<String>,
) -> AppResult<RidsForm> {
    let from = form_status(form)?;
    flow::transition(from, to)?;
    let now = Utc::now().naive_utc();

    conn.transaction::<_, AppError, _>(|conn| {
        let target = rids_forms::table
            .find(form.id)
            .filter(rids_forms::status.eq(from.as_str()));
        let rows = match to {
            RidsStatus::Submitted => diesel::update(target)
                .set((
                    rids_forms::status.eq(to.as_str()),
                    rids_forms::submitted_at.eq(Some(now)),
                    rids_forms::updated_at.eq(now),
                ))
                .execute(conn)?,
            RidsStatus::Approved => diesel::update(target)
                .set((
                    rids_forms::status.eq(to.as_str()),
                    rids_forms::approved_at.eq(Some(now)),
                    rids_forms::approved_by.eq(Some(user.account_id)),
                    rids_forms::updated_at.eq(now),
                ))
                .execute(conn)?,
            RidsStatus::Rejected => diesel::update(target)
                .set((
                    rids_forms::status.eq(to.as_str()),
                    rids_forms::rejected_at.eq(Some(now)),
                    rids_forms::rejection_reason.eq(reason.as_deref()),
                    rids_forms::updated_at.eq(now),
                ))
                .execute(conn)?,
            RidsStatus::Draft => diesel::update(target)
                .set((
                    rids_forms::status.eq(to.as_str()),
                    rids_forms::rejected_at.eq(None::<NaiveDateTime>),
                    rids_forms::rejection_reason.eq(None::<String>),
                    rids_forms::version.eq(rids_forms::version + 1),
                    rids_forms::updated_at.eq(now),
                ))
                .execute(conn)?,
        };
        ensure_status_unchanged(rows)?;

        if let Some((title, message)) = flow::notification_text(to, reason.as_deref()) {
            notify::send(
                conn,
                form.reservist_id,
                notify::KIND_RIDS,
                title,
                message,
                Some(form.id),
            )?;
        }

        audit::record(
            conn,
            Some(user.account_id),
            "rids.status_changed",
            audit::ENTITY_RIDS,
            Some(form.id),
            json!({ "from": from, "to": to, "reason": reason }),
        )?;

        Ok(rids_forms::table.find(form.id).first::<RidsForm>(conn)?)
    })
}

pub async fn list_rids(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filters): Query<RidsFilters>,
    Query(page): Query<PageParams>,
) -> AppResult<ApiResponse<Vec<RidsResponse>>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    scope.check_company_filter(filters.company.as_deref())?;
    let status = filters
        .status
        .as_deref()
        .map(str::parse::<RidsStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;

    let build = || {
        let mut query = rids_forms::table.into_boxed();
        match &scope {
            AccessScope::All => {}
            AccessScope::Companies(companies) => {
                query = query.filter(
                    rids_forms::reservist_id.eq_any(
                        reservist_details::table
                            .filter(reservist_details::company.eq_any(companies.clone()))
                            .select(reservist_details::account_id),
                    ),
                );
            }
            AccessScope::Reservist(own_id) => {
                query = query.filter(rids_forms::reservist_id.eq(*own_id));
            }
        }
        if let Some(company) = &filters.company {
            query = query.filter(
                rids_forms::reservist_id.eq_any(
                    reservist_details::table
                        .filter(reservist_details::company.eq(company.clone()))
                        .select(reservist_details::account_id),
                ),
            );
        }
        if let Some(status) = status {
            query = query.filter(rids_forms::status.eq(status.as_str()));
        }
        query
    };

    let total: i64 = build().count().get_result(&mut conn)?;
    let rows: Vec<RidsForm> = build()
        .order(rids_forms::updated_at.desc())
        .limit(page.per_page())
        .offset(page.offset())
        .load(&mut conn)?;

    let data = rows.into_iter().map(|form| to_response(form, None)).collect();
    Ok(ApiResponse::paginated(data, page.paginate(total)))
}

pub async fn create_rids(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateRidsRequest>,
) -> AppResult<ApiResponse<RidsResponse>> {
    let personal_info = payload
        .personal_info
        .unwrap_or_else(|| Value::Object(Default::default()));
    ensure_object(&personal_info, "personal_info")?;

    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let reservist_id = match (&scope, payload.reservist_id) {
        (AccessScope::Reservist(own_id), None) => *own_id,
        (_, Some(requested)) => requested,
        (_, None) => return Err(AppError::bad_request("reservist_id is required")),
    };
    scope.load_reservist(&mut conn, reservist_id)?;

    let existing = rids_forms::table
        .filter(rids_forms::reservist_id.eq(reservist_id))
        .select(rids_forms::id)
        .first::<Uuid>(&mut conn)
        .optional()?;
    if existing.is_some() {
        return Err(AppError::conflict(
            "a RIDS form already exists for this reservist",
        ));
    }

    let new_form = NewRidsForm {
        id: Uuid::new_v4(),
        reservist_id,
        status: RidsStatus::Draft.as_str().to_string(),
        version: 1,
        personal_info,
        created_by: user.account_id,
    };

    let form = conn.transaction::<_, AppError, _>(|conn| {
        match diesel::insert_into(rids_forms::table)
            .values(&new_form)
            .execute(conn)
        {
            Ok(_) => {}
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => {
                return Err(AppError::conflict(
                    "a RIDS form already exists for this reservist",
                ));
            }
            Err(err) => return Err(AppError::from(err)),
        }
        audit::record(
            conn,
            Some(user.account_id),
            "rids.created",
            audit::ENTITY_RIDS,
            Some(new_form.id),
            json!({ "reservist_id": reservist_id }),
        )?;
        Ok(rids_forms::table.find(new_form.id).first::<RidsForm>(conn)?)
    })?;

    Ok(ApiResponse::created(to_response(form, Some(BTreeMap::new()))))
}

pub async fn get_rids(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(form_id): Path<Uuid>,
) -> AppResult<ApiResponse<RidsResponse>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;

    let entries: Vec<RidsEntry> = RidsEntry::belonging_to(&form)
        .order((rids_entries::section.asc(), rids_entries::position.asc()))
        .load(&mut conn)?;

    let mut sections: BTreeMap<String, Vec<RidsEntryResponse>> = RidsSection::ALL
        .iter()
        .map(|section| (section.as_str().to_string(), Vec::new()))
        .collect();
    for entry in entries {
        sections
            .entry(entry.section.clone())
            .or_default()
            .push(entry.into());
    }

    Ok(ApiResponse::success(to_response(form, Some(sections))))
}

pub async fn update_rids(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(form_id): Path<Uuid>,
    Json(payload): Json<UpdateRidsRequest>,
) -> AppResult<ApiResponse<RidsResponse>> {
    ensure_object(&payload.personal_info, "personal_info")?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;

    let updated = conn.transaction::<_, AppError, _>(|conn| {
        reopen_for_edit(conn, &form)?;
        diesel::update(rids_forms::table.find(form.id))
            .set((
                rids_forms::personal_info.eq(&payload.personal_info),
                rids_forms::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        audit::record(
            conn,
            Some(user.account_id),
            "rids.updated",
            audit::ENTITY_RIDS,
            Some(form.id),
            json!({ "previous_status": form.status }),
        )?;
        Ok(rids_forms::table.find(form.id).first::<RidsForm>(conn)?)
    })?;

    Ok(ApiResponse::success(to_response(updated, None)))
}

pub async fn submit_rids(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(form_id): Path<Uuid>,
) -> AppResult<ApiResponse<RidsResponse>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;
    let updated = apply_transition(&mut conn, &user, &form, RidsStatus::Submitted, None)?;
    Ok(ApiResponse::success(to_response(updated, None)))
}

pub async fn approve_rids(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(form_id): Path<Uuid>,
) -> AppResult<ApiResponse<RidsResponse>> {
    user.require_staff_or_above()?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;
    let updated = apply_transition(&mut conn, &user, &form, RidsStatus::Approved, None)?;
    Ok(ApiResponse::success(to_response(updated, None)))
}

pub async fn reject_rids(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(form_id): Path<Uuid>,
    Json(payload): Json<ReasonRequest>,
) -> AppResult<ApiResponse<RidsResponse>> {
    user.require_staff_or_above()?;
    let reason = require_reason(payload.reason.as_deref())?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;
    let updated = apply_transition(&mut conn, &user, &form, RidsStatus::Rejected, Some(reason))?;
    Ok(ApiResponse::success(to_response(updated, None)))
}

/// Generic reviewer surface; it goes through the same transition table as
/// the dedicated actions and always records a reason.
pub async fn change_rids_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(form_id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest>,
) -> AppResult<ApiResponse<RidsResponse>> {
    user.require_staff_or_above()?;
    let reason = require_reason(payload.reason.as_deref())?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;
    let updated = apply_transition(&mut conn, &user, &form, payload.status, Some(reason))?;
    Ok(ApiResponse::success(to_response(updated, None)))
}

pub async fn delete_rids(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(form_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;
    let status = form_status(&form)?;
    flow::ensure_deletable(status)?;

    conn.transaction::<_, AppError, _>(|conn| {
        let rows = diesel::delete(
            rids_forms::table
                .find(form.id)
                .filter(rids_forms::status.eq(status.as_str())),
        )
        .execute(conn)?;
        ensure_status_unchanged(rows)?;
        audit::record(
            conn,
            Some(user.account_id),
            "rids.deleted",
            audit::ENTITY_RIDS,
            Some(form.id),
            json!({ "reservist_id": form.reservist_id }),
        )?;
        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_section_entries(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((form_id, section)): Path<(Uuid, String)>,
) -> AppResult<ApiResponse<Vec<RidsEntryResponse>>> {
    let section = parse_section(&section)?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;

    let entries: Vec<RidsEntry> = RidsEntry::belonging_to(&form)
        .filter(rids_entries::section.eq(section.as_str()))
        .order(rids_entries::position.asc())
        .load(&mut conn)?;
    Ok(ApiResponse::success(
        entries.into_iter().map(RidsEntryResponse::from).collect(),
    ))
}

pub async fn add_section_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((form_id, section)): Path<(Uuid, String)>,
    Json(data): Json<Value>,
) -> AppResult<ApiResponse<RidsEntryResponse>> {
    let section = parse_section(&section)?;
    section.validate_entry(&data).map_err(AppError::bad_request)?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;

    let entry = conn.transaction::<_, AppError, _>(|conn| {
        reopen_for_edit(conn, &form)?;
        let last_position: Option<i32> = rids_entries::table
            .filter(rids_entries::rids_form_id.eq(form.id))
            .filter(rids_entries::section.eq(section.as_str()))
            .select(max(rids_entries::position))
            .first(conn)?;
        let new_entry = NewRidsEntry {
            id: Uuid::new_v4(),
            rids_form_id: form.id,
            section: section.as_str().to_string(),
            position: last_position.map(|position| position + 1).unwrap_or(0),
            data: data.clone(),
        };
        diesel::insert_into(rids_entries::table)
            .values(&new_entry)
            .execute(conn)?;
        touch_form(conn, form.id)?;
        Ok(rids_entries::table.find(new_entry.id).first::<RidsEntry>(conn)?)
    })?;

    Ok(ApiResponse::created(entry.into()))
}

pub async fn update_section_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((form_id, section, entry_id)): Path<(Uuid, String, Uuid)>,
    Json(data): Json<Value>,
) -> AppResult<ApiResponse<RidsEntryResponse>> {
    let section = parse_section(&section)?;
    section.validate_entry(&data).map_err(AppError::bad_request)?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;

    let entry = conn.transaction::<_, AppError, _>(|conn| {
        let entry = load_entry(conn, form.id, section, entry_id)?;
        reopen_for_edit(conn, &form)?;
        diesel::update(rids_entries::table.find(entry.id))
            .set((
                rids_entries::data.eq(&data),
                rids_entries::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        touch_form(conn, form.id)?;
        Ok(rids_entries::table.find(entry.id).first::<RidsEntry>(conn)?)
    })?;

    Ok(ApiResponse::success(entry.into()))
}

pub async fn delete_section_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((form_id, section, entry_id)): Path<(Uuid, String, Uuid)>,
) -> AppResult<StatusCode> {
    let section = parse_section(&section)?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let form = load_form(&mut conn, &scope, form_id)?;

    conn.transaction::<_, AppError, _>(|conn| {
        let entry = load_entry(conn, form.id, section, entry_id)?;
        reopen_for_edit(conn, &form)?;
        diesel::delete(rids_entries::table.find(entry.id)).execute(conn)?;
        touch_form(conn, form.id)?;
        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

fn load_entry(
    conn: &mut PgConnection,
    form_id: Uuid,
    section: RidsSection,
    entry_id: Uuid,
) -> AppResult<RidsEntry> {
    Ok(rids_entries::table
        .filter(rids_entries::id.eq(entry_id))
        .filter(rids_entries::rids_form_id.eq(form_id))
        .filter(rids_entries::section.eq(section.as_str()))
        .first(conn)?)
}

fn touch_form(conn: &mut PgConnection, form_id: Uuid) -> AppResult<()> {
    diesel::update(rids_forms::table.find(form_id))
        .set(rids_forms::updated_at.eq(Utc::now().naive_utc()))
        .execute(conn)?;
    Ok(())
}
