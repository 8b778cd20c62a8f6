use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    audit,
    auth::AuthenticatedUser,
    error::{ensure_status_unchanged, AppError, AppResult},
    models::{
        Account, NewTrainingHours, NewTrainingRegistration, NewTrainingSession, TrainingHours,
        TrainingRegistration, TrainingSession,
    },
    notify,
    response::{ApiResponse, PageParams},
    schema::{accounts, reservist_details, training_hours, training_registrations, training_sessions},
    scope::AccessScope,
    state::AppState,
    utils::json::{nullable_text, required_text},
    workflow::training::{
        self as flow, CompletionStatus, RegistrationStatus, TrainingStatus,
    },
};

use super::companies::ensure_companies_exist;

#[derive(Debug, Default, Deserialize)]
pub struct SessionFilters {
    pub status: Option<String>,
    pub company: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub title: String,
    pub description: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub capacity: Option<i32>,
}

#[derive(Deserialize)]
pub struct SessionStatusRequest {
    pub status: TrainingStatus,
}

#[derive(Deserialize, Default)]
pub struct RegisterRequest {
    pub reservist_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct AttendanceRequest {
    pub reservist_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct CompletionResult {
    pub reservist_id: Uuid,
    pub completion_status: Option<CompletionStatus>,
    pub hours_completed: Option<i32>,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub hours_completed: i32,
    #[serde(default)]
    pub results: Vec<CompletionResult>,
}

#[derive(Deserialize)]
pub struct HoursFilters {
    pub reservist_id: Option<Uuid>,
}

#[derive(Serialize, Default)]
pub struct RegistrationStats {
    pub total: i64,
    pub registered: i64,
    pub attended: i64,
    pub no_show: i64,
    pub completed: i64,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub starts_at: NaiveDateTime,
    pub ends_at: Option<NaiveDateTime>,
    pub capacity: Option<i32>,
    pub status: String,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrations: Option<RegistrationStats>,
}

fn to_response(session: TrainingSession, registrations: Option<RegistrationStats>) -> SessionResponse {
    SessionResponse {
        id: session.id,
        title: session.title,
        description: session.description,
        company: session.company,
        location: session.location,
        starts_at: session.starts_at,
        ends_at: session.ends_at,
        capacity: session.capacity,
        status: session.status,
        created_by: session.created_by,
        created_at: session.created_at,
        updated_at: session.updated_at,
        registrations,
    }
}

#[derive(Serialize)]
pub struct RegistrationResponse {
    pub id: Uuid,
    pub training_session_id: Uuid,
    pub reservist_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: String,
    pub completion_status: Option<String>,
    pub hours_completed: Option<i32>,
    pub registered_at: NaiveDateTime,
    pub attended_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct AttendanceResponse {
    pub attended: Vec<Uuid>,
    pub no_show: Vec<Uuid>,
    pub session_status: String,
}

#[derive(Serialize)]
pub struct CompletionResponse {
    pub session: SessionResponse,
    pub completed: usize,
    pub hours_awarded: usize,
}

#[derive(Serialize)]
pub struct TrainingHoursResponse {
    pub id: Uuid,
    pub reservist_id: Uuid,
    pub training_session_id: Uuid,
    pub session_title: String,
    pub hours: i32,
    pub completion_status: String,
    pub awarded_by: Option<Uuid>,
    pub awarded_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = training_sessions)]
struct UpdateSessionChangeset<'a> {
    title: Option<&'a str>,
    description: Option<Option<&'a str>>,
    location: Option<Option<&'a str>>,
    starts_at: Option<NaiveDateTime>,
    ends_at: Option<Option<NaiveDateTime>>,
    capacity: Option<Option<i32>>,
    updated_at: NaiveDateTime,
}

fn session_status(session: &TrainingSession) -> AppResult<TrainingStatus> {
    session.status.parse().map_err(AppError::internal)
}

fn own_company(conn: &mut PgConnection, reservist_id: Uuid) -> AppResult<Option<String>> {
    Ok(reservist_details::table
        .find(reservist_id)
        .select(reservist_details::company)
        .first::<Option<String>>(conn)
        .optional()?
        .flatten())
}

/// System-wide sessions are visible to everyone; company sessions only to
/// that company's staff and reservists.
fn ensure_visible(
    conn: &mut PgConnection,
    scope: &AccessScope,
    session: &TrainingSession,
) -> AppResult<()> {
    let Some(company) = session.company.as_deref() else {
        return Ok(());
    };
    let visible = match scope {
        AccessScope::Reservist(own_id) => {
            own_company(conn, *own_id)?.as_deref() == Some(company)
        }
        _ => scope.allows_company(Some(company)),
    };
    if visible {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "training session is outside your assigned companies",
        ))
    }
}

/// Staff manage sessions of their own companies only; system-wide sessions
/// belong to administrators.
fn ensure_manageable(user: &AuthenticatedUser, scope: &AccessScope, session: &TrainingSession) -> AppResult<()> {
    user.require_staff_or_above()?;
    if scope.allows_company(session.company.as_deref()) {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "training session is outside your assigned companies",
        ))
    }
}

fn load_stats(conn: &mut PgConnection, session_id: Uuid) -> AppResult<RegistrationStats> {
    let rows: Vec<(String, i64)> = training_registrations::table
        .filter(training_registrations::training_session_id.eq(session_id))
        .group_by(training_registrations::status)
        .select((training_registrations::status, count_star()))
        .load(conn)?;

    let mut stats = RegistrationStats::default();
    for (status, count) in rows {
        stats.total += count;
        match status.parse::<RegistrationStatus>() {
            Ok(RegistrationStatus::Registered) => stats.registered = count,
            Ok(RegistrationStatus::Attended) => stats.attended = count,
            Ok(RegistrationStatus::NoShow) => stats.no_show = count,
            Ok(RegistrationStatus::Completed) => stats.completed = count,
            Err(_) => {}
        }
    }
    Ok(stats)
}

/// Locks the session row while it is still in `expected`, serializing
/// registration, attendance and completion on the same session.
fn lock_session(
    conn: &mut PgConnection,
    session_id: Uuid,
    expected: TrainingStatus,
) -> AppResult<()> {
    let locked = training_sessions::table
        .find(session_id)
        .filter(training_sessions::status.eq(expected.as_str()))
        .select(training_sessions::id)
        .for_update()
        .load::<Uuid>(conn)?;
    ensure_status_unchanged(locked.len())
}

fn parse_datetime(body: &Value, key: &str) -> AppResult<Option<Option<NaiveDateTime>>> {
    match body.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(value) => serde_json::from_value::<DateTime<Utc>>(value.clone())
            .map(|parsed| Some(Some(parsed.naive_utc())))
            .map_err(|_| AppError::bad_request(format!("{key} must be an RFC 3339 timestamp"))),
    }
}

fn check_schedule(
    starts_at: NaiveDateTime,
    ends_at: Option<NaiveDateTime>,
    capacity: Option<i32>,
) -> AppResult<()> {
    if let Some(ends_at) = ends_at {
        if ends_at < starts_at {
            return Err(AppError::bad_request("ends_at must not be before starts_at"));
        }
    }
    if let Some(capacity) = capacity {
        if capacity <= 0 {
            return Err(AppError::bad_request("capacity must be greater than zero"));
        }
    }
    Ok(())
}

pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filters): Query<SessionFilters>,
    Query(page): Query<PageParams>,
) -> AppResult<ApiResponse<Vec<SessionResponse>>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    scope.check_company_filter(filters.company.as_deref())?;
    let status = filters
        .status
        .as_deref()
        .map(str::parse::<TrainingStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;
    let reservist_company = match &scope {
        AccessScope::Reservist(own_id) => own_company(&mut conn, *own_id)?,
        _ => None,
    };

    let build = || {
        let mut query = training_sessions::table.into_boxed();
        match &scope {
            AccessScope::All => {}
            AccessScope::Companies(companies) => {
                query = query.filter(
                    training_sessions::company
                        .is_null()
                        .or(training_sessions::company.eq_any(companies.clone())),
                );
            }
            AccessScope::Reservist(_) => match &reservist_company {
                Some(company) => {
                    query = query.filter(
                        training_sessions::company
                            .is_null()
                            .or(training_sessions::company.eq(company.clone())),
                    );
                }
                None => {
                    query = query.filter(training_sessions::company.is_null());
                }
            },
        }
        if let Some(company) = &filters.company {
            query = query.filter(training_sessions::company.eq(company.clone()));
        }
        if let Some(status) = status {
            query = query.filter(training_sessions::status.eq(status.as_str()));
        }
        query
    };

    let total: i64 = build().count().get_result(&mut conn)?;
    let rows: Vec<TrainingSession> = build()
        .order(training_sessions::starts_at.desc())
        .limit(page.per_page())
        .offset(page.offset())
        .load(&mut conn)?;

    let data = rows.into_iter().map(|session| to_response(session, None)).collect();
    Ok(ApiResponse::paginated(data, page.paginate(total)))
}

pub async fn create_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateSessionRequest>,
) -> AppResult<ApiResponse<SessionResponse>> {
    user.require_staff_or_above()?;
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    let company = payload
        .company
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned);
    let starts_at = payload.starts_at.naive_utc();
    let ends_at = payload.ends_at.map(|value| value.naive_utc());
    check_schedule(starts_at, ends_at, payload.capacity)?;

    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    if company.is_none() && !user.role.is_admin() {
        return Err(AppError::forbidden(
            "only administrators can create system-wide training",
        ));
    }
    if !scope.allows_company(company.as_deref()) {
        return Err(AppError::forbidden(
            "training company is outside your assignment",
        ));
    }
    if let Some(code) = &company {
        ensure_companies_exist(&mut conn, std::slice::from_ref(code))?;
    }

    let new_session = NewTrainingSession {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: payload.description.filter(|value| !value.trim().is_empty()),
        company,
        location: payload.location.filter(|value| !value.trim().is_empty()),
        starts_at,
        ends_at,
        capacity: payload.capacity,
        status: TrainingStatus::Scheduled.as_str().to_string(),
        created_by: user.account_id,
    };

    let session = conn.transaction::<_, AppError, _>(|conn| {
        diesel::insert_into(training_sessions::table)
            .values(&new_session)
            .execute(conn)?;
        audit::record(
            conn,
            Some(user.account_id),
            "training.created",
            audit::ENTITY_TRAINING,
            Some(new_session.id),
            json!({ "company": new_session.company, "starts_at": new_session.starts_at }),
        )?;
        Ok(training_sessions::table
            .find(new_session.id)
            .first::<TrainingSession>(conn)?)
    })?;

    Ok(ApiResponse::created(to_response(
        session,
        Some(RegistrationStats::default()),
    )))
}

pub async fn get_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> AppResult<ApiResponse<SessionResponse>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let session: TrainingSession = training_sessions::table.find(session_id).first(&mut conn)?;
    ensure_visible(&mut conn, &scope, &session)?;
    let stats = load_stats(&mut conn, session.id)?;
    Ok(ApiResponse::success(to_response(session, Some(stats))))
}

pub async fn update_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<ApiResponse<SessionResponse>> {
    let title = required_text(&body, "title").map_err(AppError::bad_request)?;
    let description = nullable_text(&body, "description").map_err(AppError::bad_request)?;
    let location = nullable_text(&body, "location").map_err(AppError::bad_request)?;
    let starts_at = match parse_datetime(&body, "starts_at")? {
        Some(None) => return Err(AppError::bad_request("starts_at cannot be null")),
        Some(Some(value)) => Some(value),
        None => None,
    };
    let ends_at = parse_datetime(&body, "ends_at")?;
    let capacity = match body.get("capacity") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(value) => {
            let parsed = value
                .as_i64()
                .and_then(|number| i32::try_from(number).ok())
                .ok_or_else(|| AppError::bad_request("capacity must be an integer"))?;
            Some(Some(parsed))
        }
    };

    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let session: TrainingSession = training_sessions::table.find(session_id).first(&mut conn)?;
    ensure_manageable(&user, &scope, &session)?;
    let current = session_status(&session)?;
    flow::ensure_editable(current)?;

    check_schedule(
        starts_at.unwrap_or(session.starts_at),
        ends_at.unwrap_or(session.ends_at),
        capacity.unwrap_or(session.capacity),
    )?;

    let rows = diesel::update(
        training_sessions::table
            .find(session.id)
            .filter(training_sessions::status.eq(current.as_str())),
    )
    .set(&UpdateSessionChangeset {
        title: title.as_deref(),
        description: description.as_ref().map(|value| value.as_deref()),
        location: location.as_ref().map(|value| value.as_deref()),
        starts_at,
        ends_at,
        capacity,
        updated_at: Utc::now().naive_utc(),
    })
    .execute(&mut conn)?;
    ensure_status_unchanged(rows)?;

    let session: TrainingSession = training_sessions::table.find(session.id).first(&mut conn)?;
    let stats = load_stats(&mut conn, session.id)?;
    Ok(ApiResponse::success(to_response(session, Some(stats))))
}

pub async fn change_session_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SessionStatusRequest>,
) -> AppResult<ApiResponse<SessionResponse>> {
    if payload.status == TrainingStatus::Completed {
        return Err(AppError::bad_request(
            "use the complete endpoint to finish a training session",
        ));
    }

    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let session: TrainingSession = training_sessions::table.find(session_id).first(&mut conn)?;
    ensure_manageable(&user, &scope, &session)?;
    let from = session_status(&session)?;
    flow::session_transition(from, payload.status)?;

    let updated = conn.transaction::<_, AppError, _>(|conn| {
        let rows = diesel::update(
            training_sessions::table
                .find(session.id)
                .filter(training_sessions::status.eq(from.as_str())),
        )
        .set((
            training_sessions::status.eq(payload.status.as_str()),
            training_sessions::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
        ensure_status_unchanged(rows)?;

        if payload.status == TrainingStatus::Cancelled {
            let registrants: Vec<Uuid> = training_registrations::table
                .filter(training_registrations::training_session_id.eq(session.id))
                .select(training_registrations::reservist_id)
                .load(conn)?;
            for reservist_id in registrants {
                notify::send(
                    conn,
                    reservist_id,
                    notify::KIND_TRAINING,
                    "Training cancelled",
                    format!("\"{}\" has been cancelled.", session.title),
                    Some(session.id),
                )?;
            }
        }

        audit::record(
            conn,
            Some(user.account_id),
            "training.status_changed",
            audit::ENTITY_TRAINING,
            Some(session.id),
            json!({ "from": from, "to": payload.status }),
        )?;
        Ok(training_sessions::table
            .find(session.id)
            .first::<TrainingSession>(conn)?)
    })?;

    let stats = load_stats(&mut conn, updated.id)?;
    Ok(ApiResponse::success(to_response(updated, Some(stats))))
}

pub async fn list_registrations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> AppResult<ApiResponse<Vec<RegistrationResponse>>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let session: TrainingSession = training_sessions::table.find(session_id).first(&mut conn)?;
    ensure_visible(&mut conn, &scope, &session)?;

    let mut query = training_registrations::table
        .filter(training_registrations::training_session_id.eq(session.id))
        .into_boxed();
    match &scope {
        AccessScope::All => {}
        AccessScope::Companies(companies) => {
            query = query.filter(
                training_registrations::reservist_id.eq_any(
                    reservist_details::table
                        .filter(reservist_details::company.eq_any(companies.clone()))
                        .select(reservist_details::account_id),
                ),
            );
        }
        AccessScope::Reservist(own_id) => {
            query = query.filter(training_registrations::reservist_id.eq(*own_id));
        }
    }
    let registrations: Vec<TrainingRegistration> = query
        .order(training_registrations::registered_at.asc())
        .load(&mut conn)?;

    let ids: Vec<Uuid> = registrations.iter().map(|r| r.reservist_id).collect();
    let names: HashMap<Uuid, Account> = accounts::table
        .filter(accounts::id.eq_any(&ids))
        .load::<Account>(&mut conn)?
        .into_iter()
        .map(|account| (account.id, account))
        .collect();

    let data = registrations
        .into_iter()
        .map(|registration| {
            let account = names.get(&registration.reservist_id);
            RegistrationResponse {
                id: registration.id,
                training_session_id: registration.training_session_id,
                reservist_id: registration.reservist_id,
                first_name: account.map(|a| a.first_name.clone()),
                last_name: account.map(|a| a.last_name.clone()),
                status: registration.status,
                completion_status: registration.completion_status,
                hours_completed: registration.hours_completed,
                registered_at: registration.registered_at,
                attended_at: registration.attended_at,
                completed_at: registration.completed_at,
            }
        })
        .collect();
    Ok(ApiResponse::success(data))
}

pub async fn register(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    payload: Option<Json<RegisterRequest>>,
) -> AppResult<ApiResponse<RegistrationResponse>> {
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;

    let reservist_id = match (&scope, payload.reservist_id) {
        (AccessScope::Reservist(own_id), None) => *own_id,
        (_, Some(requested)) => requested,
        (_, None) => return Err(AppError::bad_request("reservist_id is required")),
    };
    let (account, detail) = scope.load_reservist(&mut conn, reservist_id)?;

    let session: TrainingSession = training_sessions::table.find(session_id).first(&mut conn)?;
    ensure_visible(&mut conn, &scope, &session)?;
    if let Some(company) = session.company.as_deref() {
        if detail.as_ref().and_then(|d| d.company.as_deref()) != Some(company) {
            return Err(AppError::bad_request(format!(
                "training is limited to company {company}"
            )));
        }
    }
    if session_status(&session)? != TrainingStatus::Scheduled {
        return Err(AppError::conflict(
            "registration is only open while the session is scheduled",
        ));
    }

    let registration = conn.transaction::<_, AppError, _>(|conn| {
        lock_session(conn, session.id, TrainingStatus::Scheduled)?;
        if let Some(capacity) = session.capacity {
            let taken: i64 = training_registrations::table
                .filter(training_registrations::training_session_id.eq(session.id))
                .select(count_star())
                .first(conn)?;
            if taken >= i64::from(capacity) {
                return Err(AppError::conflict("training session is full"));
            }
        }

        let new_registration = NewTrainingRegistration {
            id: Uuid::new_v4(),
            training_session_id: session.id,
            reservist_id: account.id,
            status: RegistrationStatus::Registered.as_str().to_string(),
        };
        match diesel::insert_into(training_registrations::table)
            .values(&new_registration)
            .execute(conn)
        {
            Ok(_) => {}
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => {
                return Err(AppError::conflict(
                    "reservist is already registered for this training",
                ));
            }
            Err(err) => return Err(AppError::from(err)),
        }

        audit::record(
            conn,
            Some(user.account_id),
            "training.registered",
            audit::ENTITY_TRAINING,
            Some(session.id),
            json!({ "reservist_id": account.id }),
        )?;
        Ok(training_registrations::table
            .find(new_registration.id)
            .first::<TrainingRegistration>(conn)?)
    })?;

    Ok(ApiResponse::created(RegistrationResponse {
        id: registration.id,
        training_session_id: registration.training_session_id,
        reservist_id: registration.reservist_id,
        first_name: Some(account.first_name),
        last_name: Some(account.last_name),
        status: registration.status,
        completion_status: registration.completion_status,
        hours_completed: registration.hours_completed,
        registered_at: registration.registered_at,
        attended_at: registration.attended_at,
        completed_at: registration.completed_at,
    }))
}

/// Listed registrants become `attended`; every other registrant still in
/// play becomes `no_show`.
pub async fn mark_attendance(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<AttendanceRequest>,
) -> AppResult<ApiResponse<AttendanceResponse>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let session: TrainingSession = training_sessions::table.find(session_id).first(&mut conn)?;
    ensure_manageable(&user, &scope, &session)?;
    let current = session_status(&session)?;
    flow::ensure_accepts_attendance(current)?;

    let attendees: HashSet<Uuid> = payload.reservist_ids.iter().copied().collect();
    let next_status = if current == TrainingStatus::Scheduled {
        TrainingStatus::Ongoing
    } else {
        current
    };

    let plan = conn.transaction::<_, AppError, _>(|conn| {
        lock_session(conn, session.id, current)?;
        let registrations: Vec<(Uuid, RegistrationStatus)> = training_registrations::table
            .filter(training_registrations::training_session_id.eq(session.id))
            .select((
                training_registrations::reservist_id,
                training_registrations::status,
            ))
            .load::<(Uuid, String)>(conn)?
            .into_iter()
            .map(|(reservist_id, status)| {
                status
                    .parse::<RegistrationStatus>()
                    .map(|status| (reservist_id, status))
                    .map_err(AppError::internal)
            })
            .collect::<AppResult<_>>()?;

        let plan = flow::plan_attendance(&registrations, &attendees);
        if !plan.unknown.is_empty() {
            let listed: Vec<String> = plan.unknown.iter().map(Uuid::to_string).collect();
            return Err(AppError::bad_request(format!(
                "not registered for this training: {}",
                listed.join(", ")
            )));
        }

        let now = Utc::now().naive_utc();
        if !plan.attended.is_empty() {
            diesel::update(
                training_registrations::table
                    .filter(training_registrations::training_session_id.eq(session.id))
                    .filter(training_registrations::reservist_id.eq_any(&plan.attended)),
            )
            .set((
                training_registrations::status.eq(RegistrationStatus::Attended.as_str()),
                training_registrations::attended_at.eq(Some(now)),
            ))
            .execute(conn)?;
        }
        if !plan.no_show.is_empty() {
            diesel::update(
                training_registrations::table
                    .filter(training_registrations::training_session_id.eq(session.id))
                    .filter(training_registrations::reservist_id.eq_any(&plan.no_show)),
            )
            .set((
                training_registrations::status.eq(RegistrationStatus::NoShow.as_str()),
                training_registrations::attended_at.eq(None::<NaiveDateTime>),
            ))
            .execute(conn)?;
        }
        if next_status != current {
            diesel::update(training_sessions::table.find(session.id))
                .set((
                    training_sessions::status.eq(next_status.as_str()),
                    training_sessions::updated_at.eq(now),
                ))
                .execute(conn)?;
        }
        audit::record(
            conn,
            Some(user.account_id),
            "training.attendance_marked",
            audit::ENTITY_TRAINING,
            Some(session.id),
            json!({ "attended": plan.attended, "no_show": plan.no_show }),
        )?;
        Ok(plan)
    })?;

    tracing::info!(
        session_id = %session.id,
        attended = plan.attended.len(),
        no_show = plan.no_show.len(),
        "attendance recorded"
    );

    Ok(ApiResponse::success(AttendanceResponse {
        attended: plan.attended,
        no_show: plan.no_show,
        session_status: next_status.as_str().to_string(),
    }))
}

/// Completes every attendee, writes their training hours once per
/// (reservist, session) and closes the session.
pub async fn complete_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> AppResult<ApiResponse<CompletionResponse>> {
    let default_hours = flow::validate_hours(payload.hours_completed)?;
    for result in &payload.results {
        if let Some(hours) = result.hours_completed {
            flow::validate_hours(hours)?;
        }
    }

    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let session: TrainingSession = training_sessions::table.find(session_id).first(&mut conn)?;
    ensure_manageable(&user, &scope, &session)?;
    let from = session_status(&session)?;
    flow::session_transition(from, TrainingStatus::Completed)?;

    let results: HashMap<Uuid, &CompletionResult> = payload
        .results
        .iter()
        .map(|result| (result.reservist_id, result))
        .collect();

    let (completed, hours_awarded) = conn.transaction::<_, AppError, _>(|conn| {
        lock_session(conn, session.id, from)?;
        let attendees: Vec<Uuid> = training_registrations::table
            .filter(training_registrations::training_session_id.eq(session.id))
            .filter(training_registrations::status.eq(RegistrationStatus::Attended.as_str()))
            .select(training_registrations::reservist_id)
            .load(conn)?;
        if let Some(stray) = results.keys().find(|id| !attendees.contains(id)) {
            return Err(AppError::bad_request(format!(
                "reservist {stray} did not attend this training"
            )));
        }

        let now = Utc::now().naive_utc();
        let mut hours_awarded = 0usize;

        for reservist_id in &attendees {
            let result = results.get(reservist_id);
            let completion = result
                .and_then(|r| r.completion_status)
                .unwrap_or(CompletionStatus::Passed);
            let hours = result
                .and_then(|r| r.hours_completed)
                .unwrap_or(default_hours);

            diesel::update(
                training_registrations::table
                    .filter(training_registrations::training_session_id.eq(session.id))
                    .filter(training_registrations::reservist_id.eq(*reservist_id)),
            )
            .set((
                training_registrations::status.eq(RegistrationStatus::Completed.as_str()),
                training_registrations::completion_status.eq(Some(completion.as_str())),
                training_registrations::hours_completed.eq(Some(hours)),
                training_registrations::completed_at.eq(Some(now)),
            ))
            .execute(conn)?;

            hours_awarded += diesel::insert_into(training_hours::table)
                .values(&NewTrainingHours {
                    id: Uuid::new_v4(),
                    reservist_id: *reservist_id,
                    training_session_id: session.id,
                    hours,
                    completion_status: completion.as_str().to_string(),
                    awarded_by: Some(user.account_id),
                })
                .on_conflict((
                    training_hours::reservist_id,
                    training_hours::training_session_id,
                ))
                .do_nothing()
                .execute(conn)?;

            let (title, message) = flow::completion_text(&session.title, hours, completion);
            notify::send(
                conn,
                *reservist_id,
                notify::KIND_TRAINING,
                title,
                message,
                Some(session.id),
            )?;
        }

        diesel::update(training_sessions::table.find(session.id))
            .set((
                training_sessions::status.eq(TrainingStatus::Completed.as_str()),
                training_sessions::updated_at.eq(now),
            ))
            .execute(conn)?;

        audit::record(
            conn,
            Some(user.account_id),
            "training.completed",
            audit::ENTITY_TRAINING,
            Some(session.id),
            json!({
                "attendees": attendees.len(),
                "hours_awarded": hours_awarded,
                "default_hours": default_hours,
            }),
        )?;
        Ok((attendees.len(), hours_awarded))
    })?;

    tracing::info!(session_id = %session.id, completed, hours_awarded, "training completed");

    let session: TrainingSession = training_sessions::table.find(session.id).first(&mut conn)?;
    let stats = load_stats(&mut conn, session.id)?;
    Ok(ApiResponse::success(CompletionResponse {
        session: to_response(session, Some(stats)),
        completed,
        hours_awarded,
    }))
}

pub async fn list_training_hours(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filters): Query<HoursFilters>,
    Query(page): Query<PageParams>,
) -> AppResult<ApiResponse<Vec<TrainingHoursResponse>>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    if let Some(reservist_id) = filters.reservist_id {
        scope.load_reservist(&mut conn, reservist_id)?;
    }

    let build = || {
        let mut query = training_hours::table
            .inner_join(training_sessions::table)
            .into_boxed();
        match &scope {
            AccessScope::All => {}
            AccessScope::Companies(companies) => {
                query = query.filter(
                    training_hours::reservist_id.eq_any(
                        reservist_details::table
                            .filter(reservist_details::company.eq_any(companies.clone()))
                            .select(reservist_details::account_id),
                    ),
                );
            }
            AccessScope::Reservist(own_id) => {
                query = query.filter(training_hours::reservist_id.eq(*own_id));
            }
        }
        if let Some(reservist_id) = filters.reservist_id {
            query = query.filter(training_hours::reservist_id.eq(reservist_id));
        }
        query
    };

    let total: i64 = build().count().get_result(&mut conn)?;
    let rows: Vec<(TrainingHours, String)> = build()
        .select((training_hours::all_columns, training_sessions::title))
        .order(training_hours::awarded_at.desc())
        .limit(page.per_page())
        .offset(page.offset())
        .load(&mut conn)?;

    let data = rows
        .into_iter()
        .map(|(record, session_title)| TrainingHoursResponse {
            id: record.id,
            reservist_id: record.reservist_id,
            training_session_id: record.training_session_id,
            session_title,
            hours: record.hours,
            completion_status: record.completion_status,
            awarded_by: record.awarded_by,
            awarded_at: record.awarded_at,
        })
        .collect();
    Ok(ApiResponse::paginated(data, page.paginate(total)))
}
