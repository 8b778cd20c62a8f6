use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod administrators;
pub mod analytics;
pub mod audit_logs;
pub mod auth;
pub mod companies;
pub mod documents;
pub mod health;
pub mod notifications;
pub mod portal;
pub mod reservists;
pub mod rids;
pub mod staff;
pub mod training;

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(err) => {
                        tracing::warn!(origin = %value, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);
    let body_limit = state.config.max_upload_bytes;

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let reservist_routes = Router::new()
        .route(
            "/",
            get(reservists::list_reservists).post(reservists::create_reservist),
        )
        .route(
            "/:id",
            get(reservists::get_reservist).patch(reservists::update_reservist),
        )
        .route("/:id/status", patch(reservists::change_reservist_status));

    let staff_routes = Router::new()
        .route("/", get(staff::list_staff).post(staff::create_staff))
        .route("/:id", get(staff::get_staff).patch(staff::update_staff))
        .route("/:id/status", patch(staff::change_staff_status));

    let administrator_routes = Router::new()
        .route(
            "/",
            get(administrators::list_administrators).post(administrators::create_administrator),
        )
        .route(
            "/:id/status",
            patch(administrators::change_administrator_status),
        );

    let company_routes = Router::new()
        .route(
            "/",
            get(companies::list_companies).post(companies::create_company),
        )
        .route(
            "/:code",
            patch(companies::update_company).delete(companies::delete_company),
        );

    let document_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route(
            "/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/:id/download", get(documents::download_document))
        .route("/:id/validate", post(documents::validate_document))
        .route("/:id/status", patch(documents::change_document_status));

    let rids_routes = Router::new()
        .route("/", get(rids::list_rids).post(rids::create_rids))
        .route(
            "/:id",
            get(rids::get_rids)
                .patch(rids::update_rids)
                .delete(rids::delete_rids),
        )
        .route("/:id/submit", post(rids::submit_rids))
        .route("/:id/approve", post(rids::approve_rids))
        .route("/:id/reject", post(rids::reject_rids))
        .route("/:id/status", patch(rids::change_rids_status))
        .route(
            "/:id/sections/:section",
            get(rids::list_section_entries).post(rids::add_section_entry),
        )
        .route(
            "/:id/sections/:section/:entry_id",
            patch(rids::update_section_entry).delete(rids::delete_section_entry),
        );

    let training_routes = Router::new()
        .route("/", get(training::list_sessions).post(training::create_session))
        .route("/hours", get(training::list_training_hours))
        .route(
            "/:id",
            get(training::get_session).patch(training::update_session),
        )
        .route("/:id/status", patch(training::change_session_status))
        .route(
            "/:id/registrations",
            get(training::list_registrations).post(training::register),
        )
        .route("/:id/attendance", post(training::mark_attendance))
        .route("/:id/complete", post(training::complete_session));

    let notification_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/read-all", post(notifications::mark_all_read))
        .route("/:id/read", post(notifications::mark_read));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/reservists", reservist_routes)
        .nest("/api/staff", staff_routes)
        .nest("/api/administrators", administrator_routes)
        .nest("/api/companies", company_routes)
        .nest("/api/documents", document_routes)
        .nest("/api/rids", rids_routes)
        .nest("/api/training", training_routes)
        .nest("/api/notifications", notification_routes)
        .route("/api/analytics/overview", get(analytics::overview))
        .route("/api/audit-logs", get(audit_logs::list_audit_logs))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .merge(portal::routes(state.clone()))
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
