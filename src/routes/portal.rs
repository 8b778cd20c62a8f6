//! Role-to-portal routing for the browser-facing paths.
//!
//! `/admin`, `/staff` and `/reservist` each belong to one set of roles. The
//! middleware sends anonymous visitors to `/login?next=...` and bounces signed
//! in accounts that wander into another portal back to their own. An expired
//! access cookie is renewed from the refresh cookie before deciding.

use axum::{
    extract::{FromRequestParts, OriginalUri, Request, State},
    http::{header::SET_COOKIE, request::Parts, HeaderMap},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use axum_extra::{headers::Cookie, TypedHeader};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::{session, AuthenticatedUser, REFRESH_COOKIE_NAME},
    response::ApiResponse,
    state::AppState,
    workflow::accounts::Role,
};

pub const LOGIN_PATH: &str = "/login";
const PORTAL_PREFIXES: &[&str] = &["/admin", "/staff", "/reservist"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalDecision {
    Allow,
    Redirect(String),
}

fn portal_prefix(path: &str) -> Option<&'static str> {
    PORTAL_PREFIXES.iter().copied().find(|prefix| {
        path == *prefix
            || path
                .strip_prefix(prefix)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    })
}

/// Where a request for `target` (path plus optional query) should go.
pub fn decide(target: &str, role: Option<Role>) -> PortalDecision {
    let path = target.split('?').next().unwrap_or(target);

    if path == LOGIN_PATH {
        return match role {
            Some(role) => PortalDecision::Redirect(role.home_path().to_string()),
            None => PortalDecision::Allow,
        };
    }

    let Some(prefix) = portal_prefix(path) else {
        return PortalDecision::Allow;
    };

    match role {
        None => PortalDecision::Redirect(format!(
            "{LOGIN_PATH}?next={}",
            utf8_percent_encode(target, NON_ALPHANUMERIC)
        )),
        Some(role) if role.home_path() != prefix => {
            PortalDecision::Redirect(role.home_path().to_string())
        }
        Some(_) => PortalDecision::Allow,
    }
}

/// Rotates the refresh cookie when the access token is missing or no longer
/// accepted. The refreshed identity is left in the request extensions for the
/// handler; the returned headers carry the new cookies.
fn refresh_session(state: &AppState, parts: &mut Parts, cookies: &Cookie) -> Option<HeaderMap> {
    let presented = cookies.get(REFRESH_COOKIE_NAME)?;
    let issued = state
        .db()
        .and_then(|mut conn| session::rotate(state, &mut conn, presented));
    match issued {
        Ok(issued) => {
            tracing::debug!(account_id = %issued.account.id, "portal session refreshed");
            parts.extensions.insert(issued.user());
            Some(issued.cookies(state))
        }
        Err(err) => {
            tracing::debug!(error = %err, "portal session refresh refused");
            None
        }
    }
}

async fn redirect_by_role(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let target = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let (mut parts, body) = request.into_parts();
    let mut refreshed = None;
    let role = match AuthenticatedUser::from_request_parts(&mut parts, &state).await {
        Ok(user) => Some(user.role),
        Err(_) => {
            let cookies = TypedHeader::<Cookie>::from_request_parts(&mut parts, &state)
                .await
                .ok();
            refreshed = cookies
                .and_then(|TypedHeader(cookies)| refresh_session(&state, &mut parts, &cookies));
            parts
                .extensions
                .get::<AuthenticatedUser>()
                .map(|user| user.role)
        }
    };
    let request = Request::from_parts(parts, body);

    let mut response = match decide(&target, role) {
        PortalDecision::Allow => next.run(request).await,
        PortalDecision::Redirect(location) => {
            tracing::debug!(%target, %location, "portal redirect");
            Redirect::to(&location).into_response()
        }
    };
    if let Some(cookies) = refreshed {
        for cookie in cookies.get_all(SET_COOKIE) {
            response.headers_mut().append(SET_COOKIE, cookie.clone());
        }
    }
    response
}

#[derive(Serialize)]
pub struct PortalAccount {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

#[derive(Serialize)]
pub struct PortalLanding {
    pub portal: &'static str,
    pub path: String,
    pub account: PortalAccount,
}

#[derive(Serialize)]
pub struct LoginLanding {
    pub portal: &'static str,
}

async fn landing(
    user: AuthenticatedUser,
    OriginalUri(uri): OriginalUri,
) -> ApiResponse<PortalLanding> {
    ApiResponse::success(PortalLanding {
        portal: user.role.home_path().trim_start_matches('/'),
        path: uri.path().to_string(),
        account: PortalAccount {
            id: user.account_id,
            email: user.email,
            role: user.role,
        },
    })
}

async fn login_landing() -> ApiResponse<LoginLanding> {
    ApiResponse::success(LoginLanding { portal: "login" })
}

pub fn routes(state: AppState) -> Router<AppState> {
    let mut router = Router::new().route(LOGIN_PATH, get(login_landing));
    for prefix in PORTAL_PREFIXES {
        router = router
            .route(prefix, get(landing))
            .route(&format!("{prefix}/*rest"), get(landing));
    }
    router.route_layer(middleware::from_fn_with_state(state, redirect_by_role))
}
