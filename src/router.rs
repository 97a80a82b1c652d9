use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::header,
    routing::{get, post},
};
use tower_cookies::CookieManagerLayer;
use tower_http::{
    sensitive_headers::SetSensitiveHeadersLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{handlers, middleware_layer::scope::limit_endpoint_to_app_scope, state::AppState};

/// Largest accepted request body. Only the signer posts anything.
const BODY_LIMIT: usize = 64 * 1024;

/// Builds the HTTP API under `config.api_base`.
pub fn router(state: AppState) -> Router {
    let base = state.config.api_base.clone();
    let admin_slug = state.config.admin_app_slug.clone();

    let auth_routes = Router::new()
        .route(
            &format!("{base}/auth/create/{{app_slug}}"),
            get(handlers::auth::create_session).options(handlers::auth::preflight),
        )
        .route(
            &format!("{base}/auth/track/{{app_slug}}"),
            get(handlers::auth::track_session).options(handlers::auth::preflight),
        )
        .route(
            &format!("{base}/auth/logout/{{app_slug}}"),
            post(handlers::auth::logout).options(handlers::auth::preflight),
        )
        .route(
            &format!("{base}/auth/verify-session/{{session_id}}"),
            get(handlers::auth::verify_session),
        )
        .route(
            &format!("{base}/auth/validate/{{session_id}}"),
            post(handlers::auth::validate_session).get(handlers::auth::validate_redirect),
        )
        .route(
            &format!("{base}/sigil-login.js"),
            get(handlers::client::login_script),
        );

    let admin_routes = Router::new()
        .route(&format!("{base}/apps/"), get(handlers::admin::list_apps))
        .route(&format!("{base}/users/"), get(handlers::admin::list_users));
    let admin_routes = limit_endpoint_to_app_scope(
        admin_routes,
        state.clone(),
        &format!("{base}/apps/"),
        &admin_slug,
    );
    let admin_routes = limit_endpoint_to_app_scope(
        admin_routes,
        state.clone(),
        &format!("{base}/users/"),
        &admin_slug,
    );

    traced(Router::new().merge(auth_routes).merge(admin_routes))
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// Request tracing with headers, session cookies and credentials redacted.
fn traced<S>(routes: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    routes
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        // Outside the trace layer so spans already see the redaction.
        .layer(SetSensitiveHeadersLayer::new([
            header::COOKIE,
            header::SET_COOKIE,
            header::AUTHORIZATION,
        ]))
}
