use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{Next, from_fn_with_state},
    response::{IntoResponse, Response},
};

use crate::{
    services::{
        access,
        origin::{self, Admission},
    },
    state::AppState,
};

/// The app whose subscribers may reach every path under `prefix`.
#[derive(Clone)]
pub struct AppScope {
    state: AppState,
    prefix: Arc<str>,
    app_slug: Arc<str>,
}

/// Gates every route of `router` whose path starts with `prefix`.
///
/// Such requests need an allowed origin and a VALIDATED session of
/// `app_slug` whose user subscribes to it. The session is handed to the
/// handler as an `Extension<Session>`.
///
/// # Arguments
///
/// * `router` - The routes to guard; other paths pass through.
/// * `state` - The application state.
/// * `prefix` - Full path prefix, API base included.
/// * `app_slug` - The app scoping these endpoints.
pub fn limit_endpoint_to_app_scope<S>(
    router: Router<S>,
    state: AppState,
    prefix: &str,
    app_slug: &str,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let scope = AppScope {
        state,
        prefix: Arc::from(prefix),
        app_slug: Arc::from(app_slug),
    };
    router.layer(from_fn_with_state(scope, require_app_scope))
}

/// The guard installed by [`limit_endpoint_to_app_scope`].
pub async fn require_app_scope(
    State(scope): State<AppScope>,
    request: Request,
    next: Next,
) -> Response {
    if !request.uri().path().starts_with(&*scope.prefix) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let store = scope.state.store.as_ref();

    let cors = match origin::check_request_origin_for_app_and_validate_cors(
        store,
        &parts,
        &scope.app_slug,
    )
    .await
    {
        Ok(Admission::Proceed(headers)) => headers,
        Ok(Admission::Preflight(headers)) => return (StatusCode::OK, headers).into_response(),
        Err(e) => return e.into_response(),
    };

    let session = match access::confirm_session(
        store,
        &parts,
        &scope.state.config.session_cookie_name,
        &scope.app_slug,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("🚫 {} denied outside the {} scope", parts.uri.path(), scope.app_slug);
            return (cors, e).into_response();
        }
    };

    tracing::debug!("✅ Scope {} confirmed for user {:?}", scope.app_slug, session.user_id);
    parts.extensions.insert(session);

    let mut response = next.run(Request::from_parts(parts, body)).await;
    response.headers_mut().extend(cors);
    response
}
