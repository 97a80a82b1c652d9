//! Cookie-to-session resolution and session confirmation.
//!
//! Each app gets its own cookie, `<base>/<app_slug>`, so one browser can hold
//! independent sessions for independent apps.

use crate::error::{AppError, Result};
use crate::models::session::{Session, SessionStatus};
use crate::repositories::{AppRepository, SessionRepository, Store, UserRepository};
use crate::request::InboundRequest;
use crate::services::session as session_service;

/// The session cookie name for `app_slug`.
pub fn compute_session_cookie_name(base_cookie_name: &str, app_slug: &str) -> String {
    format!("{}/{}", base_cookie_name, app_slug)
}

/// Reads the app's session cookie from the request.
pub fn get_session_id_from_request<R: InboundRequest + ?Sized>(
    request: &R,
    base_cookie_name: &str,
    app_slug: &str,
) -> Option<String> {
    request.cookie(&compute_session_cookie_name(base_cookie_name, app_slug))
}

/// Resolves the app's session cookie to a stored session.
pub async fn retrieve_session_from_request<S, R>(
    store: &S,
    request: &R,
    base_cookie_name: &str,
    app_slug: &str,
) -> Result<Option<Session>>
where
    S: SessionRepository + ?Sized,
    R: InboundRequest + ?Sized,
{
    let session_id = get_session_id_from_request(request, base_cookie_name, app_slug);
    Ok(session_service::retrieve_session(store, session_id.as_deref()).await?)
}

/// Like [`retrieve_session_from_request`], but drops sessions that belong to
/// another app than `app_slug`.
pub async fn retrieve_app_session_from_request<S, R>(
    store: &S,
    request: &R,
    base_cookie_name: &str,
    app_slug: &str,
) -> Result<Option<Session>>
where
    S: SessionRepository + AppRepository + ?Sized,
    R: InboundRequest + ?Sized,
{
    let Some(session) =
        retrieve_session_from_request(store, request, base_cookie_name, app_slug).await?
    else {
        return Ok(None);
    };
    let Some(app) = store.find_app_by_slug(app_slug).await? else {
        return Ok(None);
    };
    if session.app_id != app.id {
        tracing::warn!("⚠️ Session cookie for {} names a session of another app", app_slug);
        return Ok(None);
    }
    Ok(Some(session))
}

/// Requires a VALIDATED session of `app_slug` whose user subscribes to it.
///
/// Fails 401 `invalid_session` when there is none, 403
/// `user_does_not_subscribes` when the user lost access to the app.
pub async fn confirm_session<S, R>(
    store: &S,
    request: &R,
    base_cookie_name: &str,
    app_slug: &str,
) -> Result<Session>
where
    S: Store + ?Sized,
    R: InboundRequest + ?Sized,
{
    let session = retrieve_app_session_from_request(store, request, base_cookie_name, app_slug)
        .await?
        .filter(|session| session.status == SessionStatus::Validated)
        .ok_or(AppError::Unauthorized {
            code: "invalid_session",
        })?;

    let subscribes = match session.user_id {
        Some(user_id) => store.user_subscribes_to_app(user_id, session.app_id).await?,
        None => false,
    };
    if !subscribes {
        return Err(AppError::Forbidden {
            code: "user_does_not_subscribes",
        });
    }

    Ok(session)
}

/// Whether the session's user currently subscribes to the session's app.
pub async fn session_user_subscribes<S>(store: &S, session: &Session) -> Result<bool>
where
    S: UserRepository + ?Sized,
{
    match session.user_id {
        Some(user_id) => Ok(store.user_subscribes_to_app(user_id, session.app_id).await?),
        None => Ok(false),
    }
}
