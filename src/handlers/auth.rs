use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tower_cookies::Cookies;
use tower_cookies::cookie::{
    Cookie, CookieBuilder, SameSite,
    time::{Duration, OffsetDateTime},
};

use crate::{
    crypto::signature::verify_signature,
    error::{AppError, Result},
    models::{
        app::App,
        session::{Session, SessionStatus},
        user::User,
    },
    services::{
        access,
        origin::{self, Admission},
        qr,
        session as session_service,
    },
    state::AppState,
    validation::auth::ValidationPayload,
};

/// Substrings identifying a browser `User-Agent`.
const BROWSER_AGENTS: [&str; 7] = [
    "mozilla", "chrome", "safari", "firefox", "edge", "msie", "trident",
];

/// The session as shown to the browser.
#[derive(Serialize, Debug)]
pub struct SessionView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: SessionStatus,
}

/// Where and how the signer should validate a PENDING session.
#[derive(Serialize, Debug)]
pub struct LoginView {
    pub url: String,
    /// PNG QR code of `url`, as a `data:` URL.
    pub qr: String,
}

/// Body of the create and track endpoints.
#[derive(Serialize, Debug)]
pub struct SessionResponse {
    pub session: SessionView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginView>,
}

/// Body of the server-to-server verification endpoint.
#[derive(Serialize, Debug)]
pub struct VerifyResponse {
    pub session: Session,
    pub app: App,
    pub user: Option<User>,
    pub subscribes: bool,
}

#[derive(Serialize, Debug)]
pub struct LogoutResponse {
    pub status: &'static str,
}

#[derive(Serialize, Debug)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Runs the origin and CORS step for `app_slug`.
///
/// `Err` carries a finished response: either the preflight answer or the
/// rejection.
async fn admit(
    state: &AppState,
    parts: &Parts,
    app_slug: &str,
) -> std::result::Result<HeaderMap, Response> {
    match origin::check_request_origin_for_app_and_validate_cors(
        state.store.as_ref(),
        parts,
        app_slug,
    )
    .await
    {
        Ok(Admission::Proceed(headers)) => Ok(headers),
        Ok(Admission::Preflight(headers)) => Err((StatusCode::OK, headers).into_response()),
        Err(e) => Err(e.into_response()),
    }
}

/// The per-app session cookie, without an expiry.
///
/// Setting and removing share these attributes, otherwise browsers keep the
/// partitioned original next to the removal.
fn session_cookie_builder(state: &AppState, app_slug: &str, value: String) -> CookieBuilder<'static> {
    let name = access::compute_session_cookie_name(&state.config.session_cookie_name, app_slug);
    Cookie::build((name, value))
        .path("/")
        .secure(true)
        .same_site(SameSite::None)
        .partitioned(true)
        .http_only(false)
}

fn session_cookie(state: &AppState, app_slug: &str, session_id: &str) -> Cookie<'static> {
    session_cookie_builder(state, app_slug, session_id.to_string())
        .expires(
            OffsetDateTime::now_utc() + Duration::seconds(state.config.session_cookie_lifetime_secs),
        )
        .build()
}

/// Answers CORS preflights on the per-app auth routes.
pub async fn preflight(
    State(state): State<AppState>,
    Path(app_slug): Path<String>,
    request: Request,
) -> Response {
    let (parts, _) = request.into_parts();
    match admit(&state, &parts, &app_slug).await {
        Ok(headers) => (StatusCode::OK, headers).into_response(),
        Err(response) => response,
    }
}

/// Returns the browser's login state for an app, starting a login if needed.
///
/// The session cookie is (re)issued on every call.
pub async fn create_session(
    State(state): State<AppState>,
    Path(app_slug): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    cookies: Cookies,
    request: Request,
) -> Response {
    let (parts, _) = request.into_parts();
    let cors = match admit(&state, &parts, &app_slug).await {
        Ok(headers) => headers,
        Err(response) => return response,
    };

    let force_recreation = params.contains_key("force-recreation");
    let result = create(&state, &app_slug, force_recreation, &cookies, &parts).await;
    (cors, result).into_response()
}

async fn create(
    state: &AppState,
    app_slug: &str,
    force_recreation: bool,
    cookies: &Cookies,
    parts: &Parts,
) -> Result<Json<SessionResponse>> {
    let store = state.store.as_ref();
    let app = store
        .find_app_by_slug(app_slug)
        .await?
        .ok_or(AppError::NotFound {
            code: "app_not_found",
        })?;

    let current =
        access::get_session_id_from_request(parts, &state.config.session_cookie_name, app_slug);
    let mut session =
        session_service::retrieve_or_create_session(store, app.id, current.as_deref()).await?;

    // PENDING sessions are kept so the QR code stays stable across polls.
    if force_recreation && session.status == SessionStatus::Validated {
        tracing::info!("🔄 Forced recreation of a validated session for {}", app_slug);
        session = session_service::create_session(store, app.id).await?;
    }

    cookies.add(session_cookie(state, app_slug, &session.id));

    if session.status == SessionStatus::Validated {
        let session = session_service::touch_session(store, &session).await?;
        let user = match session.user_id {
            Some(user_id) => store.find_user_by_id(user_id).await?,
            None => None,
        };
        return Ok(Json(SessionResponse {
            session: SessionView {
                id: Some(session.id),
                status: session.status,
            },
            user,
            login: None,
        }));
    }

    let url = state.config.validation_url(&session.id);
    let qr = qr::generate_qr_data_url(&url)?;
    tracing::debug!("🔑 Login pending for {}", app_slug);

    Ok(Json(SessionResponse {
        session: SessionView {
            id: Some(session.id),
            status: session.status,
        },
        user: None,
        login: Some(LoginView { url, qr }),
    }))
}

/// Polled by the browser while the signer validates the session.
pub async fn track_session(
    State(state): State<AppState>,
    Path(app_slug): Path<String>,
    request: Request,
) -> Response {
    let (parts, _) = request.into_parts();
    let cors = match admit(&state, &parts, &app_slug).await {
        Ok(headers) => headers,
        Err(response) => return response,
    };

    (cors, track(&state, &app_slug, &parts).await).into_response()
}

async fn track(state: &AppState, app_slug: &str, parts: &Parts) -> Result<Json<SessionResponse>> {
    let store = state.store.as_ref();
    let session = access::retrieve_app_session_from_request(
        store,
        parts,
        &state.config.session_cookie_name,
        app_slug,
    )
    .await?;

    let session = match session {
        Some(session) if session.status == SessionStatus::Validated => session,
        other => {
            return Ok(Json(SessionResponse {
                session: SessionView {
                    id: None,
                    status: other.map_or(SessionStatus::Expired, |s| s.status),
                },
                user: None,
                login: None,
            }));
        }
    };

    if !access::session_user_subscribes(store, &session).await? {
        return Err(AppError::Forbidden {
            code: "user_does_not_subscribes",
        });
    }

    let user = match session.user_id {
        Some(user_id) => store.find_user_by_id(user_id).await?,
        None => None,
    };

    Ok(Json(SessionResponse {
        session: SessionView {
            id: Some(session.id),
            status: session.status,
        },
        user,
        login: None,
    }))
}

fn is_browser(user_agent: &str) -> bool {
    let user_agent = user_agent.to_ascii_lowercase();
    BROWSER_AGENTS.iter().any(|agent| user_agent.contains(agent))
}

/// Lets an app's backend check a session id it was handed.
///
/// Refused to browsers: the raw session record is not meant for them.
pub async fn verify_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<VerifyResponse>> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if is_browser(user_agent) {
        return Err(AppError::MalformedInput {
            code: "browsers_denied",
        });
    }

    let store = state.store.as_ref();
    let session = store
        .find_session(&session_id)
        .await?
        .ok_or(AppError::NotFound {
            code: "session_not_found",
        })?;

    let app = store.find_app_by_id(session.app_id).await?.ok_or_else(|| {
        AppError::infra(
            "invalid_session",
            "SessionError",
            anyhow::anyhow!("session names missing app {}", session.app_id),
        )
    })?;

    let user = match session.user_id {
        Some(user_id) => Some(store.find_user_by_id(user_id).await?.ok_or_else(|| {
            AppError::infra(
                "invalid_session",
                "SessionError",
                anyhow::anyhow!("session names missing user {}", user_id),
            )
        })?),
        None => None,
    };

    let subscribes = access::session_user_subscribes(store, &session).await?;
    tracing::debug!("🔎 Session verified for app {}", app.slug);

    Ok(Json(VerifyResponse {
        session,
        app,
        user,
        subscribes,
    }))
}

/// Expires the browser's session for an app and drops its cookie.
pub async fn logout(
    State(state): State<AppState>,
    Path(app_slug): Path<String>,
    cookies: Cookies,
    request: Request,
) -> Response {
    let (parts, _) = request.into_parts();
    let cors = match admit(&state, &parts, &app_slug).await {
        Ok(headers) => headers,
        Err(response) => return response,
    };

    let result = access::retrieve_app_session_from_request(
        state.store.as_ref(),
        &parts,
        &state.config.session_cookie_name,
        &app_slug,
    )
    .await;

    let closed = match result {
        Ok(Some(session)) => {
            match session_service::close_session(state.store.as_ref(), &session.id).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!("⚠️ Logout failed: {}", e);
                    false
                }
            }
        }
        Ok(None) => false,
        Err(e) => return (cors, e).into_response(),
    };

    if !closed {
        return (
            cors,
            Json(LogoutResponse {
                status: "could_not_log_out",
            }),
        )
            .into_response();
    }

    cookies.remove(session_cookie_builder(&state, &app_slug, String::new()).build());

    (cors, Json(LogoutResponse { status: "success" })).into_response()
}

/// Called by the signer with its signature over the login challenge.
pub async fn validate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: std::result::Result<Json<ValidationPayload>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    let Json(payload) = payload.map_err(|e| {
        tracing::debug!("Unreadable validation payload: {}", e);
        AppError::MalformedInput {
            code: "payload_parse_error",
        }
    })?;
    payload.check()?;

    let ValidationPayload {
        signature,
        message,
        public_key,
    } = payload;

    let key = public_key.clone();
    let valid = tokio::task::spawn_blocking(move || verify_signature(&signature, &message, &key))
        .await
        .map_err(|e| AppError::infra("unable_to_validate", "JoinError", e))?;
    if !valid {
        return Err(AppError::Forbidden {
            code: "invalid_signature",
        });
    }

    let store = state.store.as_ref();
    let session = store
        .find_session(&session_id)
        .await?
        .filter(|session| session.status == SessionStatus::Pending)
        .ok_or(AppError::Forbidden {
            code: "invalid_session",
        })?;

    let user = store
        .find_user_by_public_key(&public_key)
        .await?
        .ok_or(AppError::Forbidden {
            code: "invalid_user",
        })?;

    if !store.user_subscribes_to_app(user.id, session.app_id).await? {
        return Err(AppError::Forbidden {
            code: "user_does_not_subscribes",
        });
    }

    session_service::validate_session(store, &session.id, user.id)
        .await
        .map_err(|e| AppError::infra("unable_to_validate_session", "SessionError", e))?;

    Ok(Json(MessageResponse {
        message: "Login successful",
    }))
}

/// A QR code opened by a plain camera app lands here.
pub async fn validate_redirect(
    State(state): State<AppState>,
    Path(_session_id): Path<String>,
) -> Result<Response> {
    let url = state
        .config
        .app_redirect_url
        .as_deref()
        .ok_or(AppError::NotFound { code: "not_found" })?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response())
}
