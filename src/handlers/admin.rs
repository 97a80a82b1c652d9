use axum::{Extension, Json, extract::State};

use crate::{
    error::Result,
    models::{app::AppListing, session::Session, user::User},
    state::AppState,
};

/// Lists every app. The admin app is flagged `locked`.
///
/// Only reachable through the admin scope guard, which provides `session`.
pub async fn list_apps(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<AppListing>>> {
    tracing::debug!("📋 App listing requested by user {:?}", session.user_id);

    let apps = state
        .store
        .list_apps()
        .await?
        .into_iter()
        .map(|app| AppListing {
            locked: app.slug == state.config.admin_app_slug,
            app,
        })
        .collect();

    Ok(Json(apps))
}

/// Lists every user.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<User>>> {
    tracing::debug!("📋 User listing requested by user {:?}", session.user_id);
    Ok(Json(state.store.list_users().await?))
}
