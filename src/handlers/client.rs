use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::{
    error::{AppError, Result},
    state::AppState,
};

/// Replaced by the quoted API URL when serving the login script.
const API_PLACEHOLDER: &str = "__SIGIL_API__";

const LOGIN_SCRIPT: &str = include_str!("../../assets/sigil-login.js");

/// Renders the browser client against `api`, the public API URL ending in `/`.
pub fn render_login_script(api: &str) -> Result<String> {
    let literal = sonic_rs::to_string(api)
        .map_err(|e| AppError::infra("script_error", "ScriptError", e))?;
    Ok(LOGIN_SCRIPT.replace(API_PLACEHOLDER, &literal))
}

/// Serves `window.SigilLogin`, the script web apps embed to show the QR
/// code and wait for validation.
pub async fn login_script(State(state): State<AppState>) -> Result<Response> {
    let api = format!("{}{}/", state.config.pingback_url, state.config.api_base);
    let script = render_login_script(&api)?;
    Ok((
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        script,
    )
        .into_response())
}
