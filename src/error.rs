use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::repositories::StoreError;
use crate::services::session::SessionError;

/// The application's error type.
///
/// Every variant carries a stable `code` which is what clients see. Only
/// `Infra` failures expose the underlying error, as `{name, message}`.
#[derive(Error, Debug)]
pub enum AppError {
    /// A required session, app or user does not exist.
    #[error("Not found: {code}")]
    NotFound { code: &'static str },

    /// A status guard was violated.
    #[error("Invalid state: {code}")]
    InvalidState { code: &'static str },

    /// No usable credential was presented.
    #[error("Unauthorized: {code}")]
    Unauthorized { code: &'static str },

    /// A credential was presented but is not allowed here.
    #[error("Forbidden: {code}")]
    Forbidden { code: &'static str },

    /// The request payload is missing or ill-typed.
    #[error("Malformed input: {code}")]
    MalformedInput { code: &'static str },

    /// The store, a blocking task or a codec failed.
    #[error("{code}: {source}")]
    Infra {
        code: &'static str,
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Wraps an infrastructure failure under a client-facing `code`.
    pub fn infra<E>(code: &'static str, name: &'static str, source: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        AppError::Infra {
            code,
            name,
            source: source.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound { code }
            | AppError::InvalidState { code }
            | AppError::Unauthorized { code }
            | AppError::Forbidden { code }
            | AppError::MalformedInput { code }
            | AppError::Infra { code, .. } => code,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::InvalidState { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::MalformedInput { .. } => StatusCode::BAD_REQUEST,
            AppError::Infra { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::infra("store_error", "StoreError", e)
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(_) => AppError::NotFound {
                code: "session_not_found",
            },
            SessionError::InvalidStatus { .. } => AppError::InvalidState {
                code: "invalid_session_status",
            },
            other => AppError::infra("session_error", "SessionError", other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match self {
            AppError::Infra {
                code,
                name,
                ref source,
            } => {
                tracing::error!("💥 {}: {:#}", code, source);
                sonic_rs::to_string(&sonic_rs::json!({
                    "code": code,
                    "error": {
                        "name": name,
                        "message": source.to_string(),
                    }
                }))
            }
            AppError::NotFound { code } | AppError::MalformedInput { code } => {
                tracing::debug!("Request rejected: {}", code);
                sonic_rs::to_string(&sonic_rs::json!({ "code": code }))
            }
            AppError::InvalidState { code }
            | AppError::Unauthorized { code }
            | AppError::Forbidden { code } => {
                tracing::warn!("Request rejected: {}", code);
                sonic_rs::to_string(&sonic_rs::json!({ "code": code }))
            }
        }
        .unwrap_or_else(|_| r#"{"code":"internal_error"}"#.to_string());

        (
            status,
            [(http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
