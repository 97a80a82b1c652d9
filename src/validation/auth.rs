use garde::Validate;
use serde::Deserialize;

use crate::crypto::signature::PUBLIC_KEY_HEX_LEN;
use crate::error::{AppError, Result};

/// Body the signer posts to `/auth/validate/{session_id}`.
#[derive(Deserialize, Validate, Debug)]
pub struct ValidationPayload {
    #[garde(length(min = 1))]
    pub signature: String,
    #[garde(length(min = 1))]
    pub message: String,
    #[garde(length(min = 1))]
    pub public_key: String,
}

impl ValidationPayload {
    /// Checks that every field is present and non-empty.
    ///
    /// Field contents are judged by the signature check, not here.
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|report| {
            tracing::debug!("Rejected validation payload: {}", report);
            AppError::MalformedInput {
                code: "payload_parse_error",
            }
        })
    }
}

/// Validates an operator-supplied public key: 128 hex characters, no `04` prefix.
///
/// # Arguments
///
/// * `public_key` - The public key to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the public key is valid.
pub fn validate_public_key(public_key: &str) -> Result<()> {
    if public_key.len() != PUBLIC_KEY_HEX_LEN
        || !public_key.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(AppError::MalformedInput {
            code: "invalid_public_key",
        });
    }
    Ok(())
}

/// Validates a user display name.
pub fn validate_user_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.len() > 255 {
        return Err(AppError::MalformedInput {
            code: "invalid_user_name",
        });
    }
    Ok(())
}
