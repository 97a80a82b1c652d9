use chrono::{DateTime, Utc};
use serde::Serialize;

/// Represents a user able to sign login challenges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The unique identifier for the user.
    pub id: i64,
    /// The timestamp when the user was created.
    pub creation_date: DateTime<Utc>,
    /// Hex-encoded secp256k1 public key, without the `04` point prefix.
    pub public_key: String,
    /// The user's display name.
    pub name: String,
    /// The user's email address.
    pub email: Option<String>,
    /// Free-form JSON profile data, owned by the apps.
    pub data: Option<String>,
}
