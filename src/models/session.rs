use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a login session.
///
/// `Expired` is terminal: once a session reaches it, a new session is created
/// instead of reviving the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[postgres(name = "session_status")]
pub enum SessionStatus {
    #[postgres(name = "PENDING")]
    Pending,
    #[postgres(name = "VALIDATED")]
    Validated,
    #[postgres(name = "EXPIRED")]
    Expired,
}

impl SessionStatus {
    /// Statuses a session may be in for validation to succeed.
    pub const VALIDATABLE: &'static [SessionStatus] =
        &[SessionStatus::Pending, SessionStatus::Validated];

    /// Every status; closing a session is unconditional.
    pub const ANY: &'static [SessionStatus] = &[
        SessionStatus::Pending,
        SessionStatus::Validated,
        SessionStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Validated => "VALIDATED",
            SessionStatus::Expired => "EXPIRED",
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_become(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, _)
                | (SessionStatus::Validated, SessionStatus::Validated)
                | (SessionStatus::Validated, SessionStatus::Expired)
                | (SessionStatus::Expired, SessionStatus::Expired)
        )
    }

    /// The statuses from which `self` can be reached.
    pub fn sources(&self) -> &'static [SessionStatus] {
        match self {
            SessionStatus::Pending => &[SessionStatus::Pending],
            SessionStatus::Validated => Self::VALIDATABLE,
            SessionStatus::Expired => Self::ANY,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A login attempt for one (app, browser) pair.
///
/// The `id` is the bearer credential carried by the per-app session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// 64 hex characters of random data.
    pub id: String,
    /// The app this session authenticates into.
    pub app_id: i64,
    /// Set once the session has been validated by a signer.
    pub user_id: Option<i64>,
    pub status: SessionStatus,
    pub creation_date: DateTime<Utc>,
    /// Reference point for staleness.
    pub last_usage_date: DateTime<Utc>,
}

/// A conditional mutation of a session row.
///
/// The store applies it only when the row's current status is one of
/// `status.sources()`, which keeps transitions monotonic under concurrent
/// writers, and, when `unused_since` is set, only while the row's
/// `last_usage_date` is still older than it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUpdate {
    pub status: SessionStatus,
    /// New owner, `None` keeps the current one.
    pub user_id: Option<i64>,
    /// New `last_usage_date`, `None` keeps the current one.
    pub touched_at: Option<DateTime<Utc>>,
    /// Staleness guard: skip the row if it was used at or after this instant.
    pub unused_since: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status,
            user_id: None,
            touched_at: None,
            unused_since: None,
        }
    }

    /// Moves to EXPIRED; staleness of the expired row counts from `at`.
    pub fn expired_at(at: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Expired,
            user_id: None,
            touched_at: Some(at),
            unused_since: None,
        }
    }

    /// Restricts the update to rows not used since `cutoff`.
    pub fn if_unused_since(self, cutoff: DateTime<Utc>) -> Self {
        Self {
            unused_since: Some(cutoff),
            ..self
        }
    }

    pub fn validated_by(user_id: i64, at: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Validated,
            user_id: Some(user_id),
            touched_at: Some(at),
            unused_since: None,
        }
    }
}
