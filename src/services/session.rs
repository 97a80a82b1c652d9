//! Session state machine.
//!
//! ```text
//!         create                 validate(user)
//!  [none] ------> PENDING -----------------------> VALIDATED
//!                   |   \                              |
//!                   |    \__ close / reaper ___________|
//!                   v                                  v
//!                 EXPIRED <----------------------------
//!                   |
//!                   +-- reaper --> deleted
//! ```
//!
//! Every session write in the crate goes through this module.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::SessionLifetimes;
use crate::crypto::session_id::generate_session_id;
use crate::models::session::{Session, SessionStatus, SessionUpdate};
use crate::repositories::{SessionRepository, StoreError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session {0} does not exist")]
    NotFound(String),

    #[error("Cannot move session {id} from {current} to {wanted}")]
    InvalidStatus {
        id: String,
        current: SessionStatus,
        wanted: SessionStatus,
    },

    #[error("Unable to update session {0}")]
    UpdateFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Creates a fresh PENDING session for `app_id`.
///
/// Id generation is retried until the candidate is unused.
pub async fn create_session<S>(store: &S, app_id: i64) -> Result<Session>
where
    S: SessionRepository + ?Sized,
{
    let session_id = loop {
        let candidate = generate_session_id();
        if store.find_session(&candidate).await?.is_none() {
            break candidate;
        }
        tracing::warn!("⚠️ Session id collision, drawing a new one");
    };

    let now = Utc::now();
    let session = store
        .insert_session(&Session {
            id: session_id,
            app_id,
            user_id: None,
            status: SessionStatus::Pending,
            creation_date: now,
            last_usage_date: now,
        })
        .await?;

    tracing::info!("🆕 Session created for app {}", app_id);
    Ok(session)
}

/// Looks a session up. `None` and unknown ids both resolve to `None`.
pub async fn retrieve_session<S>(store: &S, session_id: Option<&str>) -> Result<Option<Session>>
where
    S: SessionRepository + ?Sized,
{
    match session_id {
        Some(id) if !id.is_empty() => Ok(store.find_session(id).await?),
        _ => Ok(None),
    }
}

/// Returns the browser's current session for `app_id`, creating one when
/// there is none, it is EXPIRED, or it belongs to another app.
///
/// A live session is returned untouched.
pub async fn retrieve_or_create_session<S>(
    store: &S,
    app_id: i64,
    session_id: Option<&str>,
) -> Result<Session>
where
    S: SessionRepository + ?Sized,
{
    match retrieve_session(store, session_id).await? {
        Some(session) if session.status != SessionStatus::Expired && session.app_id == app_id => {
            Ok(session)
        }
        _ => create_session(store, app_id).await,
    }
}

/// Binds `user_id` to a PENDING or VALIDATED session.
///
/// Leaves the row untouched on failure.
pub async fn validate_session<S>(store: &S, session_id: &str, user_id: i64) -> Result<Session>
where
    S: SessionRepository + ?Sized,
{
    let session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

    if !session.status.can_become(SessionStatus::Validated) {
        return Err(SessionError::InvalidStatus {
            id: session_id.to_string(),
            current: session.status,
            wanted: SessionStatus::Validated,
        });
    }

    let validated = store
        .update_session(session_id, SessionUpdate::validated_by(user_id, Utc::now()))
        .await?
        // Expired or deleted between the read and the write.
        .ok_or_else(|| SessionError::UpdateFailed(session_id.to_string()))?;

    tracing::info!("✅ Session validated for user {}", user_id);
    Ok(validated)
}

/// Moves a session to EXPIRED, whatever its current status.
pub async fn close_session<S>(store: &S, session_id: &str) -> Result<Session>
where
    S: SessionRepository + ?Sized,
{
    if store.find_session(session_id).await?.is_none() {
        return Err(SessionError::NotFound(session_id.to_string()));
    }

    let closed = store
        .update_session(session_id, SessionUpdate::expired_at(Utc::now()))
        .await?
        .ok_or_else(|| SessionError::UpdateFailed(session_id.to_string()))?;

    tracing::info!("👋 Session closed");
    Ok(closed)
}

/// Refreshes `last_usage_date` without changing the status.
pub async fn touch_session<S>(store: &S, session: &Session) -> Result<Session>
where
    S: SessionRepository + ?Sized,
{
    let update = SessionUpdate {
        status: session.status,
        user_id: None,
        touched_at: Some(Utc::now()),
        unused_since: None,
    };
    store
        .update_session(&session.id, update)
        .await?
        .ok_or_else(|| SessionError::UpdateFailed(session.id.clone()))
}

/// The instant before which a session in `status` counts as stale.
///
/// `None` when the lifetime is disabled, or reaches further back than a
/// timestamp can express; nothing is stale then.
pub fn stale_cutoff(
    lifetimes: &SessionLifetimes,
    status: SessionStatus,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let lifetime = lifetimes.for_status(status)?;
    let cutoff = now.checked_sub_signed(lifetime);
    if cutoff.is_none() {
        tracing::warn!("⚠️ {} lifetime out of range, nothing expires", status);
    }
    cutoff
}

/// Sessions in `status` not used since `now - lifetime(status)`.
///
/// A disabled lifetime yields nothing without querying the store.
pub async fn get_expired_sessions_at<S>(
    store: &S,
    lifetimes: &SessionLifetimes,
    status: SessionStatus,
    now: DateTime<Utc>,
) -> Result<Vec<Session>>
where
    S: SessionRepository + ?Sized,
{
    let Some(cutoff) = stale_cutoff(lifetimes, status, now) else {
        return Ok(Vec::new());
    };
    Ok(store.list_stale_sessions(status, cutoff).await?)
}

pub async fn get_expired_sessions<S>(
    store: &S,
    lifetimes: &SessionLifetimes,
    status: SessionStatus,
) -> Result<Vec<Session>>
where
    S: SessionRepository + ?Sized,
{
    get_expired_sessions_at(store, lifetimes, status, Utc::now()).await
}

/// Low-level status change. Refuses to leave EXPIRED.
pub async fn change_session_status<S>(
    store: &S,
    session_id: &str,
    status: SessionStatus,
) -> Result<Session>
where
    S: SessionRepository + ?Sized,
{
    change_session_status_at(store, session_id, status, Utc::now()).await
}

/// [`change_session_status`] as of `now`. Entering EXPIRED stamps
/// `last_usage_date`, so the purge delay counts from the expiry.
pub async fn change_session_status_at<S>(
    store: &S,
    session_id: &str,
    status: SessionStatus,
    now: DateTime<Utc>,
) -> Result<Session>
where
    S: SessionRepository + ?Sized,
{
    let current = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

    if !current.status.can_become(status) {
        return Err(SessionError::InvalidStatus {
            id: session_id.to_string(),
            current: current.status,
            wanted: status,
        });
    }

    let update = match status {
        SessionStatus::Expired => SessionUpdate::expired_at(now),
        _ => SessionUpdate::status(status),
    };
    store
        .update_session(session_id, update)
        .await?
        .ok_or_else(|| SessionError::UpdateFailed(session_id.to_string()))
}

/// Expires a PENDING or VALIDATED session as of `now`, provided it has not
/// been used since `cutoff`.
///
/// Returns `None` when the row was used, closed or removed after it was
/// listed as stale; the write is skipped then.
pub async fn expire_stale_session_at<S>(
    store: &S,
    session_id: &str,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<Session>>
where
    S: SessionRepository + ?Sized,
{
    let update = SessionUpdate::expired_at(now).if_unused_since(cutoff);
    Ok(store.update_session(session_id, update).await?)
}

/// Deletes a session row. Returns whether it existed.
pub async fn remove_session<S>(store: &S, session_id: &str) -> Result<bool>
where
    S: SessionRepository + ?Sized,
{
    Ok(store.delete_session(session_id).await?)
}
