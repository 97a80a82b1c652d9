//! Background sweep moving stale sessions to EXPIRED and purging old EXPIRED
//! ones.
//!
//! A sweep is idempotent: it only acts on the store's current stale rows, so
//! a sweep interrupted by a restart is simply finished by the next one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SessionLifetimes;
use crate::models::session::SessionStatus;
use crate::repositories::SessionRepository;
use crate::services::session as session_service;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// PENDING or VALIDATED sessions moved to EXPIRED.
    pub expired: usize,
    /// EXPIRED sessions deleted.
    pub deleted: usize,
    /// Per-session operations that failed and will be retried next tick.
    pub failed: usize,
}

/// Runs one sweep as of `now`.
///
/// Per-session failures are logged and counted; they never abort the sweep.
pub async fn sweep_at<S>(store: &S, lifetimes: &SessionLifetimes, now: DateTime<Utc>) -> SweepReport
where
    S: SessionRepository + ?Sized,
{
    let mut report = SweepReport::default();

    match session_service::get_expired_sessions_at(store, lifetimes, SessionStatus::Expired, now)
        .await
    {
        Ok(sessions) => {
            for session in sessions {
                match session_service::remove_session(store, &session.id).await {
                    Ok(true) => report.deleted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!("❌ Failed to delete expired session: {}", e);
                        report.failed += 1;
                    }
                }
            }
        }
        Err(e) => {
            tracing::error!("❌ Failed to list stale EXPIRED sessions: {}", e);
            report.failed += 1;
        }
    }

    for status in [SessionStatus::Pending, SessionStatus::Validated] {
        let Some(cutoff) = session_service::stale_cutoff(lifetimes, status, now) else {
            continue;
        };
        let sessions = match store.list_stale_sessions(status, cutoff).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!("❌ Failed to list stale {} sessions: {}", status, e);
                report.failed += 1;
                continue;
            }
        };

        for session in sessions {
            match session_service::expire_stale_session_at(store, &session.id, cutoff, now).await {
                Ok(Some(_)) => report.expired += 1,
                // Used, closed or deleted since the listing.
                Ok(None) => {
                    tracing::debug!("🔄 Session {} no longer stale, skipped", session.id);
                }
                Err(e) => {
                    tracing::error!("❌ Failed to expire session: {}", e);
                    report.failed += 1;
                }
            }
        }
    }

    report
}

/// Runs one sweep now.
pub async fn sweep<S>(store: &S, lifetimes: &SessionLifetimes) -> SweepReport
where
    S: SessionRepository + ?Sized,
{
    sweep_at(store, lifetimes, Utc::now()).await
}

/// Owner's handle on a running reaper.
pub struct ReaperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stops the reaper after the sweep in progress, if any, and waits for it.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("❌ Reaper task ended abnormally: {}", e);
        }
    }
}

/// Starts sweeping every `interval`, the first sweep running immediately.
pub fn spawn<S>(store: Arc<S>, lifetimes: SessionLifetimes, interval: Duration) -> ReaperHandle
where
    S: SessionRepository + ?Sized + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = sweep(store.as_ref(), &lifetimes).await;
            if report != SweepReport::default() {
                tracing::info!(
                    "🧹 Session sweep: {} expired, {} deleted, {} failed",
                    report.expired,
                    report.deleted,
                    report.failed
                );
            }
        }

        tracing::info!("🛑 Session reaper stopped");
    });

    tracing::info!("✅ Session reaper started (every {:?})", interval);
    ReaperHandle { token, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::{Session, SessionUpdate};
    use crate::repositories::memory::MemoryStore;
    use crate::repositories::{StoreError, StoreResult};
    use async_trait::async_trait;

    const APP: i64 = 1;

    fn lifetimes() -> SessionLifetimes {
        SessionLifetimes {
            pending_secs: 60,
            validated_secs: 600,
            expired_secs: 60,
        }
    }

    #[tokio::test]
    async fn stale_pending_expires_then_gets_deleted() {
        let store = MemoryStore::new();
        let session = session_service::create_session(&store, APP).await.unwrap();
        let t0 = session.last_usage_date;

        let first = sweep_at(&store, &lifetimes(), t0 + chrono::Duration::seconds(61)).await;
        assert_eq!(first, SweepReport { expired: 1, deleted: 0, failed: 0 });
        let expired = store.find_session(&session.id).await.unwrap().unwrap();
        assert_eq!(expired.status, SessionStatus::Expired);

        assert_eq!(expired.last_usage_date, t0 + chrono::Duration::seconds(61));

        // Not yet: EXPIRED ages from the moment it expired.
        let early = sweep_at(&store, &lifetimes(), t0 + chrono::Duration::seconds(100)).await;
        assert_eq!(early.deleted, 0);

        let second = sweep_at(&store, &lifetimes(), t0 + chrono::Duration::seconds(122)).await;
        assert_eq!(second.deleted, 1);
        assert_eq!(store.find_session(&session.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn fresh_sessions_survive() {
        let store = MemoryStore::new();
        let pending = session_service::create_session(&store, APP).await.unwrap();
        let validated = session_service::create_session(&store, APP).await.unwrap();
        session_service::validate_session(&store, &validated.id, 9)
            .await
            .unwrap();

        let now = pending.last_usage_date + chrono::Duration::seconds(120);
        let report = sweep_at(&store, &lifetimes(), now).await;

        assert_eq!(report.expired, 1);
        let still_validated = store.find_session(&validated.id).await.unwrap().unwrap();
        assert_eq!(still_validated.status, SessionStatus::Validated);
    }

    #[tokio::test]
    async fn sweeping_twice_is_a_no_op() {
        let store = MemoryStore::new();
        let session = session_service::create_session(&store, APP).await.unwrap();
        let now = session.last_usage_date + chrono::Duration::seconds(61);

        sweep_at(&store, &lifetimes(), now).await;
        let after_once = store.find_session(&session.id).await.unwrap();
        let second = sweep_at(&store, &lifetimes(), now).await;

        assert_eq!(second, SweepReport::default());
        assert_eq!(store.find_session(&session.id).await.unwrap(), after_once);
    }

    /// Fails every update of one session id.
    struct FlakyStore {
        inner: MemoryStore,
        poisoned: String,
    }

    #[async_trait]
    impl SessionRepository for FlakyStore {
        async fn find_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
            self.inner.find_session(session_id).await
        }

        async fn insert_session(&self, session: &Session) -> StoreResult<Session> {
            self.inner.insert_session(session).await
        }

        async fn update_session(
            &self,
            session_id: &str,
            update: SessionUpdate,
        ) -> StoreResult<Option<Session>> {
            if session_id == self.poisoned {
                return Err(StoreError::MissingData("status".to_string()));
            }
            self.inner.update_session(session_id, update).await
        }

        async fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
            self.inner.delete_session(session_id).await
        }

        async fn list_stale_sessions(
            &self,
            status: SessionStatus,
            cutoff: DateTime<Utc>,
        ) -> StoreResult<Vec<Session>> {
            self.inner.list_stale_sessions(status, cutoff).await
        }
    }

    #[tokio::test]
    async fn a_failing_session_does_not_abort_the_sweep() {
        let inner = MemoryStore::new();
        let bad = session_service::create_session(&inner, APP).await.unwrap();
        let good = session_service::create_session(&inner, APP).await.unwrap();
        let store = FlakyStore {
            inner: inner.clone(),
            poisoned: bad.id.clone(),
        };

        let now = good.last_usage_date + chrono::Duration::seconds(61);
        let report = sweep_at(&store, &lifetimes(), now).await;

        assert_eq!(report.expired, 1);
        assert_eq!(report.failed, 1);
        let good = inner.find_session(&good.id).await.unwrap().unwrap();
        assert_eq!(good.status, SessionStatus::Expired);
    }

    /// Validates every listed PENDING session right after listing it, as if a
    /// signer got there first.
    struct RacingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SessionRepository for RacingStore {
        async fn find_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
            self.inner.find_session(session_id).await
        }

        async fn insert_session(&self, session: &Session) -> StoreResult<Session> {
            self.inner.insert_session(session).await
        }

        async fn update_session(
            &self,
            session_id: &str,
            update: SessionUpdate,
        ) -> StoreResult<Option<Session>> {
            self.inner.update_session(session_id, update).await
        }

        async fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
            self.inner.delete_session(session_id).await
        }

        async fn list_stale_sessions(
            &self,
            status: SessionStatus,
            cutoff: DateTime<Utc>,
        ) -> StoreResult<Vec<Session>> {
            let stale = self.inner.list_stale_sessions(status, cutoff).await?;
            if status == SessionStatus::Pending {
                let used_at = cutoff + chrono::Duration::seconds(1);
                for session in &stale {
                    self.inner
                        .update_session(&session.id, SessionUpdate::validated_by(5, used_at))
                        .await?;
                }
            }
            Ok(stale)
        }
    }

    #[tokio::test]
    async fn sessions_used_after_listing_are_not_expired() {
        let inner = MemoryStore::new();
        let session = session_service::create_session(&inner, APP).await.unwrap();
        let store = RacingStore {
            inner: inner.clone(),
        };

        let now = session.last_usage_date + chrono::Duration::seconds(61);
        let report = sweep_at(&store, &lifetimes(), now).await;

        assert_eq!(report, SweepReport::default());
        let kept = inner.find_session(&session.id).await.unwrap().unwrap();
        assert_eq!(kept.status, SessionStatus::Validated);
        assert_eq!(kept.user_id, Some(5));
    }

    #[tokio::test]
    async fn spawned_reaper_sweeps_immediately_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let session = session_service::create_session(store.as_ref(), APP)
            .await
            .unwrap();
        let instant = SessionLifetimes {
            pending_secs: 0,
            validated_secs: 0,
            expired_secs: 0,
        };

        let handle = spawn(store.clone(), instant, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop().await;

        // Zero lifetimes disable expiry entirely.
        let untouched = store.find_session(&session.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, SessionStatus::Pending);
    }
}
