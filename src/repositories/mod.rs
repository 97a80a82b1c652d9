//! Persistence contracts consumed by the services.
//!
//! Every read and write goes through these traits; there is no in-process
//! session cache. `PgStore` (see [`crate::db`]) backs them with Postgres and
//! [`memory::MemoryStore`] keeps everything in a process-local table set.

pub mod app;
pub mod memory;
pub mod session;
pub mod user;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    app::App,
    session::{Session, SessionStatus, SessionUpdate},
    user::User,
};

/// A failure of the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A PostgreSQL error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// No connection could be checked out of the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A row was missing an expected column.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Session rows.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_session(&self, session_id: &str) -> StoreResult<Option<Session>>;

    /// Inserts a new row. Fails with `Conflict` if the id is taken.
    async fn insert_session(&self, session: &Session) -> StoreResult<Session>;

    /// Applies `update` when the row exists and its status is one of
    /// `update.status.sources()`. Returns the updated row, `None` otherwise.
    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> StoreResult<Option<Session>>;

    /// Deletes a row, returning whether it existed.
    async fn delete_session(&self, session_id: &str) -> StoreResult<bool>;

    /// Sessions in `status` whose `last_usage_date` is strictly older than `cutoff`.
    async fn list_stale_sessions(
        &self,
        status: SessionStatus,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>>;
}

/// App rows.
#[async_trait]
pub trait AppRepository: Send + Sync {
    async fn find_app_by_slug(&self, slug: &str) -> StoreResult<Option<App>>;

    async fn find_app_by_id(&self, app_id: i64) -> StoreResult<Option<App>>;

    async fn insert_app(&self, slug: &str, allowed_hosts: &[String]) -> StoreResult<App>;

    async fn list_apps(&self) -> StoreResult<Vec<App>>;
}

/// User rows and the user/app subscription join.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user_by_id(&self, user_id: i64) -> StoreResult<Option<User>>;

    async fn find_user_by_public_key(&self, public_key: &str) -> StoreResult<Option<User>>;

    async fn insert_user(
        &self,
        name: &str,
        public_key: &str,
        email: Option<&str>,
    ) -> StoreResult<User>;

    async fn list_users(&self) -> StoreResult<Vec<User>>;

    async fn subscribe_user_to_app(&self, user_id: i64, app_id: i64) -> StoreResult<()>;

    async fn user_subscribes_to_app(&self, user_id: i64, app_id: i64) -> StoreResult<bool>;
}

/// Everything the HTTP layer needs from persistence.
pub trait Store: SessionRepository + AppRepository + UserRepository {}

impl<T> Store for T where T: SessionRepository + AppRepository + UserRepository {}
