use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Row, error::SqlState};

use super::{SessionRepository, StoreError, StoreResult};
use crate::db::PgStore;
use crate::models::session::{Session, SessionStatus, SessionUpdate};

const SESSION_COLUMNS: &str = "id, app_id, user_id, status, creation_date, last_usage_date";

/// A helper function to map a `tokio_postgres::Row` to a `Session`.
fn row_to_session(row: &Row) -> StoreResult<Session> {
    Ok(Session {
        id: row.try_get("id").map_err(|_| StoreError::MissingData("id".to_string()))?,
        app_id: row.try_get("app_id").map_err(|_| StoreError::MissingData("app_id".to_string()))?,
        user_id: row.try_get("user_id").map_err(|_| StoreError::MissingData("user_id".to_string()))?,
        status: row.try_get("status").map_err(|_| StoreError::MissingData("status".to_string()))?,
        creation_date: row.try_get("creation_date").map_err(|_| StoreError::MissingData("creation_date".to_string()))?,
        last_usage_date: row.try_get("last_usage_date").map_err(|_| StoreError::MissingData("last_usage_date".to_string()))?,
    })
}

#[async_trait]
impl SessionRepository for PgStore {
    async fn find_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
            ))
            .await?;
        let row = client.query_opt(&statement, &[&session_id]).await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<Session> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(&format!(
                r#"
                INSERT INTO sessions (id, app_id, user_id, status, creation_date, last_usage_date)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING {SESSION_COLUMNS}
                "#
            ))
            .await?;
        let row = client
            .query_one(
                &statement,
                &[
                    &session.id,
                    &session.app_id,
                    &session.user_id,
                    &session.status,
                    &session.creation_date,
                    &session.last_usage_date,
                ],
            )
            .await
            .map_err(|e| match e.code() {
                Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
                    StoreError::Conflict(format!("session {} already exists", session.id))
                }
                _ => StoreError::Database(e),
            })?;
        row_to_session(&row)
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> StoreResult<Option<Session>> {
        let sources: Vec<&str> = update
            .status
            .sources()
            .iter()
            .map(SessionStatus::as_str)
            .collect();

        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(&format!(
                r#"
                UPDATE sessions
                SET
                    status = $2,
                    user_id = COALESCE($3, user_id),
                    last_usage_date = COALESCE($4, last_usage_date)
                WHERE id = $1
                    AND status::text = ANY($5)
                    AND ($6::timestamptz IS NULL OR last_usage_date < $6)
                RETURNING {SESSION_COLUMNS}
                "#
            ))
            .await?;
        let row = client
            .query_opt(
                &statement,
                &[
                    &session_id,
                    &update.status,
                    &update.user_id,
                    &update.touched_at,
                    &sources,
                    &update.unused_since,
                ],
            )
            .await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("DELETE FROM sessions WHERE id = $1")
            .await?;
        let deleted = client.execute(&statement, &[&session_id]).await?;
        Ok(deleted > 0)
    }

    async fn list_stale_sessions(
        &self,
        status: SessionStatus,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(&format!(
                r#"
                SELECT {SESSION_COLUMNS}
                FROM sessions
                WHERE status = $1 AND last_usage_date < $2
                "#
            ))
            .await?;
        let rows = client.query(&statement, &[&status, &cutoff]).await?;
        rows.iter().map(row_to_session).collect()
    }
}
