use async_trait::async_trait;
use tokio_postgres::{Row, error::SqlState};

use super::{StoreError, StoreResult, UserRepository};
use crate::db::PgStore;
use crate::models::user::User;

/// A helper function to map a `tokio_postgres::Row` to a `User`.
fn row_to_user(row: &Row) -> StoreResult<User> {
    Ok(User {
        id: row.try_get("id").map_err(|_| StoreError::MissingData("id".to_string()))?,
        creation_date: row.try_get("creation_date").map_err(|_| StoreError::MissingData("creation_date".to_string()))?,
        public_key: row.try_get("public_key").map_err(|_| StoreError::MissingData("public_key".to_string()))?,
        name: row.try_get("name").map_err(|_| StoreError::MissingData("name".to_string()))?,
        email: row.try_get("email").map_err(|_| StoreError::MissingData("email".to_string()))?,
        data: row.try_get("data").map_err(|_| StoreError::MissingData("data".to_string()))?,
    })
}

#[async_trait]
impl UserRepository for PgStore {
    /// Finds a user by their ID.
    async fn find_user_by_id(&self, user_id: i64) -> StoreResult<Option<User>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("SELECT * FROM users WHERE id = $1")
            .await?;
        let row = client.query_opt(&statement, &[&user_id]).await?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    /// Finds the user owning a signing key.
    async fn find_user_by_public_key(&self, public_key: &str) -> StoreResult<Option<User>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("SELECT * FROM users WHERE public_key = $1")
            .await?;
        let row = client.query_opt(&statement, &[&public_key]).await?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    /// Creates a new user in the database.
    async fn insert_user(
        &self,
        name: &str,
        public_key: &str,
        email: Option<&str>,
    ) -> StoreResult<User> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO users (name, public_key, email)
                VALUES ($1, $2, $3)
                RETURNING *
                "#,
                &[&name, &public_key, &email],
            )
            .await
            .map_err(|e| match e.code() {
                Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
                    StoreError::Conflict("public key already registered".to_string())
                }
                _ => StoreError::Database(e),
            })?;
        row_to_user(&row)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT * FROM users ORDER BY id", &[])
            .await?;
        rows.iter().map(row_to_user).collect()
    }

    async fn subscribe_user_to_app(&self, user_id: i64, app_id: i64) -> StoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO app_subscriptions (user_id, app_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
                &[&user_id, &app_id],
            )
            .await?;
        Ok(())
    }

    async fn user_subscribes_to_app(&self, user_id: i64, app_id: i64) -> StoreResult<bool> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM app_subscriptions
                    WHERE user_id = $1 AND app_id = $2
                ) AS subscribes
                "#,
            )
            .await?;
        let row = client.query_one(&statement, &[&user_id, &app_id]).await?;
        row.try_get("subscribes")
            .map_err(|_| StoreError::MissingData("subscribes".to_string()))
    }
}
