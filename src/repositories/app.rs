use async_trait::async_trait;
use tokio_postgres::{Row, error::SqlState};

use super::{AppRepository, StoreError, StoreResult};
use crate::db::PgStore;
use crate::models::app::App;

/// A helper function to map a `tokio_postgres::Row` to an `App`.
fn row_to_app(row: &Row) -> StoreResult<App> {
    Ok(App {
        id: row.try_get("id").map_err(|_| StoreError::MissingData("id".to_string()))?,
        creation_date: row.try_get("creation_date").map_err(|_| StoreError::MissingData("creation_date".to_string()))?,
        slug: row.try_get("slug").map_err(|_| StoreError::MissingData("slug".to_string()))?,
        allowed_hosts: row.try_get("allowed_hosts").map_err(|_| StoreError::MissingData("allowed_hosts".to_string()))?,
    })
}

#[async_trait]
impl AppRepository for PgStore {
    async fn find_app_by_slug(&self, slug: &str) -> StoreResult<Option<App>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("SELECT * FROM apps WHERE slug = $1")
            .await?;
        let row = client.query_opt(&statement, &[&slug]).await?;
        row.map(|r| row_to_app(&r)).transpose()
    }

    async fn find_app_by_id(&self, app_id: i64) -> StoreResult<Option<App>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("SELECT * FROM apps WHERE id = $1")
            .await?;
        let row = client.query_opt(&statement, &[&app_id]).await?;
        row.map(|r| row_to_app(&r)).transpose()
    }

    async fn insert_app(&self, slug: &str, allowed_hosts: &[String]) -> StoreResult<App> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO apps (slug, allowed_hosts)
                VALUES ($1, $2)
                RETURNING *
                "#,
                &[&slug, &allowed_hosts],
            )
            .await
            .map_err(|e| match e.code() {
                Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
                    StoreError::Conflict(format!("app {} already exists", slug))
                }
                _ => StoreError::Database(e),
            })?;
        row_to_app(&row)
    }

    async fn list_apps(&self) -> StoreResult<Vec<App>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT * FROM apps ORDER BY id", &[])
            .await?;
        rows.iter().map(row_to_app).collect()
    }
}
