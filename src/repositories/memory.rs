use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AppRepository, SessionRepository, StoreError, StoreResult, UserRepository};
use crate::models::{
    app::App,
    session::{Session, SessionStatus, SessionUpdate},
    user::User,
};

#[derive(Default)]
struct Tables {
    apps: BTreeMap<i64, App>,
    users: BTreeMap<i64, User>,
    subscriptions: HashSet<(i64, i64)>,
    sessions: HashMap<String, Session>,
    next_app_id: i64,
    next_user_id: i64,
}

/// A process-local store with the same semantics as the Postgres one.
///
/// Used by the test suite and when no `DATABASE_URL` is configured.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn find_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(session_id).cloned())
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<Session> {
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(session.clone())
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> StoreResult<Option<Session>> {
        let mut tables = self.tables.write().await;
        let Some(session) = tables.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if !update.status.sources().contains(&session.status) {
            return Ok(None);
        }
        if update
            .unused_since
            .is_some_and(|cutoff| session.last_usage_date >= cutoff)
        {
            return Ok(None);
        }
        session.status = update.status;
        if let Some(user_id) = update.user_id {
            session.user_id = Some(user_id);
        }
        if let Some(at) = update.touched_at {
            session.last_usage_date = at;
        }
        Ok(Some(session.clone()))
    }

    async fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
        Ok(self.tables.write().await.sessions.remove(session_id).is_some())
    }

    async fn list_stale_sessions(
        &self,
        status: SessionStatus,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.status == status && s.last_usage_date < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AppRepository for MemoryStore {
    async fn find_app_by_slug(&self, slug: &str) -> StoreResult<Option<App>> {
        let tables = self.tables.read().await;
        Ok(tables.apps.values().find(|a| a.slug == slug).cloned())
    }

    async fn find_app_by_id(&self, app_id: i64) -> StoreResult<Option<App>> {
        Ok(self.tables.read().await.apps.get(&app_id).cloned())
    }

    async fn insert_app(&self, slug: &str, allowed_hosts: &[String]) -> StoreResult<App> {
        let mut tables = self.tables.write().await;
        if tables.apps.values().any(|a| a.slug == slug) {
            return Err(StoreError::Conflict(format!("app {} already exists", slug)));
        }
        tables.next_app_id += 1;
        let app = App {
            id: tables.next_app_id,
            creation_date: Utc::now(),
            slug: slug.to_string(),
            allowed_hosts: allowed_hosts.to_vec(),
        };
        tables.apps.insert(app.id, app.clone());
        Ok(app)
    }

    async fn list_apps(&self) -> StoreResult<Vec<App>> {
        Ok(self.tables.read().await.apps.values().cloned().collect())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_user_by_id(&self, user_id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_public_key(&self, public_key: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.public_key == public_key)
            .cloned())
    }

    async fn insert_user(
        &self,
        name: &str,
        public_key: &str,
        email: Option<&str>,
    ) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.public_key == public_key) {
            return Err(StoreError::Conflict(
                "public key already registered".to_string(),
            ));
        }
        tables.next_user_id += 1;
        let user = User {
            id: tables.next_user_id,
            creation_date: Utc::now(),
            public_key: public_key.to_string(),
            name: name.to_string(),
            email: email.map(str::to_string),
            data: None,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn subscribe_user_to_app(&self, user_id: i64, app_id: i64) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .subscriptions
            .insert((user_id, app_id));
        Ok(())
    }

    async fn user_subscribes_to_app(&self, user_id: i64, app_id: i64) -> StoreResult<bool> {
        Ok(self
            .tables
            .read()
            .await
            .subscriptions
            .contains(&(user_id, app_id)))
    }
}
