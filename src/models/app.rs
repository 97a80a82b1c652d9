use chrono::{DateTime, Utc};
use serde::Serialize;

/// A tenant delegating its logins to this service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: i64,
    pub creation_date: DateTime<Utc>,
    /// Unique, URL-safe identifier used in routes and cookie names.
    pub slug: String,
    /// Browser origins allowed to act for this app.
    ///
    /// A single empty entry means same-origin only: no CORS headers are sent.
    pub allowed_hosts: Vec<String>,
}

impl App {
    /// True when the app only accepts same-origin browser calls.
    pub fn is_same_origin_only(&self) -> bool {
        self.allowed_hosts.len() == 1 && self.allowed_hosts[0].trim().is_empty()
    }
}

/// An app as listed on the admin API.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppListing {
    #[serde(flatten)]
    pub app: App,
    /// The admin app cannot be mutated.
    pub locked: bool,
}
