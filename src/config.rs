use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::session::SessionStatus;

/// Longest accepted lifetime, session or cookie: 100 years.
pub const MAX_LIFETIME_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// How long a session may sit in each status before the reaper acts on it.
///
/// A lifetime of zero means sessions never age out of that status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLifetimes {
    /// Seconds a PENDING session survives without being validated.
    pub pending_secs: u64,
    /// Seconds a VALIDATED session survives without being used.
    pub validated_secs: u64,
    /// Seconds an EXPIRED session is kept before being deleted.
    pub expired_secs: u64,
}

impl SessionLifetimes {
    /// Builds lifetimes, rejecting any above [`MAX_LIFETIME_SECS`].
    pub fn new(pending_secs: u64, validated_secs: u64, expired_secs: u64) -> Result<Self> {
        for (name, secs) in [
            ("SESSION_PENDING_LIFETIME", pending_secs),
            ("SESSION_VALIDATED_LIFETIME", validated_secs),
            ("SESSION_EXPIRED_LIFETIME", expired_secs),
        ] {
            if secs > MAX_LIFETIME_SECS {
                anyhow::bail!("{} must be at most {} seconds", name, MAX_LIFETIME_SECS);
            }
        }
        Ok(Self {
            pending_secs,
            validated_secs,
            expired_secs,
        })
    }

    /// Returns the configured lifetime for `status`, or `None` when it is
    /// disabled or too large to represent.
    pub fn for_status(&self, status: SessionStatus) -> Option<chrono::Duration> {
        let secs = match status {
            SessionStatus::Pending => self.pending_secs,
            SessionStatus::Validated => self.validated_secs,
            SessionStatus::Expired => self.expired_secs,
        };
        if secs == 0 {
            return None;
        }
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }
}

impl Default for SessionLifetimes {
    fn default() -> Self {
        Self {
            pending_secs: 3600,
            validated_secs: 3600,
            expired_secs: 3600,
        }
    }
}

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The URL of the PostgreSQL database. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Prefix of every API route, e.g. `/api/1.0`.
    pub api_base: String,
    /// Slug of the built-in admin app.
    pub admin_app_slug: String,
    /// Base name of the per-app session cookies.
    pub session_cookie_name: String,
    /// Lifetime of the session cookie in seconds.
    pub session_cookie_lifetime_secs: i64,
    /// Per-status session lifetimes.
    pub session_lifetimes: SessionLifetimes,
    /// Public base URL the signer calls back on.
    pub pingback_url: String,
    /// Where a plain QR scan of the validation URL is redirected.
    pub app_redirect_url: Option<String>,
    /// Interval between two reaper sweeps.
    pub reaper_interval: Duration,
}

fn var_or<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let pingback_url = env::var("PINGBACK_URL")
            .context("PINGBACK_URL must be set (public base URL of this server)")?;

        let api_base: String = var_or("API_BASE", "/api/1.0")?;

        let session_cookie_lifetime_secs: i64 = var_or("SESSION_COOKIE_LIFETIME", "2592000")?;
        if !(0..=MAX_LIFETIME_SECS as i64).contains(&session_cookie_lifetime_secs) {
            anyhow::bail!(
                "SESSION_COOKIE_LIFETIME must be between 0 and {} seconds",
                MAX_LIFETIME_SECS
            );
        }

        let session_lifetimes = SessionLifetimes::new(
            var_or("SESSION_PENDING_LIFETIME", "3600")?,
            var_or("SESSION_VALIDATED_LIFETIME", "3600")?,
            var_or("SESSION_EXPIRED_LIFETIME", "3600")?,
        )?;

        let reaper_interval_secs: u64 = var_or("REAPER_INTERVAL_SECS", "10")?;
        if reaper_interval_secs == 0 {
            anyhow::bail!("REAPER_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            database_url: optional_var("DATABASE_URL"),
            bind_addr: var_or("BIND_ADDR", "127.0.0.1:3000")?,
            api_base: api_base.trim_end_matches('/').to_string(),
            admin_app_slug: var_or("ADMIN_APP_SLUG", "sigil-admin")?,
            session_cookie_name: var_or("SESSION_COOKIE_NAME", "sigil-session")?,
            session_cookie_lifetime_secs,
            session_lifetimes,
            pingback_url: pingback_url.trim_end_matches('/').to_string(),
            app_redirect_url: optional_var("APP_REDIRECT_URL"),
            reaper_interval: Duration::from_secs(reaper_interval_secs),
        })
    }

    /// Builds the URL the signer posts its signature to for `session_id`.
    pub fn validation_url(&self, session_id: &str) -> String {
        format!(
            "{}{}/auth/validate/{}",
            self.pingback_url, self.api_base, session_id
        )
    }
}
