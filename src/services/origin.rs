//! Per-app origin scoping and CORS.
//!
//! An app lists the browser origins allowed to act on its behalf. Entries are
//! compared on `host[:port]`, lowercased; a leading `*.` label matches any
//! subdomain. A single empty entry means "same origin only": the request is
//! let through and no CORS header is emitted, leaving enforcement to the
//! browser.

use http::{HeaderMap, HeaderValue, Method, header};

use crate::error::{AppError, Result};
use crate::repositories::AppRepository;
use crate::request::InboundRequest;

/// Methods advertised to browsers on CORS responses.
pub const ALLOWED_METHODS: &str = "GET, POST, PATCH, DELETE, OPTIONS";
/// Headers advertised to browsers on CORS responses.
pub const ALLOWED_HEADERS: &str = "Content-Type, Authorization, *";

/// Outcome of the origin check for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginCheck {
    /// Unknown app, or origin not in the allow-list.
    Denied,
    /// The app is same-origin only; no CORS headers are issued.
    SameOrigin,
    /// The full origin (`scheme://host[:port]`) to echo back.
    Allowed(String),
}

impl OriginCheck {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, OriginCheck::Denied)
    }
}

/// What the caller should do after the origin and CORS step.
#[derive(Debug, Clone)]
pub enum Admission {
    /// An `OPTIONS` preflight: answer 200 with these headers and stop.
    Preflight(HeaderMap),
    /// Run the handler and attach these headers to its response.
    Proceed(HeaderMap),
}

/// The origin of the request: `Origin`, else `scheme://Host`, else `Referer`.
///
/// A `Referer` is reduced to its `scheme://host[:port]` part.
pub fn request_origin<R: InboundRequest + ?Sized>(request: &R) -> Option<String> {
    if let Some(origin) = request.header(header::ORIGIN) {
        return Some(origin.to_string());
    }
    if let Some(host) = request.header(header::HOST) {
        return Some(format!("{}://{}", request.scheme(), host));
    }
    request.header(header::REFERER).map(|referer| {
        match referer.split_once("://") {
            Some((scheme, rest)) => {
                format!("{}://{}", scheme, rest.split('/').next().unwrap_or_default())
            }
            None => referer.to_string(),
        }
    })
}

/// Reduces an origin or an allow-list entry to lowercase `host[:port]`.
pub fn origin_host(origin: &str) -> String {
    let without_scheme = match origin.split_once("://") {
        Some((_, rest)) => rest,
        None => origin,
    };
    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Whether `host` (already reduced) matches the allow-list `entry`.
pub fn host_matches(entry: &str, host: &str) -> bool {
    let pattern = origin_host(entry);
    if pattern.is_empty() || host.is_empty() {
        return false;
    }
    match pattern.strip_prefix("*.") {
        Some(suffix) => {
            host.len() > suffix.len() + 1
                && host.ends_with(suffix)
                && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
        }
        None => pattern == host,
    }
}

/// Checks that the request comes from an origin `app_slug` has allow-listed.
///
/// An app with an empty allow-list is a configuration error, reported as an
/// infrastructure failure instead of a silent allow.
pub async fn check_request_origin_for_app<S, R>(
    store: &S,
    request: &R,
    app_slug: &str,
) -> Result<OriginCheck>
where
    S: AppRepository + ?Sized,
    R: InboundRequest + ?Sized,
{
    let Some(app) = store.find_app_by_slug(app_slug).await? else {
        tracing::debug!("Origin check for unknown app {}", app_slug);
        return Ok(OriginCheck::Denied);
    };

    if app.allowed_hosts.is_empty() {
        return Err(AppError::infra(
            "invalid_app_allowed_hosts",
            "ConfigurationError",
            anyhow::anyhow!("app {} has no allowed hosts", app.slug),
        ));
    }

    if app.is_same_origin_only() {
        return Ok(OriginCheck::SameOrigin);
    }

    let Some(origin) = request_origin(request) else {
        return Ok(OriginCheck::Denied);
    };
    let host = origin_host(&origin);

    if app.allowed_hosts.iter().any(|entry| host_matches(entry, &host)) {
        Ok(OriginCheck::Allowed(origin))
    } else {
        tracing::debug!("Origin {} is not allowed for app {}", host, app.slug);
        Ok(OriginCheck::Denied)
    }
}

/// Builds the CORS headers for `origin` and decides whether to continue.
///
/// Preflights are answered immediately; everything else proceeds.
pub fn inject_cors_headers(method: &Method, origin: &str, allow_credentials: bool) -> Admission {
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
    if allow_credentials {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );

    if method == Method::OPTIONS {
        Admission::Preflight(headers)
    } else {
        Admission::Proceed(headers)
    }
}

/// Origin check followed by CORS injection.
///
/// A denied origin fails with 403 `unauthorized_session`.
pub async fn check_request_origin_for_app_and_validate_cors<S, R>(
    store: &S,
    request: &R,
    app_slug: &str,
) -> Result<Admission>
where
    S: AppRepository + ?Sized,
    R: InboundRequest + ?Sized,
{
    match check_request_origin_for_app(store, request, app_slug).await? {
        OriginCheck::Denied => Err(AppError::Forbidden {
            code: "unauthorized_session",
        }),
        OriginCheck::SameOrigin if request.method() == Method::OPTIONS => {
            Ok(Admission::Preflight(HeaderMap::new()))
        }
        OriginCheck::SameOrigin => Ok(Admission::Proceed(HeaderMap::new())),
        OriginCheck::Allowed(origin) => Ok(inject_cors_headers(request.method(), &origin, true)),
    }
}
