use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use k256::ecdsa::{Signature, SigningKey, signature::Signer};
use serde_json::{Value, json};
use tower::ServiceExt;

use sigil::{
    AppState, Config,
    config::SessionLifetimes,
    models::{app::App, user::User},
    repositories::{AppRepository, UserRepository, memory::MemoryStore},
    services::session as session_service,
};

const BASE: &str = "/api/1.0";

struct Reply {
    status: StatusCode,
    headers: axum::http::HeaderMap,
    body: Value,
}

impl Reply {
    /// The `name=value` pair of the first `Set-Cookie`, ready to send back.
    fn cookie(&self) -> String {
        let set_cookie = self.headers[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }
}

// Shared test context
struct TestContext {
    router: Router,
    store: MemoryStore,
    demo: App,
    user: User,
    key: SigningKey,
    public_key: String,
}

fn test_config() -> Config {
    Config {
        database_url: None,
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        api_base: BASE.to_string(),
        admin_app_slug: "sigil-admin".to_string(),
        session_cookie_name: "sigil-session".to_string(),
        session_cookie_lifetime_secs: 3600,
        session_lifetimes: SessionLifetimes::default(),
        pingback_url: "https://auth.test".to_string(),
        app_redirect_url: Some("https://get.sigil.test/".to_string()),
        reaper_interval: Duration::from_secs(10),
    }
}

fn public_key_of(key: &SigningKey) -> String {
    let point = key.verifying_key().to_encoded_point(false);
    hex::encode(&point.as_bytes()[1..])
}

fn sign(key: &SigningKey, message: &str) -> String {
    let signature: Signature = key.sign(message.as_bytes());
    hex::encode(signature.to_bytes())
}

impl TestContext {
    async fn new() -> Self {
        let store = MemoryStore::new();
        let state = AppState::with_store(test_config(), Arc::new(store.clone()));
        state.bootstrap_admin_app().await.unwrap();

        let demo = store.insert_app("demo", &["".to_string()]).await.unwrap();
        let key = SigningKey::from_slice(&[42u8; 32]).unwrap();
        let public_key = public_key_of(&key);
        let user = store.insert_user("Ada", &public_key, None).await.unwrap();
        store.subscribe_user_to_app(user.id, demo.id).await.unwrap();

        Self {
            router: sigil::router(state),
            store,
            demo,
            user,
            key,
            public_key,
        }
    }

    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn get(&self, path: &str, cookie: Option<&str>) -> Reply {
        let mut request = Request::builder().uri(format!("{BASE}{path}"));
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Reply {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("{BASE}{path}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn validate(&self, session_id: &str, key: &SigningKey) -> Reply {
        let message = format!("login:{session_id}");
        self.post_json(
            &format!("/auth/validate/{session_id}"),
            json!({
                "signature": sign(key, &message),
                "message": message,
                "public_key": public_key_of(key),
            }),
        )
        .await
    }

    /// Starts a login for `app_slug`; returns the create reply.
    async fn create(&self, app_slug: &str, cookie: Option<&str>) -> Reply {
        self.get(&format!("/auth/create/{app_slug}"), cookie).await
    }
}

fn session_id(reply: &Reply) -> String {
    reply.body["session"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_create_session_returns_a_login_challenge() {
    let context = TestContext::new().await;

    let created = context.create("demo", None).await;

    assert_eq!(created.status, StatusCode::OK);
    assert_eq!(created.body["session"]["status"], "PENDING");
    let id = session_id(&created);
    assert_eq!(id.len(), 64);

    let url = created.body["login"]["url"].as_str().unwrap();
    assert_eq!(url, format!("https://auth.test{BASE}/auth/validate/{id}"));
    assert!(
        created.body["login"]["qr"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,")
    );

    let set_cookie = created.headers[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains(&id));
    assert!(set_cookie.contains("Secure"));
    assert!(set_cookie.contains("SameSite=None"));
    assert!(set_cookie.contains("Partitioned"));
    assert!(!set_cookie.contains("HttpOnly"));

    // Same-origin app: no CORS header.
    assert!(!created.headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn test_polling_keeps_the_same_pending_session() {
    let context = TestContext::new().await;

    let first = context.create("demo", None).await;
    let cookie = first.cookie();
    let second = context.create("demo", Some(&cookie)).await;
    let forced = context
        .get("/auth/create/demo?force-recreation", Some(&cookie))
        .await;

    assert_eq!(session_id(&first), session_id(&second));
    // PENDING sessions are never force-recreated.
    assert_eq!(session_id(&first), session_id(&forced));
}

#[tokio::test]
async fn test_signed_validation_logs_the_browser_in() {
    let context = TestContext::new().await;

    // Step 1: the browser starts a login
    let created = context.create("demo", None).await;
    let cookie = created.cookie();
    let id = session_id(&created);

    // Step 2: the signer posts its signature
    let validated = context.validate(&id, &context.key).await;
    assert_eq!(validated.status, StatusCode::OK);
    assert_eq!(validated.body, json!({ "message": "Login successful" }));

    // Step 3: the browser's next poll sees the user
    let tracked = context.get("/auth/track/demo", Some(&cookie)).await;
    assert_eq!(tracked.status, StatusCode::OK);
    assert_eq!(tracked.body["session"]["status"], "VALIDATED");
    assert_eq!(tracked.body["user"]["publicKey"], context.public_key);

    // Step 4: create now answers with the user instead of a challenge
    let again = context.create("demo", Some(&cookie)).await;
    assert_eq!(session_id(&again), id);
    assert_eq!(again.body["user"]["id"], context.user.id);
    assert!(again.body.get("login").is_none());

    // Step 5: a second signature for the same session is refused
    let replayed = context.validate(&id, &context.key).await;
    assert_eq!(replayed.status, StatusCode::FORBIDDEN);
    assert_eq!(replayed.body["code"], "invalid_session");
}

#[tokio::test]
async fn test_force_recreation_replaces_a_validated_session() {
    let context = TestContext::new().await;
    let created = context.create("demo", None).await;
    let cookie = created.cookie();
    context.validate(&session_id(&created), &context.key).await;

    let forced = context
        .get("/auth/create/demo?force-recreation", Some(&cookie))
        .await;

    assert_ne!(session_id(&forced), session_id(&created));
    assert_eq!(forced.body["session"]["status"], "PENDING");
}

#[tokio::test]
async fn test_invalid_signature_leaves_the_session_pending() {
    let context = TestContext::new().await;
    let created = context.create("demo", None).await;
    let cookie = created.cookie();
    let id = session_id(&created);

    let message = format!("login:{id}");
    let mut signature = sign(&context.key, &message).into_bytes();
    signature[10] = if signature[10] == b'0' { b'1' } else { b'0' };

    let rejected = context
        .post_json(
            &format!("/auth/validate/{id}"),
            json!({
                "signature": String::from_utf8(signature).unwrap(),
                "message": message,
                "public_key": context.public_key,
            }),
        )
        .await;
    assert_eq!(rejected.status, StatusCode::FORBIDDEN);
    assert_eq!(rejected.body, json!({ "code": "invalid_signature" }));

    let tracked = context.get("/auth/track/demo", Some(&cookie)).await;
    assert_eq!(tracked.body["session"]["status"], "PENDING");
}

#[tokio::test]
async fn test_validation_requires_a_known_subscribed_user() {
    let context = TestContext::new().await;
    let id = session_id(&context.create("demo", None).await);

    let stranger = SigningKey::from_slice(&[7u8; 32]).unwrap();
    let unknown = context.validate(&id, &stranger).await;
    assert_eq!(unknown.status, StatusCode::FORBIDDEN);
    assert_eq!(unknown.body["code"], "invalid_user");

    context
        .store
        .insert_user("Bob", &public_key_of(&stranger), None)
        .await
        .unwrap();
    let unsubscribed = context.validate(&id, &stranger).await;
    assert_eq!(unsubscribed.status, StatusCode::FORBIDDEN);
    assert_eq!(unsubscribed.body["code"], "user_does_not_subscribes");
}

#[tokio::test]
async fn test_malformed_validation_payload() {
    let context = TestContext::new().await;
    let id = session_id(&context.create("demo", None).await);

    let missing = context
        .post_json(
            &format!("/auth/validate/{id}"),
            json!({ "signature": "00", "message": "hi" }),
        )
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing.body["code"], "payload_parse_error");

    let empty = context
        .post_json(
            &format!("/auth/validate/{id}"),
            json!({ "signature": "", "message": "hi", "public_key": context.public_key }),
        )
        .await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty.body["code"], "payload_parse_error");
}

#[tokio::test]
async fn test_track_rejects_a_user_who_lost_the_subscription() {
    let context = TestContext::new().await;
    let created = context.create("demo", None).await;
    let cookie = created.cookie();

    // Bound to a user that does not subscribe to demo.
    let outsider = context
        .store
        .insert_user("Eve", &"ab".repeat(64), None)
        .await
        .unwrap();
    session_service::validate_session(&context.store, &session_id(&created), outsider.id)
        .await
        .unwrap();

    let tracked = context.get("/auth/track/demo", Some(&cookie)).await;
    assert_eq!(tracked.status, StatusCode::FORBIDDEN);
    assert_eq!(tracked.body["code"], "user_does_not_subscribes");
}

#[tokio::test]
async fn test_track_without_session_reports_expired() {
    let context = TestContext::new().await;

    let tracked = context.get("/auth/track/demo", None).await;

    assert_eq!(tracked.status, StatusCode::OK);
    assert_eq!(tracked.body, json!({ "session": { "status": "EXPIRED" } }));
}

#[tokio::test]
async fn test_logout_expires_the_session() {
    let context = TestContext::new().await;
    let created = context.create("demo", None).await;
    let cookie = created.cookie();
    context.validate(&session_id(&created), &context.key).await;

    let logout = Request::builder()
        .method(Method::POST)
        .uri(format!("{BASE}/auth/logout/demo"))
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let logged_out = context.send(logout).await;
    assert_eq!(logged_out.body, json!({ "status": "success" }));
    let removal = logged_out.headers[header::SET_COOKIE].to_str().unwrap();
    let name = cookie.split('=').next().unwrap();
    assert!(removal.starts_with(&format!("{name}=;")), "{removal}");
    for attribute in ["Path=/", "Secure", "SameSite=None", "Partitioned", "Max-Age=0"] {
        assert!(removal.contains(attribute), "{removal} lacks {attribute}");
    }

    let tracked = context.get("/auth/track/demo", Some(&cookie)).await;
    assert_eq!(tracked.body["session"]["status"], "EXPIRED");

    // An expired cookie gets a brand new session.
    let recreated = context.create("demo", Some(&cookie)).await;
    assert_ne!(session_id(&recreated), session_id(&created));

    let anonymous = Request::builder()
        .method(Method::POST)
        .uri(format!("{BASE}/auth/logout/demo"))
        .body(Body::empty())
        .unwrap();
    let nothing = context.send(anonymous).await;
    assert_eq!(nothing.body, json!({ "status": "could_not_log_out" }));
}

#[tokio::test]
async fn test_verify_session_is_for_servers_only() {
    let context = TestContext::new().await;
    let id = session_id(&context.create("demo", None).await);
    context.validate(&id, &context.key).await;

    let browser = Request::builder()
        .uri(format!("{BASE}/auth/verify-session/{id}"))
        .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0")
        .body(Body::empty())
        .unwrap();
    let denied = context.send(browser).await;
    assert_eq!(denied.status, StatusCode::BAD_REQUEST);
    assert_eq!(denied.body["code"], "browsers_denied");

    let server = Request::builder()
        .uri(format!("{BASE}/auth/verify-session/{id}"))
        .header(header::USER_AGENT, "demo-backend/1.0")
        .body(Body::empty())
        .unwrap();
    let verified = context.send(server).await;
    assert_eq!(verified.status, StatusCode::OK);
    assert_eq!(verified.body["session"]["status"], "VALIDATED");
    assert_eq!(verified.body["app"]["slug"], "demo");
    assert_eq!(verified.body["user"]["id"], context.user.id);
    assert_eq!(verified.body["subscribes"], true);

    let missing = context.get("/auth/verify-session/nope", None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.body["code"], "session_not_found");
}

#[tokio::test]
async fn test_validation_link_redirects_plain_scans() {
    let context = TestContext::new().await;

    let reply = context.get("/auth/validate/whatever", None).await;

    assert_eq!(reply.status, StatusCode::FOUND);
    assert_eq!(reply.headers[header::LOCATION], "https://get.sigil.test/");
}

#[tokio::test]
async fn test_admin_api_is_scoped_to_admin_subscribers() {
    let context = TestContext::new().await;

    // Step 1: no session at all
    let anonymous = context.get("/apps/", None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.body["code"], "invalid_session");

    // Step 2: a validated demo session does not open the admin scope
    let demo = context.create("demo", None).await;
    context.validate(&session_id(&demo), &context.key).await;
    let demo_cookie = demo.cookie().replacen("demo", "sigil-admin", 1);
    let replayed = context.get("/apps/", Some(&demo_cookie)).await;
    assert_eq!(replayed.status, StatusCode::UNAUTHORIZED);

    // Step 3: an admin subscriber logs into the admin app
    let admin = context
        .store
        .find_app_by_slug("sigil-admin")
        .await
        .unwrap()
        .unwrap();
    context
        .store
        .subscribe_user_to_app(context.user.id, admin.id)
        .await
        .unwrap();
    let login = context.create("sigil-admin", None).await;
    let cookie = login.cookie();
    context.validate(&session_id(&login), &context.key).await;

    let apps = context.get("/apps/", Some(&cookie)).await;
    assert_eq!(apps.status, StatusCode::OK);
    let listed = apps.body.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    let locked: Vec<bool> = listed
        .iter()
        .map(|app| app["locked"].as_bool().unwrap())
        .collect();
    assert_eq!(locked, vec![true, false]);
    assert_eq!(listed[1]["slug"], context.demo.slug);

    let users = context.get("/users/", Some(&cookie)).await;
    assert_eq!(users.status, StatusCode::OK);
    assert_eq!(users.body[0]["name"], "Ada");
}

#[tokio::test]
async fn test_cross_origin_apps_get_cors_headers() {
    let context = TestContext::new().await;
    context
        .store
        .insert_app("widget", &["https://x.test".to_string()])
        .await
        .unwrap();

    let allowed = Request::builder()
        .uri(format!("{BASE}/auth/create/widget"))
        .header(header::ORIGIN, "https://x.test")
        .body(Body::empty())
        .unwrap();
    let reply = context.send(allowed).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://x.test");
    assert_eq!(reply.headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri(format!("{BASE}/auth/track/widget"))
        .header(header::ORIGIN, "https://x.test")
        .body(Body::empty())
        .unwrap();
    let reply = context.send(preflight).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://x.test");
    assert!(reply.headers.contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));

    let foreign = Request::builder()
        .uri(format!("{BASE}/auth/create/widget"))
        .header(header::ORIGIN, "https://y.test")
        .body(Body::empty())
        .unwrap();
    let reply = context.send(foreign).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["code"], "unauthorized_session");

    let unknown = context.create("nope", None).await;
    assert_eq!(unknown.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_login_script_targets_the_public_api() {
    let context = TestContext::new().await;

    let request = Request::builder()
        .uri(format!("{BASE}/sigil-login.js"))
        .body(Body::empty())
        .unwrap();
    let response = context.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/javascript; charset=utf-8"
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let script = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(script.contains(r#""https://auth.test/api/1.0/""#));
    assert!(script.contains("window.SigilLogin"));
    assert!(script.contains("auth/track/"));
}
