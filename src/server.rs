use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, middleware as axum_mw, routing::get, Router};
use tower_http::catch_panic::CatchPanicLayer;

use crate::docs;
use crate::error;
use crate::handlers;
use crate::middleware::{access_log, client, cors, security};
use crate::ratelimit::{self, RateLimiter};
use crate::AppState;

/// Request bodies above this are rejected before a handler runs.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Builds the full pipeline. Layers listed last run first, so a request
/// travels: security headers → CORS → client identity → access log →
/// error funnel → body limit → panic catcher → routing (rate limit for the
/// limited group) → handler.
pub fn create_router(state: Arc<AppState>) -> Router {
    let environment = state.config.environment;

    // ── Exempt from rate limiting ───────────────────────────────
    let exempt = Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(docs::routes(&state.config));

    // ── General zone: everything else, including 404s ───────────
    let limited = Router::new()
        .route("/", get(handlers::welcome))
        .route(
            "/users",
            get(handlers::users::get_users).post(handlers::users::create_user),
        )
        .route(
            "/users/:id",
            get(handlers::users::get_user_by_id)
                .put(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        .fallback(error::not_found);
    let limited = limit_zone(limited, &state.limits.general);

    exempt
        .merge(limited)
        .with_state(Arc::clone(&state))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(CatchPanicLayer::custom(error::panic_to_error))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(axum_mw::from_fn_with_state(environment, error::error_funnel))
        .layer(axum_mw::from_fn_with_state(environment, access_log::access_log))
        .layer(axum_mw::from_fn(client::attach_client_identity))
        .layer(cors(&state.config))
        .layer(axum_mw::from_fn(security::security_headers))
}

/// Puts a route group (and its fallback) behind one rate-limit zone. Use
/// `state.limits.strict` for sensitive groups.
pub fn limit_zone<S>(router: Router<S>, limiter: &Arc<RateLimiter>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(axum_mw::from_fn_with_state(Arc::clone(limiter), ratelimit::enforce))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        extract::ConnectInfo,
        http::{header, HeaderMap, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::ratelimit::MemoryWindowStore;
    use crate::store::MemoryUserStore;

    const CLIENT: &str = "198.51.100.1:40000";

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    fn app_with(vars: &[(&str, &str)]) -> Router {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let config = Config::from_lookup(|name| map.get(name).cloned()).unwrap();
        let state = AppState::new(
            config,
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryWindowStore::new()),
        );
        create_router(Arc::new(state))
    }

    fn app() -> Router {
        app_with(&[])
    }

    async fn send_from(app: &Router, client: &str, method: Method, uri: &str, body: Option<Value>) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri).header(header::HOST, "example.test");
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let mut req = builder.body(body).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(client.parse::<SocketAddr>().unwrap()));

        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Reply { status, headers, body }
    }

    async fn send_raw(app: &Router, method: Method, uri: &str, content_type: Option<&str>, body: &str) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        let mut req = builder.body(Body::from(body.to_owned())).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(CLIENT.parse::<SocketAddr>().unwrap()));

        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply { status, headers, body }
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Reply {
        send_from(app, CLIENT, method, uri, body).await
    }

    fn assert_envelope(reply: &Reply) {
        let success = reply.body["success"].as_bool().expect("success flag");
        assert!(reply.body["message"].is_string(), "{}", reply.body);
        if success {
            assert!(reply.body.get("error").is_none(), "{}", reply.body);
            assert!(reply.body.get("data").is_some(), "{}", reply.body);
        } else {
            assert!(reply.body.get("data").is_none(), "{}", reply.body);
            assert!(reply.body["error"]["message"].is_string(), "{}", reply.body);
        }
    }

    async fn create(app: &Router, name: &str, email: &str) -> Value {
        let reply = send(app, Method::POST, "/users", Some(json!({ "name": name, "email": email }))).await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply.body["data"].clone()
    }

    // ── Users lifecycle ─────────────────────────────────────────

    #[tokio::test]
    async fn create_duplicate_get_delete_scenario() {
        let app = app();
        let body = json!({ "name": "John Doe", "email": "john@example.com" });

        let created = send(&app, Method::POST, "/users", Some(body.clone())).await;
        assert_eq!(created.status, StatusCode::CREATED);
        assert_envelope(&created);
        assert_eq!(created.body["data"]["name"], "John Doe");
        let id = created.body["data"]["id"].as_str().unwrap().to_owned();

        let dup = send(&app, Method::POST, "/users", Some(body)).await;
        assert_eq!(dup.status, StatusCode::BAD_REQUEST);
        assert_envelope(&dup);
        assert!(dup.body["error"]["message"].as_str().unwrap().contains("already exists"));

        let fetched = send(&app, Method::GET, &format!("/users/{id}"), None).await;
        assert_eq!(fetched.status, StatusCode::OK);
        assert_eq!(fetched.body["data"], created.body["data"]);

        let again = send(&app, Method::GET, &format!("/users/{id}"), None).await;
        assert_eq!(again.body["data"], fetched.body["data"]);

        let deleted = send(&app, Method::DELETE, &format!("/users/{id}"), None).await;
        assert_eq!(deleted.status, StatusCode::OK);
        assert_envelope(&deleted);
        assert_eq!(deleted.body["data"], Value::Null);
        assert_eq!(deleted.body["message"], "User deleted successfully");

        let gone = send(&app, Method::GET, &format!("/users/{id}"), None).await;
        assert_eq!(gone.status, StatusCode::NOT_FOUND);
        assert_eq!(gone.body["error"]["message"], "User not found");

        let deleted_twice = send(&app, Method::DELETE, &format!("/users/{id}"), None).await;
        assert_eq!(deleted_twice.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let app = app();
        let first = create(&app, "First", "first@example.com").await;
        let second = create(&app, "Second", "second@example.com").await;

        let reply = send(&app, Method::GET, "/users", None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_envelope(&reply);
        let ids: Vec<_> = reply.body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["id"].clone())
            .collect();
        assert_eq!(ids, [second["id"].clone(), first["id"].clone()]);
    }

    #[tokio::test]
    async fn partial_update_changes_only_given_fields() {
        let app = app();
        let ada = create(&app, "Ada", "ada@example.com").await;
        let id = ada["id"].as_str().unwrap();

        let reply = send(&app, Method::PUT, &format!("/users/{id}"), Some(json!({ "name": "Ada Lovelace" }))).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["data"]["name"], "Ada Lovelace");
        assert_eq!(reply.body["data"]["email"], "ada@example.com");
        assert_eq!(reply.body["data"]["createdAt"], ada["createdAt"]);
    }

    #[tokio::test]
    async fn update_to_taken_email_fails_and_leaves_user_unchanged() {
        let app = app();
        let ada = create(&app, "Ada", "ada@example.com").await;
        create(&app, "Bob", "bob@example.com").await;
        let id = ada["id"].as_str().unwrap();

        let reply = send(
            &app,
            Method::PUT,
            &format!("/users/{id}"),
            Some(json!({ "name": "Renamed", "email": "bob@example.com" })),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_envelope(&reply);
        assert_eq!(reply.body["error"]["message"], "User with this email already exists");

        let current = send(&app, Method::GET, &format!("/users/{id}"), None).await;
        assert_eq!(current.body["data"], ada);
    }

    #[tokio::test]
    async fn update_keeping_own_email_succeeds() {
        let app = app();
        let ada = create(&app, "Ada", "ada@example.com").await;
        let id = ada["id"].as_str().unwrap();

        let reply = send(&app, Method::PUT, &format!("/users/{id}"), Some(json!({ "email": "ada@example.com" }))).await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    }

    #[tokio::test]
    async fn update_and_delete_missing_user_are_not_found() {
        let app = app();
        let id = uuid::Uuid::new_v4();
        let put = send(&app, Method::PUT, &format!("/users/{id}"), Some(json!({ "name": "X" }))).await;
        assert_eq!(put.status, StatusCode::NOT_FOUND);
        let delete = send(&app, Method::DELETE, &format!("/users/{id}"), None).await;
        assert_eq!(delete.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_id_is_bad_request() {
        let app = app();
        let reply = send(&app, Method::GET, "/users/abc", None).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_envelope(&reply);
        assert_eq!(reply.body["error"]["message"], "Invalid id: abc");
    }

    #[tokio::test]
    async fn missing_fields_fail_validation_with_joined_messages() {
        let app = app();
        let reply = send(&app, Method::POST, "/users", Some(json!({}))).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["error"]["message"], "Name is required, Email is required");
    }

    #[tokio::test]
    async fn malformed_json_gets_an_error_envelope() {
        let app = app();
        let mut req = Request::builder()
            .method(Method::POST)
            .uri("/users")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(CLIENT.parse::<SocketAddr>().unwrap()));
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn urlencoded_bodies_are_accepted() {
        let app = app();
        let mut req = Request::builder()
            .method(Method::POST)
            .uri("/users")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("name=Grace+Hopper&email=grace%40example.com"))
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(CLIENT.parse::<SocketAddr>().unwrap()));
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["email"], "grace@example.com");
    }

    #[tokio::test]
    async fn create_without_content_type_fails_validation() {
        let app = app();
        for body in [r#"{"name":"A","email":"a@x"}"#, ""] {
            let reply = send_raw(&app, Method::POST, "/users", None, body).await;
            assert_eq!(reply.status, StatusCode::BAD_REQUEST, "{}", reply.body);
            assert_envelope(&reply);
            assert_eq!(reply.body["error"]["message"], "Name is required, Email is required");
        }
    }

    #[tokio::test]
    async fn create_with_empty_json_body_fails_validation() {
        let app = app();
        let reply = send_raw(&app, Method::POST, "/users", Some("application/json"), "").await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["error"]["message"], "Name is required, Email is required");
    }

    #[tokio::test]
    async fn update_without_content_type_changes_nothing() {
        let app = app();
        let ada = create(&app, "Ada", "ada@example.com").await;
        let id = ada["id"].as_str().unwrap();

        let reply = send_raw(&app, Method::PUT, &format!("/users/{id}"), None, r#"{"name":"Other"}"#).await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        assert_eq!(reply.body["data"]["name"], "Ada");
        assert_eq!(reply.body["data"]["email"], "ada@example.com");
    }

    // ── Unmatched routes and methods ────────────────────────────

    #[tokio::test]
    async fn unknown_route_names_the_path() {
        let app = app();
        let reply = send(&app, Method::GET, "/nonexistent-route", None).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_envelope(&reply);
        assert_eq!(reply.body["error"]["message"], "Route /nonexistent-route not found");
    }

    #[tokio::test]
    async fn unknown_asset_under_docs_gets_an_envelope() {
        let app = app();
        let reply = send(&app, Method::GET, "/api-docs/nope.js", None).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_envelope(&reply);
        assert_eq!(reply.body["error"]["message"], "Route /api-docs/nope.js not found");
        assert_eq!(reply.headers[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn unsupported_method_gets_an_envelope() {
        let app = app();
        let reply = send(&app, Method::PATCH, "/users", None).await;
        assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_envelope(&reply);
    }

    // ── Environment-dependent error detail ──────────────────────

    #[tokio::test]
    async fn development_includes_stack_and_production_hides_it() {
        let dev = app_with(&[("NODE_ENV", "development")]);
        let reply = send(&dev, Method::GET, "/users/abc", None).await;
        assert!(reply.body["error"]["stack"].is_string(), "{}", reply.body);

        let prod = app_with(&[("NODE_ENV", "production")]);
        let reply = send(&prod, Method::GET, "/users/abc", None).await;
        assert!(reply.body["error"].get("stack").is_none(), "{}", reply.body);
        assert_eq!(reply.body["error"]["message"], "Invalid id: abc");
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error_envelope() {
        use crate::config::Environment;

        async fn boom() -> &'static str {
            panic!("kaboom")
        }

        let app = Router::new()
            .route("/boom", get(boom))
            .layer(CatchPanicLayer::custom(error::panic_to_error))
            .layer(axum_mw::from_fn_with_state(Environment::Production, error::error_funnel));

        let reply = send(&app, Method::GET, "/boom", None).await;
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_envelope(&reply);
        assert_eq!(reply.body["error"]["message"], "Internal Server Error");
    }

    // ── Rate limiting ───────────────────────────────────────────

    #[tokio::test]
    async fn hundred_and_first_request_is_rejected() {
        let app = app();
        for _ in 0..100 {
            let reply = send(&app, Method::GET, "/", None).await;
            assert_eq!(reply.status, StatusCode::OK);
        }

        let reply = send(&app, Method::GET, "/users", None).await;
        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        assert_envelope(&reply);
        assert_eq!(
            reply.body["error"]["message"],
            "Too many requests from this IP, please try again later."
        );
        assert_eq!(reply.headers["ratelimit-remaining"], "0");
        assert!(reply.headers.contains_key(header::RETRY_AFTER));

        // Health and docs are outside the zone.
        let health = send(&app, Method::GET, "/health", None).await;
        assert_eq!(health.status, StatusCode::OK);
        let doc = send(&app, Method::GET, "/api-docs/openapi.json", None).await;
        assert_eq!(doc.status, StatusCode::OK);

        // Another client is unaffected.
        let other = send_from(&app, "198.51.100.2:40000", Method::GET, "/", None).await;
        assert_eq!(other.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn counter_resets_after_window() {
        let app = app_with(&[("RATE_LIMIT_WINDOW_MS", "50"), ("RATE_LIMIT_MAX_REQUESTS", "2")]);
        for _ in 0..2 {
            assert_eq!(send(&app, Method::GET, "/", None).await.status, StatusCode::OK);
        }
        assert_eq!(send(&app, Method::GET, "/", None).await.status, StatusCode::TOO_MANY_REQUESTS);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(send(&app, Method::GET, "/", None).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn rate_limit_headers_on_every_limited_response() {
        let app = app();
        let ok = send(&app, Method::GET, "/", None).await;
        assert_eq!(ok.headers["ratelimit-limit"], "100");
        assert_eq!(ok.headers["ratelimit-remaining"], "99");
        assert_eq!(ok.headers["ratelimit-policy"], "100;w=900");
        assert!(ok.headers.contains_key("ratelimit-reset"));
        assert!(ok.headers.keys().all(|k| !k.as_str().starts_with("x-ratelimit")));

        let missing = send(&app, Method::GET, "/nowhere", None).await;
        assert_eq!(missing.headers["ratelimit-remaining"], "98");

        let health = send(&app, Method::GET, "/health", None).await;
        assert!(!health.headers.contains_key("ratelimit-limit"));
    }

    #[tokio::test]
    async fn strict_zone_admits_five_per_window() {
        let state = Arc::new(AppState::new(
            Config::from_lookup(|_| None).unwrap(),
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryWindowStore::new()),
        ));
        let sensitive = Router::new()
            .route("/sensitive", get(|| async { "ok" }))
            .with_state(Arc::clone(&state));
        let app = limit_zone(sensitive, &state.limits.strict)
            .layer(axum_mw::from_fn_with_state(state.config.environment, error::error_funnel));

        for _ in 0..5 {
            let reply = send(&app, Method::GET, "/sensitive", None).await;
            assert_eq!(reply.status, StatusCode::OK);
        }
        let reply = send(&app, Method::GET, "/sensitive", None).await;
        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            reply.body["error"]["message"],
            "Too many authentication attempts, please try again later."
        );

        // The general zone has its own counter for the same client.
        assert!(state.limits.general.check("198.51.100.1").await.unwrap().allowed);
    }

    // ── Ambient endpoints and headers ───────────────────────────

    #[tokio::test]
    async fn health_reports_status_and_environment() {
        let app = app();
        let reply = send(&app, Method::GET, "/health", None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_envelope(&reply);
        assert_eq!(reply.body["message"], "API is healthy");
        assert_eq!(reply.body["data"]["status"], "OK");
        assert_eq!(reply.body["data"]["environment"], "development");
        assert!(reply.body["data"]["uptime"].is_number());
        assert!(reply.body["data"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn welcome_links_to_docs() {
        let app = app_with(&[("API_VERSION", "v3")]);
        let reply = send(&app, Method::GET, "/", None).await;
        assert_envelope(&reply);
        assert_eq!(reply.body["data"]["documentation"], "http://example.test/api-docs");
        assert_eq!(reply.body["data"]["version"], "v3");
    }

    #[tokio::test]
    async fn security_headers_are_on_error_responses_too() {
        let app = app();
        let reply = send(&app, Method::GET, "/nonexistent-route", None).await;
        assert_eq!(reply.headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(reply.headers[header::X_FRAME_OPTIONS], "SAMEORIGIN");
        assert_eq!(reply.headers[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn cors_preflight_echoes_configured_origin() {
        let app = app_with(&[("CORS_ORIGIN", "https://app.example.com")]);
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/users")
            .header(header::ORIGIN, "https://app.example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }
}
