//! HTTP API surface — router assembly and the middleware pipeline.

pub mod auth;
pub mod cors;
pub mod database;
pub mod error;
pub mod request_id;
pub mod scans;
pub mod security;
pub mod volumes;

use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use error::ApiError;

/// Handler-level deadline for every non-streaming request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request bodies are small JSON documents.
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/database/migrations/apply", post(database::apply_migrations))
        .route(
            "/database/migrations/{version}/rollback",
            post(database::rollback_migration),
        );

    Router::new()
        .nest(&state.config.http.url_base, api)
        .route("/health", get(health))
        .layer(
            // Outer to inner: request identity first, then the security and
            // CORS gates, optional redirect, then authentication.
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id::request_id_middleware))
                .layer(middleware::from_fn(security::security_headers_middleware))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    cors::cors_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    security::https_redirect_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::auth_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::protect_mutations_middleware,
                ))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    REQUEST_TIMEOUT,
                ))
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

/// Liveness probe.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "events_connected": state.ingester.is_connected(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::{mint_token, Role};
    use crate::config::AppConfig;
    use crate::docker::MockRuntimeClient;
    use crate::store::MigrationManager;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use std::time::Duration as StdDuration;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn test_config() -> AppConfig {
        AppConfig {
            http: crate::config::HttpConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                url_base: "/api/v1".to_string(),
                cors_allowed_origins: vec!["http://allowed.example".to_string()],
                cors_max_age_seconds: 600,
                https_redirect: false,
            },
            auth: crate::config::AuthConfig {
                enabled: false,
                hs256_secret: SECRET.to_string(),
                required_role: "operator".to_string(),
            },
            db: crate::config::DbConfig {
                dsn: "sqlite::memory:".to_string(),
                max_open: 1,
                max_idle: 1,
                conn_max_lifetime: StdDuration::from_secs(600),
            },
            runtime: crate::config::RuntimeConfig {
                host: String::new(),
                timeout: StdDuration::from_secs(5),
            },
            events: crate::config::EventsConfig {
                enabled: false,
                queue_size: 16,
                backoff_min: StdDuration::from_millis(10),
                backoff_max: StdDuration::from_millis(50),
                reconcile_interval: StdDuration::from_secs(600),
                shutdown_grace: StdDuration::from_secs(1),
            },
            scan: crate::config::ScanConfig {
                default_timeout: StdDuration::from_secs(5),
                max_concurrent: 2,
                cache_ttl: StdDuration::from_secs(60),
                cache_capacity: 16,
            },
            migrations_dir: concat!(env!("CARGO_MANIFEST_DIR"), "/migrations").to_string(),
        }
    }

    async fn test_state(config: AppConfig, runtime: MockRuntimeClient) -> AppState {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        MigrationManager::new(pool.clone(), &config.migrations_dir)
            .apply_all_pending()
            .await
            .unwrap();
        AppState::new(config, std::sync::Arc::new(runtime), pool)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(get_request("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_list_volumes_empty_page_envelope() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(get_request("/api/v1/volumes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["page"], 1);
        assert_eq!(body["page_size"], 25);
        assert_eq!(body["total"], 0);
        assert_eq!(body["sort"], "name:asc");
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_volumes_bad_sort_is_400() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(get_request("/api/v1/volumes?sort=password:asc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_unknown_volume_is_404_with_request_id() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/volumes/ghost")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "VOLUME_NOT_FOUND");
        assert_eq!(body["error"]["request_id"], "req-42");
    }

    #[tokio::test]
    async fn test_security_headers_on_api_responses() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(get_request("/api/v1/volumes"))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert!(response.headers().get("server").is_none());
    }

    #[tokio::test]
    async fn test_cors_disallowed_origin_is_403() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/volumes")
                    .header(header::ORIGIN, "http://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "CORS_DENIED");
    }

    #[tokio::test]
    async fn test_cors_preflight_allowed_origin() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/volumes")
                    .header(header::ORIGIN, "http://allowed.example")
                    .header("access-control-request-method", "GET")
                    .header("access-control-request-headers", "content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "http://allowed.example"
        );
        assert_eq!(
            response.headers().get("access-control-max-age").unwrap(),
            "600"
        );
    }

    #[tokio::test]
    async fn test_cors_preflight_bad_header_denied() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/volumes")
                    .header(header::ORIGIN, "http://allowed.example")
                    .header("access-control-request-method", "GET")
                    .header("access-control-request-headers", "x-evil-header")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "CORS_PREFLIGHT_DENIED");
    }

    fn auth_config() -> AppConfig {
        let mut config = test_config();
        config.auth.enabled = true;
        config
    }

    #[tokio::test]
    async fn test_auth_missing_header() {
        let state = test_state(auth_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(get_request("/api/v1/volumes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "MISSING_AUTH_HEADER");
    }

    #[tokio::test]
    async fn test_auth_bad_scheme() {
        let state = test_state(auth_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/volumes")
                    .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "INVALID_AUTH_FORMAT");
    }

    #[tokio::test]
    async fn test_auth_expired_token() {
        let state = test_state(auth_config(), MockRuntimeClient::new()).await;
        let token = mint_token(SECRET, Role::Admin, -600);
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/volumes")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_viewer_can_read_but_not_mutate() {
        let state = test_state(auth_config(), MockRuntimeClient::new()).await;
        let router = build_router(state);
        let token = mint_token(SECRET, Role::Viewer, 600);

        let read = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/volumes")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(read.status(), StatusCode::OK);

        let write = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/database/migrations/apply")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(write.status(), StatusCode::FORBIDDEN);
        let body = json_body(write).await;
        assert_eq!(body["error"]["code"], "INSUFFICIENT_PERMISSIONS");
    }

    #[tokio::test]
    async fn test_operator_reaches_mutation_handler() {
        let state = test_state(auth_config(), MockRuntimeClient::new()).await;
        let token = mint_token(SECRET, Role::Operator, 600);

        // Schema is already current, so the handler answers 400 NO_PENDING —
        // the role guard let the request through.
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/database/migrations/apply")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "NO_PENDING_MIGRATIONS");
    }

    #[tokio::test]
    async fn test_rollback_unknown_version_is_404() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/database/migrations/999/rollback")
                    .header("x-request-id", "req-mig")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "MIGRATION_NOT_FOUND");
        assert_eq!(body["error"]["request_id"], "req-mig");
    }

    #[tokio::test]
    async fn test_db_health_is_200() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(get_request("/api/v1/database/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["status"] == "healthy" || body["status"] == "degraded");
    }

    #[tokio::test]
    async fn test_migration_status_endpoint() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(get_request("/api/v1/database/migrations/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 3);
        assert_eq!(body["applied"], 3);
        assert_eq!(body["pending"], 0);
    }

    #[tokio::test]
    async fn test_refresh_unknown_volume_is_404() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/volumes/ghost/size/refresh")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"async": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_async_refresh_returns_scan_id() {
        let dir = tempfile::tempdir().unwrap();
        let mountpoint = dir.path().to_path_buf();
        let mut runtime = MockRuntimeClient::new();
        runtime.expect_inspect_volume().returning(move |name| {
            Ok(crate::docker::VolumeInfo {
                name: name.to_string(),
                driver: "local".to_string(),
                mountpoint: mountpoint.display().to_string(),
                labels: Default::default(),
                options: Default::default(),
                scope: "local".to_string(),
                created_at: None,
            })
        });

        let state = test_state(test_config(), runtime).await;
        state
            .store
            .volumes
            .upsert(&crate::store::model::NewVolume {
                volume_id: "v1".to_string(),
                name: "v1".to_string(),
                driver: "local".to_string(),
                mountpoint: dir.path().display().to_string(),
                labels: Default::default(),
                options: Default::default(),
                scope: "local".to_string(),
                status: String::new(),
            })
            .await
            .unwrap();

        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/volumes/v1/size/refresh")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"async": true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert!(body["scan_id"].as_str().unwrap().starts_with("scan_v1_"));
        assert_eq!(body["volume_id"], "v1");
        assert_eq!(body["status"], "queued");
    }

    #[tokio::test]
    async fn test_bulk_scan_caps_request_size() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let ids: Vec<String> = (0..150).map(|i| format!("v{i}")).collect();
        let payload = serde_json::json!({ "volume_ids": ids }).to_string();

        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/volumes/bulk-scan")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_scan_methods_listing() {
        let state = test_state(test_config(), MockRuntimeClient::new()).await;
        let response = build_router(state)
            .oneshot(get_request("/api/v1/scan/methods"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["diskus", "du", "native"]);
    }
}
