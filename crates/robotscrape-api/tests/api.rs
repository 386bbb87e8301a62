//! End-to-end HTTP tests driving the router with `tower::ServiceExt::oneshot`,
//! backed by a real in-memory store and wiremock stand-ins for the render
//! service and LLM provider so extraction never touches the network.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use robotscrape_api::{build_router, AppState};
use robotscrape_core::config::{BlobStoreConfig, BrowserConfig, ProviderConfig, StoreConfig};
use robotscrape_core::{RobotScrape, RobotScrapeConfig};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn test_app(mock: &MockServer) -> (Arc<AppState>, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut providers = HashMap::new();
    providers.insert(
        "openai".to_string(),
        ProviderConfig {
            api_key: Some(robotscrape_core::config::ConfigValue::Literal("test-key".into())),
            base_url: Some(mock.uri()),
            default_model: Some("gpt-4o-mini".into()),
            fallback_models: vec![],
            api_keys: vec![],
        },
    );

    let config = RobotScrapeConfig {
        server: None,
        store: StoreConfig { url: "sqlite::memory:".into() },
        blob_store: BlobStoreConfig { root: dir.path().to_path_buf() },
        providers,
        browser: BrowserConfig {
            render_endpoint: format!("{}/render", mock.uri()),
            ..BrowserConfig::default()
        },
        rate_limit: Default::default(),
        cache: Default::default(),
        webhooks: None,
        fallback_browser: None,
        auth: Default::default(),
    };

    let robot = RobotScrape::from_config(config).await.unwrap();
    let state = Arc::new(AppState { robot });
    (state, dir)
}

async fn mock_successful_render(mock: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "html": "<html><head><title>Widget</title></head><body><p>Price: $42</p></body></html>",
            "title": "Widget",
            "description": null,
            "screenshotBase64": null,
        })))
        .mount(mock)
        .await;
}

async fn mock_successful_completion(mock: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "{\"price\": \"$42\"}"}}],
            "usage": {"total_tokens": 123},
        })))
        .mount(mock)
        .await;
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let mock = MockServer::start().await;
    let (state, _dir) = test_app(&mock).await;
    let router = build_router(state);

    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], json!(true));
}

#[tokio::test]
async fn extract_without_a_key_is_unauthorized() {
    let mock = MockServer::start().await;
    let (state, _dir) = test_app(&mock).await;
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/extract")
                .header("content-type", "application/json")
                .body(Body::from(json!({"url": "https://example.com", "fields": ["price"]}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("unauthorized"));
}

#[tokio::test]
async fn authenticated_sync_extract_consumes_one_credit() {
    let mock = MockServer::start().await;
    mock_successful_render(&mock).await;
    mock_successful_completion(&mock).await;
    let (state, _dir) = test_app(&mock).await;
    let (raw_key, _) = state.robot.issue_api_key("acme", "default", 5).await.unwrap();
    let router = build_router(state.clone());

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/extract")
                .header("content-type", "application/json")
                .header("x-api-key", &raw_key)
                .body(Body::from(json!({"url": "https://example.com", "fields": ["price"]}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["price"], json!("$42"));

    let key = state.robot.verify_key(&raw_key).await.unwrap();
    assert_eq!(key.remaining_credits, 4);
}

#[tokio::test]
async fn idempotency_key_replays_without_a_second_credit_charge() {
    let mock = MockServer::start().await;
    mock_successful_render(&mock).await;
    mock_successful_completion(&mock).await;
    let (state, _dir) = test_app(&mock).await;
    let (raw_key, _) = state.robot.issue_api_key("acme", "default", 5).await.unwrap();
    let router = build_router(state.clone());

    let make_request = || {
        Request::builder()
            .method("POST")
            .uri("/extract")
            .header("content-type", "application/json")
            .header("x-api-key", &raw_key)
            .header("x-idempotency-key", "retry-123")
            .body(Body::from(json!({"url": "https://example.com", "fields": ["price"]}).to_string()))
            .unwrap()
    };

    let first = router.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router.oneshot(make_request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);

    let key = state.robot.verify_key(&raw_key).await.unwrap();
    assert_eq!(key.remaining_credits, 4, "the replayed request must not consume a second credit");
}

#[tokio::test]
async fn extract_rejects_a_request_with_no_fields_or_schema() {
    let mock = MockServer::start().await;
    let (state, _dir) = test_app(&mock).await;
    let (raw_key, _) = state.robot.issue_api_key("acme", "default", 5).await.unwrap();
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/extract")
                .header("content-type", "application/json")
                .header("x-api-key", &raw_key)
                .body(Body::from(json!({"url": "https://example.com"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn async_extract_returns_a_queued_job_retrievable_by_id() {
    let mock = MockServer::start().await;
    let (state, _dir) = test_app(&mock).await;
    let (raw_key, _) = state.robot.issue_api_key("acme", "default", 5).await.unwrap();
    let router = build_router(state);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/extract")
                .header("content-type", "application/json")
                .header("x-api-key", &raw_key)
                .body(Body::from(json!({"url": "https://example.com", "fields": ["price"], "async": true}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert_eq!(body["status"], json!("queued"));

    let job_response = router
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{job_id}"))
                .header("x-api-key", &raw_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(job_response.status(), StatusCode::OK);
    let job_body = body_json(job_response).await;
    assert_eq!(job_body["data"]["status"], json!("queued"));
}

#[tokio::test]
async fn jobs_owned_by_another_key_are_not_visible() {
    let mock = MockServer::start().await;
    let (state, _dir) = test_app(&mock).await;
    let (alice_key, _) = state.robot.issue_api_key("alice", "default", 5).await.unwrap();
    let (bob_key, _) = state.robot.issue_api_key("bob", "default", 5).await.unwrap();
    let router = build_router(state);

    let submit = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/extract")
                .header("content-type", "application/json")
                .header("x-api-key", &alice_key)
                .body(Body::from(json!({"url": "https://example.com", "fields": ["price"], "async": true}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(submit).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let as_bob = router
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{job_id}"))
                .header("x-api-key", &bob_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(as_bob.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn insufficient_credits_is_rejected_before_any_job_is_created() {
    let mock = MockServer::start().await;
    let (state, _dir) = test_app(&mock).await;
    let (raw_key, _) = state.robot.issue_api_key("acme", "default", 0).await.unwrap();
    let router = build_router(state.clone());

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/extract")
                .header("content-type", "application/json")
                .header("x-api-key", &raw_key)
                .body(Body::from(json!({"url": "https://example.com", "fields": ["price"], "async": true}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert!(state.robot.list_jobs(None, None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn webhook_test_rejects_a_plain_http_target() {
    let mock = MockServer::start().await;
    let (state, _dir) = test_app(&mock).await;
    let (raw_key, _) = state.robot.issue_api_key("acme", "default", 5).await.unwrap();
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/test")
                .header("content-type", "application/json")
                .header("x-api-key", &raw_key)
                .body(Body::from(json!({"url": "http://example.com/hook"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn schedule_crud_round_trip() {
    let mock = MockServer::start().await;
    let (state, _dir) = test_app(&mock).await;
    let (raw_key, _) = state.robot.issue_api_key("acme", "default", 5).await.unwrap();
    let router = build_router(state);

    let create = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/schedules")
                .header("content-type", "application/json")
                .header("x-api-key", &raw_key)
                .body(Body::from(
                    json!({"cron": "0 * * * *", "url": "https://example.com", "fields": ["price"]}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::CREATED);
    let created = body_json(create).await;
    let schedule_id = created["schedule_id"].as_str().unwrap().to_string();

    let patch = router
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/schedules/{schedule_id}"))
                .header("content-type", "application/json")
                .header("x-api-key", &raw_key)
                .body(Body::from(json!({"is_active": false}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(patch.status().is_success());

    let delete = router
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/schedules/{schedule_id}"))
                .header("x-api-key", &raw_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(delete.status().is_success());
}
