//! # Integration Tests for licd-api
//!
//! Drives the assembled router through `tower::ServiceExt::oneshot`:
//! borrow, return and heartbeat flows, capacity exhaustion, status
//! reporting, budget configuration, bearer authentication, request
//! signatures, and the unauthenticated probes.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use licd_api::config::AppConfig;
use licd_api::state::AppState;
use licd_core::ToolName;
use licd_crypto::{sign, signing_payload, VendorSecret};
use licd_state::PoolConfig;
use serde_json::{json, Value};
use tower::ServiceExt;

const CAD: &str = "cad_tool";

/// Helper: state with one tool of total 5, commit 3, max_overage 1 and
/// auth disabled.
fn test_state() -> AppState {
    state_with(AppConfig::default())
}

fn state_with(config: AppConfig) -> AppState {
    let state = AppState::with_config(config, None);
    state
        .coordinator
        .configure_tool(
            &ToolName::new(CAD).unwrap(),
            PoolConfig::new(5, 3, 1).with_prices(1000.0, 100.0),
        )
        .unwrap();
    state
}

fn test_app() -> axum::Router {
    licd_api::app(test_state())
}

/// Helper: read response body as string.
async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::http::Response<Body>) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn borrow(app: &axum::Router, user: &str) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(post_json(
            "/licenses/borrow",
            json!({ "tool": CAD, "user": user }),
        ))
        .await
        .unwrap()
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let response = test_app().oneshot(get("/health/liveness")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe() {
    let response = test_app().oneshot(get("/health/readiness")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

#[tokio::test]
async fn test_version_reports_configured_version() {
    let config = AppConfig {
        app_version: "1.4.2".to_string(),
        ..AppConfig::default()
    };
    let app = licd_api::app(state_with(config));
    let response = app.oneshot(get("/version")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "version": "1.4.2" }));
}

#[tokio::test]
async fn test_metrics_without_recorder_is_unavailable() {
    let response = test_app().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_disabled_is_not_mounted() {
    let config = AppConfig {
        metrics_enabled: false,
        ..AppConfig::default()
    };
    let app = licd_api::app(state_with(config));
    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_with_handle_renders_text() {
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let state = test_state().with_metrics(recorder.handle());
    let response = licd_api::app(state).oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
}

// -- OpenAPI ------------------------------------------------------------------

#[tokio::test]
async fn test_openapi_served_without_auth() {
    let config = AppConfig {
        auth_token: Some("secret".to_string()),
        ..AppConfig::default()
    };
    let app = licd_api::app(state_with(config));
    let response = app.oneshot(get("/openapi.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let spec = body_json(response).await;
    assert!(spec["paths"]["/licenses/borrow"].is_object());
    assert!(spec["paths"]["/config/budget"].is_object());
}

// -- Borrow / Return ----------------------------------------------------------

#[tokio::test]
async fn test_borrow_then_return_restores_capacity() {
    let app = test_app();

    let response = borrow(&app, "alice").await;
    assert_eq!(response.status(), StatusCode::OK);
    let lease = body_json(response).await;
    assert_eq!(lease["tool"], CAD);
    assert_eq!(lease["user"], "alice");
    assert_eq!(lease["capacity_class"], "commit");
    let id = lease["id"].as_str().unwrap().to_string();

    let status = body_json(
        app.clone()
            .oneshot(get("/licenses/cad_tool/status"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status["borrowed"], 1);
    assert_eq!(status["available"], 4);
    assert_eq!(status["in_commit"], true);

    let response = app
        .clone()
        .oneshot(post_json("/licenses/return", json!({ "id": id })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "status": "ok", "tool": CAD })
    );

    let status = body_json(app.oneshot(get("/licenses/cad_tool/status")).await.unwrap()).await;
    assert_eq!(status["borrowed"], 0);
    assert_eq!(status["available"], 5);
}

#[tokio::test]
async fn test_capacity_classes_and_exhaustion() {
    let app = test_app();
    let mut classes = Vec::new();
    for i in 0..6 {
        let response = borrow(&app, &format!("user{i}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        classes.push(body_json(response).await["capacity_class"].as_str().unwrap().to_string());
    }
    assert_eq!(
        classes,
        ["commit", "commit", "commit", "plain", "plain", "overage"]
    );

    let response = borrow(&app, "late").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NO_CAPACITY");

    let status = body_json(app.oneshot(get("/licenses/cad_tool/status")).await.unwrap()).await;
    assert_eq!(status["borrowed"], 6);
    assert_eq!(status["overage"], 1);
    assert_eq!(status["available"], 0);
    assert_eq!(status["overage_borrows"], 1);
    assert_eq!(status["current_overage_cost"], 100.0);
    assert_eq!(status["total_cost"], 1100.0);
}

#[tokio::test]
async fn test_borrow_unknown_tool_returns_404() {
    let response = test_app()
        .oneshot(post_json(
            "/licenses/borrow",
            json!({ "tool": "nope", "user": "alice" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_borrow_blank_user_returns_422() {
    let response = test_app()
        .oneshot(post_json(
            "/licenses/borrow",
            json!({ "tool": CAD, "user": "  " }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_borrow_malformed_json_returns_400() {
    let request = Request::builder()
        .method("POST")
        .uri("/licenses/borrow")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = test_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_double_return_returns_409() {
    let app = test_app();
    let id = body_json(borrow(&app, "alice").await).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    let first = app
        .clone()
        .oneshot(post_json("/licenses/return", json!({ "id": id })))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(post_json("/licenses/return", json!({ "id": id })))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let status = body_json(app.oneshot(get("/licenses/cad_tool/status")).await.unwrap()).await;
    assert_eq!(status["borrowed"], 0);
}

#[tokio::test]
async fn test_return_unknown_lease_returns_404() {
    let response = test_app()
        .oneshot(post_json(
            "/licenses/return",
            json!({ "id": "6f1c2f4e-9a55-4b8e-8d1e-2d1f3c4b5a69" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_return_malformed_id_returns_422() {
    let response = test_app()
        .oneshot(post_json("/licenses/return", json!({ "id": "not-a-uuid" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Heartbeat ----------------------------------------------------------------

#[tokio::test]
async fn test_heartbeat_refreshes_active_lease() {
    let app = test_app();
    let lease = body_json(borrow(&app, "alice").await).await;
    let id = lease["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(post_json("/licenses/heartbeat", json!({ "id": id })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let beat = body_json(response).await;
    assert_eq!(beat["id"], lease["id"]);
    assert!(beat["expires_at"].as_str().unwrap() >= lease["expires_at"].as_str().unwrap());

    app.clone()
        .oneshot(post_json("/licenses/return", json!({ "id": id })))
        .await
        .unwrap();
    let response = app
        .oneshot(post_json("/licenses/heartbeat", json!({ "id": id })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// -- Status -------------------------------------------------------------------

#[tokio::test]
async fn test_status_unknown_tool_returns_404() {
    let response = test_app()
        .oneshot(get("/licenses/unknown/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_all_statuses_ordered_by_name() {
    let state = licd_api::bootstrap::bootstrap(AppConfig::default(), None).unwrap();
    let response = licd_api::app(state)
        .oneshot(get("/licenses/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["tool"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 6);
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[tokio::test]
async fn test_status_path_decodes_tool_with_spaces() {
    let state = licd_api::bootstrap::bootstrap(AppConfig::default(), None).unwrap();
    let response = licd_api::app(state)
        .oneshot(get("/licenses/Vector%20-%20VTT/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["tool"], "Vector - VTT");
    assert_eq!(body["total"], 10);
}

// -- Listings -----------------------------------------------------------------

#[tokio::test]
async fn test_borrows_filtered_by_user() {
    let app = test_app();
    borrow(&app, "alice").await;
    borrow(&app, "bob").await;
    borrow(&app, "alice").await;

    let all = body_json(app.clone().oneshot(get("/borrows")).await.unwrap()).await;
    assert_eq!(all.as_array().unwrap().len(), 3);

    let alice = body_json(app.oneshot(get("/borrows?user=alice")).await.unwrap()).await;
    let alice = alice.as_array().unwrap();
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|l| l["user"] == "alice" && l["state"] == "ACTIVE"));
}

#[tokio::test]
async fn test_overage_charges_recorded_for_overage_borrow() {
    let app = test_app();
    for i in 0..6 {
        borrow(&app, &format!("user{i}")).await;
    }
    let charges = body_json(
        app.clone()
            .oneshot(get("/overage-charges?tool=cad_tool"))
            .await
            .unwrap(),
    )
    .await;
    let charges = charges.as_array().unwrap();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0]["user"], "user5");
    assert_eq!(charges[0]["amount"], 100.0);

    let other = body_json(app.oneshot(get("/overage-charges?tool=other")).await.unwrap()).await;
    assert!(other.as_array().unwrap().is_empty());
}

// -- Budget Configuration -----------------------------------------------------

#[tokio::test]
async fn test_budget_put_creates_tool() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(put_json(
            "/config/budget",
            json!({ "tool": "sim_tool", "total": 2, "commit": 1, "max_overage": 1, "commit_price": 50.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let entry = body_json(response).await;
    assert_eq!(entry["tool"], "sim_tool");
    assert_eq!(entry["borrowed"], 0);

    let budget = body_json(app.clone().oneshot(get("/config/budget")).await.unwrap()).await;
    let tools: Vec<&str> = budget["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["tool"].as_str().unwrap())
        .collect();
    assert_eq!(tools, [CAD, "sim_tool"]);

    let response = app
        .oneshot(post_json(
            "/licenses/borrow",
            json!({ "tool": "sim_tool", "user": "alice" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_budget_put_commit_above_total_returns_422() {
    let response = test_app()
        .oneshot(put_json(
            "/config/budget",
            json!({ "tool": CAD, "total": 2, "commit": 5 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_budget_put_below_borrowed_rejected() {
    let app = test_app();
    for i in 0..3 {
        borrow(&app, &format!("user{i}")).await;
    }
    let response = app
        .clone()
        .oneshot(put_json(
            "/config/budget",
            json!({ "tool": CAD, "total": 1, "commit": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let status = body_json(app.oneshot(get("/licenses/cad_tool/status")).await.unwrap()).await;
    assert_eq!(status["total"], 5);
}

#[tokio::test]
async fn test_budget_put_unknown_field_rejected() {
    let response = test_app()
        .oneshot(put_json(
            "/config/budget",
            json!({ "tool": CAD, "total": 2, "commit": 1, "bogus": true }),
        ))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

// -- Auto-creation ------------------------------------------------------------

#[tokio::test]
async fn test_auto_create_admits_unknown_tool() {
    let config = AppConfig {
        auto_create: Some(PoolConfig::new(2, 1, 0)),
        ..AppConfig::default()
    };
    let app = licd_api::app(AppState::with_config(config, None));
    let response = app
        .clone()
        .oneshot(post_json(
            "/licenses/borrow",
            json!({ "tool": "fresh_tool", "user": "alice" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = body_json(app.oneshot(get("/licenses/fresh_tool/status")).await.unwrap()).await;
    assert_eq!(status["total"], 2);
    assert_eq!(status["borrowed"], 1);
}

// -- Bearer Authentication ----------------------------------------------------

fn auth_app(token: &str) -> axum::Router {
    let config = AppConfig {
        auth_token: Some(token.to_string()),
        ..AppConfig::default()
    };
    licd_api::app(state_with(config))
}

#[tokio::test]
async fn test_auth_rejects_missing_token() {
    let response = auth_app("secret")
        .oneshot(get("/licenses/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_rejects_wrong_token() {
    let request = Request::builder()
        .uri("/licenses/status")
        .header("authorization", "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let response = auth_app("secret").oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_accepts_correct_token() {
    let request = Request::builder()
        .uri("/licenses/status")
        .header("authorization", "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let response = auth_app("secret").oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_does_not_require_auth() {
    let response = auth_app("secret")
        .oneshot(get("/health/liveness"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// -- Request Signatures -------------------------------------------------------

const VENDOR_SECRET: &[u8] = b"vendor-shared-secret";

fn signing_app(token: Option<&str>) -> axum::Router {
    let config = AppConfig {
        auth_token: token.map(str::to_string),
        vendor_secrets: vec![("techvendor".to_string(), VendorSecret::new(VENDOR_SECRET))],
        require_signatures: true,
        ..AppConfig::default()
    };
    licd_api::app(state_with(config))
}

fn now_secs() -> String {
    chrono::Utc::now().timestamp().to_string()
}

fn signed_borrow(signature: &str, timestamp: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/licenses/borrow")
        .header("content-type", "application/json")
        .header("x-signature", signature)
        .header("x-timestamp", timestamp)
        .header("x-vendor-id", "techvendor");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(json!({ "tool": CAD, "user": "alice" }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_unsigned_borrow_rejected_when_required() {
    let response = borrow(&signing_app(None), "alice").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_signature_admits_borrow() {
    let ts = now_secs();
    let signature = sign(VENDOR_SECRET, &signing_payload(CAD, "alice", &ts, None)).unwrap();
    let response = signing_app(None)
        .oneshot(signed_borrow(&signature, &ts, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_signature_binds_bearer_token() {
    let ts = now_secs();
    let with_key = sign(
        VENDOR_SECRET,
        &signing_payload(CAD, "alice", &ts, Some("secret")),
    )
    .unwrap();
    let response = signing_app(Some("secret"))
        .oneshot(signed_borrow(&with_key, &ts, Some("secret")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let without_key = sign(VENDOR_SECRET, &signing_payload(CAD, "alice", &ts, None)).unwrap();
    let response = signing_app(Some("secret"))
        .oneshot(signed_borrow(&without_key, &ts, Some("secret")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_signature_rejected() {
    let ts = now_secs();
    let signature = sign(VENDOR_SECRET, &signing_payload(CAD, "mallory", &ts, None)).unwrap();
    let response = signing_app(None)
        .oneshot(signed_borrow(&signature, &ts, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stale_signature_rejected() {
    let ts = (chrono::Utc::now().timestamp() - 3600).to_string();
    let signature = sign(VENDOR_SECRET, &signing_payload(CAD, "alice", &ts, None)).unwrap();
    let response = signing_app(None)
        .oneshot(signed_borrow(&signature, &ts, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
