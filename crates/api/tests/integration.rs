//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server,
//! backed by the in-memory notification store.
//!
//! ```bash
//! cargo test -p beacon-api --test integration
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use beacon_api::routes::create_router;
use beacon_api::state::AppState;
use beacon_common::types::{NotificationPayload, Target};
use beacon_notifier::backend::{BackendError, PushBackend};
use beacon_notifier::memory_store::MemoryNotificationStore;
use beacon_notifier::service::{NotificationService, NotifierConfig};

// ============================================================
// Helpers
// ============================================================

/// Fails the first `failures` deliveries with `error`, then accepts.
struct StubBackend {
    failures: u32,
    error: &'static str,
    calls: AtomicU32,
}

#[async_trait]
impl PushBackend for StubBackend {
    async fn deliver(
        &self,
        _target: &Target,
        _payload: &NotificationPayload,
        _project_id: Option<&str>,
    ) -> Result<(), BackendError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(BackendError::Rejected(self.error.to_string()));
        }
        Ok(())
    }
}

fn build_app(failures: u32, error: &'static str) -> (Router, Arc<MemoryNotificationStore>) {
    let store = Arc::new(MemoryNotificationStore::new());
    let backend = Arc::new(StubBackend {
        failures,
        error,
        calls: AtomicU32::new(0),
    });
    let notifier = Arc::new(NotificationService::new(
        NotifierConfig::default(),
        store.clone(),
        backend,
    ));
    (create_router(AppState::new(notifier)), store)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================
// Route tests
// ============================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = build_app(0, "");
    let (status, json) = send(app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "beacon-api");
    assert_eq!(json["queue_length"], 0);
}

#[tokio::test]
async fn test_send_delivers_immediately() {
    let (app, _) = build_app(0, "");
    let body = serde_json::json!({
        "target": {"kind": "role", "role": "agent"},
        "payload": {"title": "New project", "body": "A project needs review"},
        "priority": "high"
    });

    let (status, json) = send(app, post_json("/api/notifications", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["immediate"], true);
    assert!(json["queue_id"].is_null());
}

#[tokio::test]
async fn test_send_failure_is_queued() {
    let (app, _) = build_app(1, "Failed to send a request to the Edge Function");
    let body = serde_json::json!({
        "target": {"kind": "users", "ids": ["u1"]},
        "payload": {"title": "Quote", "body": "Quote received"}
    });

    let (status, json) = send(app.clone(), post_json("/api/notifications", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["immediate"], false);
    assert!(json["queue_id"].is_string());
    assert!(json["error"]
        .as_str()
        .unwrap()
        .starts_with("Queued after initial failure: Unable to connect"));

    let (_, status) = send(app, get("/api/notifications/queue")).await;
    assert_eq!(status["queue"]["queue_length"], 1);
}

#[tokio::test]
async fn test_send_rejects_blank_title() {
    let (app, _) = build_app(0, "");
    let body = serde_json::json!({
        "target": {"kind": "role", "role": "agent"},
        "payload": {"title": "  ", "body": "body"}
    });

    let (status, json) = send(app, post_json("/api/notifications", body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "title is required");
}

#[tokio::test]
async fn test_send_rejects_empty_user_list() {
    let (app, _) = build_app(0, "");
    let body = serde_json::json!({
        "target": {"kind": "users", "ids": []},
        "payload": {"title": "t", "body": "b"}
    });

    let (status, _) = send(app, post_json("/api/notifications/tracked", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tracked_send_then_history_and_stats() {
    let (app, store) = build_app(0, "");
    let body = serde_json::json!({
        "target": {"kind": "users", "ids": ["u1", "u2"]},
        "payload": {"title": "Assigned", "body": "You were assigned"},
        "project_id": "p1"
    });

    let (status, json) = send(app.clone(), post_json("/api/notifications/tracked", body)).await;
    assert_eq!(status, StatusCode::OK);
    let outcomes = json.as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o["success"] == true));
    assert_eq!(store.all().len(), 2);

    let (status, history) = send(app.clone(), get("/api/notifications/history/u1")).await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["delivery_status"], "delivered");
    assert_eq!(history[0]["project_id"], "p1");

    let (status, stats) = send(app, get("/api/notifications/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["delivered"], 2);
    assert_eq!(stats["delivery_rate"], 100);
}

#[tokio::test]
async fn test_tracked_failure_schedules_retry() {
    let (app, _) = build_app(1, "upstream timeout");
    let body = serde_json::json!({
        "target": {"kind": "users", "ids": ["u1"]},
        "payload": {"title": "t", "body": "b"}
    });

    let (_, json) = send(app.clone(), post_json("/api/notifications/tracked", body)).await;
    assert_eq!(json[0]["success"], false);
    assert_eq!(json[0]["retry_scheduled"], true);

    let (_, status) = send(app.clone(), get("/api/notifications/queue")).await;
    assert_eq!(status["retries"]["pending"], 1);

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/notifications/retries")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cleared"], 1);
}

#[tokio::test]
async fn test_stats_rejects_inverted_window() {
    let (app, _) = build_app(0, "");
    let (status, _) = send(
        app,
        get("/api/notifications/stats?start=2026-02-01T00:00:00Z&end=2026-01-01T00:00:00Z"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_retry_failed_with_nothing_to_recover() {
    let (app, _) = build_app(0, "");
    let request = Request::builder()
        .method("POST")
        .uri("/api/notifications/retry-failed")
        .body(Body::empty())
        .unwrap();

    let (status, json) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["scheduled"], 0);
}
