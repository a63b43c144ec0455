//! Notification routes.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use beacon_common::error::AppError;
use beacon_common::types::{NotificationRecord, NotificationRequest, NotificationStats};
use beacon_notifier::queue::QueueStatus;
use beacon_notifier::service::GuaranteeOutcome;
use beacon_notifier::tracker::{RetryQueueStatus, TrackOutcome};

use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", post(send_notification))
        .route("/api/notifications/tracked", post(send_tracked))
        .route("/api/notifications/history/{user_id}", get(history))
        .route("/api/notifications/stats", get(stats))
        .route("/api/notifications/queue", get(queue_status))
        .route("/api/notifications/queue", delete(clear_queue))
        .route("/api/notifications/retry-failed", post(retry_failed))
        .route("/api/notifications/retries", delete(clear_retries))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PipelineStatus {
    pub queue: QueueStatus,
    pub retries: RetryQueueStatus,
}

fn validate(request: &NotificationRequest) -> Result<(), AppError> {
    if request.payload.title.trim().is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if request.payload.body.trim().is_empty() {
        return Err(AppError::Validation("body is required".to_string()));
    }
    if request.target.is_empty() {
        return Err(AppError::Validation(
            "target must name a role or at least one user".to_string(),
        ));
    }
    Ok(())
}

/// POST /api/notifications — Deliver now, or queue on failure.
async fn send_notification(
    State(state): State<AppState>,
    Json(request): Json<NotificationRequest>,
) -> Result<Json<GuaranteeOutcome>, AppError> {
    validate(&request)?;
    let outcome = state.notifier.send_with_guarantee(request).await;
    Ok(Json(outcome))
}

/// POST /api/notifications/tracked — Deliver with a history record per recipient.
async fn send_tracked(
    State(state): State<AppState>,
    Json(request): Json<NotificationRequest>,
) -> Result<Json<Vec<TrackOutcome>>, AppError> {
    validate(&request)?;
    let outcomes = state.notifier.send_tracked(&request).await?;
    Ok(Json(outcomes))
}

/// GET /api/notifications/history/:user_id — Most recent records first.
async fn history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<NotificationRecord>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let records = state.notifier.history(&user_id, limit).await?;
    Ok(Json(records))
}

/// GET /api/notifications/stats — Delivery counts over an optional window.
async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<NotificationStats>, AppError> {
    if let (Some(start), Some(end)) = (query.start, query.end) {
        if start > end {
            return Err(AppError::Validation(
                "start must not be after end".to_string(),
            ));
        }
    }
    let stats = state.notifier.stats(query.start, query.end).await?;
    Ok(Json(stats))
}

async fn queue_status(State(state): State<AppState>) -> Json<PipelineStatus> {
    Json(PipelineStatus {
        queue: state.notifier.queue_status(),
        retries: state.notifier.retry_queue_status(),
    })
}

async fn clear_queue(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.notifier.clear_queue();
    Json(serde_json::json!({ "cleared": cleared }))
}

/// POST /api/notifications/retry-failed — Reschedule recent failed records.
async fn retry_failed(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let scheduled = state.notifier.retry_failed_notifications().await?;
    Ok(Json(serde_json::json!({ "scheduled": scheduled })))
}

/// DELETE /api/notifications/retries — Cancel every pending retry.
async fn clear_retries(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.notifier.clear_all_retries();
    Json(serde_json::json!({ "cleared": cleared }))
}
