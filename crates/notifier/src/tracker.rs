//! Delivery tracker: durable records plus retry orchestration.
//!
//! Every tracked send gets a `notification_history` row. The first attempt
//! runs inline; on a retryable failure the tracker schedules the next attempt
//! on the [`RetryScheduler`] with exponential backoff (2s, 8s, 32s by
//! default). Retries re-read `retry_count` from storage before sending, so a
//! record never goes past `max_retries`.
//!
//! Lifecycle per record:
//! `pending → delivered` | `pending → failed(0) → failed(1) → … → failed(max)`,
//! with `failed(n) → delivered` whenever a retry succeeds.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use beacon_common::error::AppError;
use beacon_common::types::{
    DeliveryStatus, NewNotificationRecord, NotificationRecord, NotificationRequest,
    NotificationStats,
};

use crate::policy::RetryPolicy;
use crate::scheduler::{RetryEntry, RetryScheduler};
use crate::sender::{PushSender, SendFailure};
use crate::store::NotificationStore;

/// A re-invocable delivery attempt.
pub type SendFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), SendFailure>> + Send + Sync>;

/// Outcome of the inline attempt made by [`DeliveryTracker::track_delivery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackOutcome {
    pub notification_id: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a retry was scheduled after a failure.
    pub retry_scheduled: bool,
}

/// Snapshot of pending retries.
#[derive(Debug, Clone, Serialize)]
pub struct RetryQueueStatus {
    pub pending: usize,
    /// Retries whose attempt is running right now.
    pub in_flight: usize,
    pub entries: Vec<RetryEntry>,
}

/// Persists delivery records and drives retries.
pub struct DeliveryTracker {
    store: Arc<dyn NotificationStore>,
    sender: PushSender,
    policy: RetryPolicy,
    scheduler: RetryScheduler,
    /// Send functions of records with a retry pending, keyed by record id.
    send_fns: Mutex<HashMap<i64, SendFn>>,
    /// Records popped from the scheduler whose retry has not finished.
    in_flight: Mutex<HashSet<i64>>,
    lookback: chrono::Duration,
}

impl DeliveryTracker {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        sender: PushSender,
        policy: RetryPolicy,
        lookback: chrono::Duration,
    ) -> Self {
        Self {
            store,
            sender,
            policy,
            scheduler: RetryScheduler::new(),
            send_fns: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            lookback,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Insert a pending record. A storage failure is fatal for this notification.
    pub async fn create_record(
        &self,
        record: &NewNotificationRecord,
    ) -> Result<NotificationRecord, AppError> {
        let created = self.store.insert(record).await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to create notification record");
        })?;

        tracing::debug!(notification_id = created.id, "Notification record created");
        Ok(created)
    }

    /// Create a record, attempt delivery once, and schedule a retry on a
    /// retryable failure. Does not wait for retries.
    pub async fn track_delivery(
        &self,
        record: NewNotificationRecord,
        send: SendFn,
    ) -> Result<TrackOutcome, AppError> {
        let created = self.create_record(&record).await?;
        let id = created.id;

        match send().await {
            Ok(()) => {
                self.write_status(id, DeliveryStatus::Delivered, 0).await;
                tracing::info!(notification_id = id, "Notification delivered");
                Ok(TrackOutcome {
                    notification_id: id,
                    success: true,
                    error: None,
                    retry_scheduled: false,
                })
            }
            Err(failure) => {
                self.write_status(id, DeliveryStatus::Failed, 0).await;
                let retry_scheduled = failure.is_retryable() && self.policy.allows_retry(0);
                if retry_scheduled {
                    self.schedule_retry(id, 1, send);
                } else {
                    tracing::warn!(
                        notification_id = id,
                        error = %failure,
                        "Notification failed, not retryable"
                    );
                }
                Ok(TrackOutcome {
                    notification_id: id,
                    success: false,
                    error: Some(failure.to_string()),
                    retry_scheduled,
                })
            }
        }
    }

    /// Track a delivery that re-sends `record`'s own content through the sender.
    pub async fn track_record(&self, record: NewNotificationRecord) -> Result<TrackOutcome, AppError> {
        let send = self.send_fn_for(&record);
        self.track_delivery(record, send).await
    }

    /// Run retries as they come due until `shutdown` fires.
    pub async fn run_retries(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!("Retry driver started");
        loop {
            let entry = tokio::select! {
                entry = self.scheduler.next_due() => entry,
                _ = shutdown.cancelled() => break,
            };

            self.lock_in_flight().insert(entry.notification_id);
            let tracker = self.clone();
            tokio::spawn(async move {
                tracker.execute_retry(entry).await;
            });
        }
        tracing::info!("Retry driver stopped");
    }

    /// Perform one scheduled retry. The record counts as in flight until
    /// this returns.
    pub async fn execute_retry(&self, entry: RetryEntry) {
        let id = entry.notification_id;
        self.lock_in_flight().insert(id);
        self.attempt_retry(entry).await;
        self.lock_in_flight().remove(&id);
    }

    async fn attempt_retry(&self, entry: RetryEntry) {
        let id = entry.notification_id;

        let record = match self.store.get(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(notification_id = id, "Retry target no longer exists");
                self.forget(id);
                return;
            }
            Err(e) => {
                let delay = self.policy.delay(entry.attempt);
                self.scheduler.schedule(id, entry.attempt, delay);
                tracing::error!(
                    notification_id = id,
                    attempt = entry.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Failed to load notification for retry, rescheduled"
                );
                return;
            }
        };

        let retry_count = record.retry_count.max(0) as u32;
        if !self.policy.allows_retry(retry_count) {
            tracing::warn!(
                notification_id = id,
                retry_count,
                "Retry limit reached, notification permanently failed"
            );
            self.forget(id);
            return;
        }
        if record.delivery_status == DeliveryStatus::Delivered {
            self.forget(id);
            return;
        }

        let send = self.take_send_fn(&record);
        let Some(send) = send else {
            tracing::error!(notification_id = id, "Notification has no recipient, dropping retry");
            return;
        };

        let attempt = retry_count + 1;
        tracing::info!(notification_id = id, attempt, "Retrying notification");

        match send().await {
            Ok(()) => {
                self.write_status(id, DeliveryStatus::Delivered, attempt as i32)
                    .await;
                tracing::info!(notification_id = id, attempt, "Notification delivered on retry");
            }
            Err(failure) => {
                self.write_status(id, DeliveryStatus::Failed, attempt as i32)
                    .await;
                if failure.is_retryable() && self.policy.allows_retry(attempt) {
                    self.schedule_retry(id, attempt + 1, send);
                } else {
                    tracing::warn!(
                        notification_id = id,
                        attempt,
                        error = %failure,
                        "Notification permanently failed"
                    );
                }
            }
        }
    }

    /// Reschedule failed records from the lookback window whose retry timers
    /// were lost, e.g. to a restart. Returns how many were scheduled.
    pub async fn retry_failed_notifications(&self) -> Result<usize, AppError> {
        let since = Utc::now() - self.lookback;
        let records = self
            .store
            .failed_since(since, self.policy.max_retries as i32)
            .await?;

        let mut scheduled = 0;
        for record in records {
            if self.scheduler.contains(record.id) || self.is_in_flight(record.id) {
                continue;
            }
            let Some(send) = self.record_send_fn(&record) else {
                continue;
            };
            let attempt = record.retry_count.max(0) as u32 + 1;
            self.schedule_retry(record.id, attempt, send);
            scheduled += 1;
        }

        tracing::info!(scheduled, "Recovered failed notifications for retry");
        Ok(scheduled)
    }

    pub async fn get_history(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<NotificationRecord>, AppError> {
        self.store.history(user_id, limit).await
    }

    pub async fn get_stats(
        &self,
        start: Option<chrono::DateTime<Utc>>,
        end: Option<chrono::DateTime<Utc>>,
    ) -> Result<NotificationStats, AppError> {
        let counts = self.store.status_counts(start, end).await?;
        Ok(NotificationStats::from(counts))
    }

    pub fn retry_queue_status(&self) -> RetryQueueStatus {
        let entries = self.scheduler.pending();
        RetryQueueStatus {
            pending: entries.len(),
            in_flight: self.lock_in_flight().len(),
            entries,
        }
    }

    /// Cancel every pending retry. Persisted records are left as they are and
    /// sends already in flight still complete.
    pub fn clear_all_retries(&self) -> usize {
        let cleared = self.scheduler.clear();
        self.lock_send_fns().clear();
        tracing::info!(cleared, "Cleared all pending retries");
        cleared
    }

    /// Delete records older than `retention`, which must be positive.
    pub async fn purge_expired(&self, retention: chrono::Duration) -> Result<u64, AppError> {
        if retention <= chrono::Duration::zero() {
            return Err(AppError::Config(format!(
                "retention must be positive, got {}",
                retention
            )));
        }
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .ok_or_else(|| AppError::Config(format!("retention {} is out of range", retention)))?;
        let removed = self.store.purge_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, "Purged expired notification history");
        }
        Ok(removed)
    }

    fn schedule_retry(&self, id: i64, attempt: u32, send: SendFn) {
        let delay = self.policy.delay(attempt);
        self.lock_send_fns().insert(id, send);
        let entry = self.scheduler.schedule(id, attempt, delay);
        tracing::info!(
            notification_id = id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            scheduled_at = %entry.scheduled_at,
            "Retry scheduled"
        );
    }

    async fn write_status(&self, id: i64, status: DeliveryStatus, retry_count: i32) {
        if let Err(e) = self.store.update_delivery(id, status, retry_count).await {
            tracing::error!(
                notification_id = id,
                status = %status,
                error = %e,
                "Failed to update notification status"
            );
        }
    }

    /// The registered send function, or one rebuilt from the stored record.
    fn take_send_fn(&self, record: &NotificationRecord) -> Option<SendFn> {
        self.lock_send_fns()
            .remove(&record.id)
            .or_else(|| self.record_send_fn(record))
    }

    fn record_send_fn(&self, record: &NotificationRecord) -> Option<SendFn> {
        record.to_request().map(|request| self.request_send_fn(request))
    }

    fn send_fn_for(&self, record: &NewNotificationRecord) -> SendFn {
        match record.to_request() {
            Some(request) => self.request_send_fn(request),
            None => Arc::new(|| async { Err::<(), _>(SendFailure::Other) }.boxed()),
        }
    }

    /// Wrap a request in a send function that goes through the sender.
    pub fn request_send_fn(&self, request: NotificationRequest) -> SendFn {
        let sender = self.sender.clone();
        Arc::new(move || {
            let sender = sender.clone();
            let request = request.clone();
            async move { sender.send(&request).await }.boxed()
        })
    }

    fn forget(&self, id: i64) {
        self.lock_send_fns().remove(&id);
    }

    fn is_in_flight(&self, id: i64) -> bool {
        self.lock_in_flight().contains(&id)
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<i64>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_send_fns(&self) -> std::sync::MutexGuard<'_, HashMap<i64, SendFn>> {
        self.send_fns.lock().unwrap_or_else(|e| e.into_inner())
    }
}
