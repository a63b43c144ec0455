//! Notification service: owns the queue, tracker and background loops.
//!
//! The service is constructed explicitly and shared behind an `Arc`. Its
//! [`NotificationService::start`] spawns three loops:
//! 1. queue drain (every `drain_interval`, bounded by `max_concurrent`)
//! 2. retry driver (fires tracker retries as they come due)
//! 3. retention cleanup (every `cleanup_interval`)
//!
//! Queued requests are delivered through the tracker, so they get the same
//! persisted record and retry path as any other tracked send.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use beacon_common::config::AppConfig;
use beacon_common::error::AppError;
use beacon_common::types::{
    NewNotificationRecord, NotificationRecord, NotificationRequest, NotificationStats, Target,
};

use crate::backend::PushBackend;
use crate::policy::RetryPolicy;
use crate::queue::{NotificationQueue, QueueEntry, QueueStatus};
use crate::sender::{PushSender, SendFailure};
use crate::store::NotificationStore;
use crate::tracker::{DeliveryTracker, RetryQueueStatus, TrackOutcome};

/// Runtime settings for the pipeline.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub drain_interval: Duration,
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    pub retry_lookback: chrono::Duration,
    pub retention: chrono::Duration,
    pub cleanup_interval: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(100),
            max_concurrent: 3,
            retry: RetryPolicy::default(),
            retry_lookback: chrono::Duration::hours(24),
            retention: chrono::Duration::days(30),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl TryFrom<&AppConfig> for NotifierConfig {
    type Error = anyhow::Error;

    fn try_from(config: &AppConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let retry_lookback = config
            .retry_lookback()
            .ok_or_else(|| anyhow::anyhow!("RETRY_LOOKBACK_HOURS is out of range"))?;
        let retention = config
            .retention()
            .ok_or_else(|| anyhow::anyhow!("NOTIFY_RETENTION_DAYS is out of range"))?;

        Ok(Self {
            drain_interval: Duration::from_millis(config.queue_drain_interval_ms.max(1)),
            max_concurrent: config.queue_max_concurrent.max(1),
            retry: RetryPolicy {
                max_retries: config.notify_max_retries,
                first: Duration::from_millis(config.retry_base_delay_ms),
                factor: config.retry_backoff_factor,
            },
            retry_lookback,
            retention,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs.max(1)),
        })
    }
}

/// Result of [`NotificationService::send_with_guarantee`].
///
/// `success` is true whenever delivery is either done or queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuaranteeOutcome {
    pub success: bool,
    pub immediate: bool,
    pub queue_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle to the background loops started by [`NotificationService::start`].
pub struct ServiceHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop all loops and wait for them. In-flight sends are not awaited.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Notification service stopped");
    }
}

/// The notification delivery pipeline.
pub struct NotificationService {
    sender: PushSender,
    queue: NotificationQueue,
    tracker: Arc<DeliveryTracker>,
    config: NotifierConfig,
}

impl NotificationService {
    pub fn new(
        config: NotifierConfig,
        store: Arc<dyn NotificationStore>,
        backend: Arc<dyn PushBackend>,
    ) -> Self {
        let sender = PushSender::new(backend);
        let tracker = Arc::new(DeliveryTracker::new(
            store,
            sender.clone(),
            config.retry,
            config.retry_lookback,
        ));

        Self {
            sender,
            queue: NotificationQueue::new(),
            tracker,
            config,
        }
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<DeliveryTracker> {
        &self.tracker
    }

    /// Spawn the drain, retry and cleanup loops.
    pub fn start(self: &Arc<Self>) -> ServiceHandle {
        let shutdown = CancellationToken::new();

        let tasks = vec![
            tokio::spawn(self.clone().run_queue(shutdown.clone())),
            tokio::spawn(self.tracker.clone().run_retries(shutdown.clone())),
            tokio::spawn(self.clone().run_cleanup(shutdown.clone())),
        ];

        tracing::info!(
            drain_interval_ms = self.config.drain_interval.as_millis() as u64,
            max_concurrent = self.config.max_concurrent,
            max_retries = self.config.retry.max_retries,
            "Notification service started"
        );

        ServiceHandle { shutdown, tasks }
    }

    /// One untracked delivery attempt.
    pub async fn send(&self, request: &NotificationRequest) -> Result<(), SendFailure> {
        self.sender.send(request).await
    }

    /// Try to deliver now; on failure queue the request for the background
    /// drain and still report success.
    pub async fn send_with_guarantee(&self, request: NotificationRequest) -> GuaranteeOutcome {
        match self.sender.send(&request).await {
            Ok(()) => GuaranteeOutcome {
                success: true,
                immediate: true,
                queue_id: None,
                error: None,
            },
            Err(failure) => {
                let queue_id = self.queue.enqueue(request);
                tracing::warn!(
                    queue_id = %queue_id,
                    error = %failure,
                    "Immediate delivery failed, notification queued"
                );
                GuaranteeOutcome {
                    success: true,
                    immediate: false,
                    queue_id: Some(queue_id),
                    error: Some(format!("Queued after initial failure: {}", failure)),
                }
            }
        }
    }

    pub fn enqueue(&self, request: NotificationRequest) -> Uuid {
        self.queue.enqueue(request)
    }

    /// Deliver through the tracker: one persisted record per recipient user,
    /// or a single record for a role target.
    pub async fn send_tracked(
        &self,
        request: &NotificationRequest,
    ) -> Result<Vec<TrackOutcome>, AppError> {
        let mut outcomes = Vec::new();
        for record in Self::records_for(request) {
            outcomes.push(self.tracker.track_record(record).await?);
        }
        Ok(outcomes)
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn clear_queue(&self) -> usize {
        self.queue.clear()
    }

    pub fn retry_queue_status(&self) -> RetryQueueStatus {
        self.tracker.retry_queue_status()
    }

    pub fn clear_all_retries(&self) -> usize {
        self.tracker.clear_all_retries()
    }

    pub async fn retry_failed_notifications(&self) -> Result<usize, AppError> {
        self.tracker.retry_failed_notifications().await
    }

    pub async fn history(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<NotificationRecord>, AppError> {
        self.tracker.get_history(user_id, limit).await
    }

    pub async fn stats(
        &self,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<NotificationStats, AppError> {
        self.tracker.get_stats(start, end).await
    }

    /// Take as many queued entries as there is room for and deliver each on
    /// its own task. Returns the number dispatched.
    pub fn drain_once(self: &Arc<Self>) -> usize {
        let batch = self.queue.take_batch(self.config.max_concurrent);
        let dispatched = batch.len();

        for entry in batch {
            let service = self.clone();
            tokio::spawn(async move {
                service.process_entry(entry).await;
            });
        }

        dispatched
    }

    async fn process_entry(&self, entry: QueueEntry) {
        let waited_ms = (chrono::Utc::now() - entry.enqueued_at).num_milliseconds();

        match self.send_tracked(&entry.request).await {
            Ok(outcomes) => {
                let delivered = outcomes.iter().filter(|o| o.success).count();
                tracing::debug!(
                    queue_id = %entry.id,
                    priority = %entry.priority,
                    waited_ms,
                    delivered,
                    total = outcomes.len(),
                    "Queued notification processed"
                );
            }
            Err(e) => {
                tracing::error!(
                    queue_id = %entry.id,
                    error = %e,
                    "Queued notification could not be tracked"
                );
            }
        }

        self.queue.complete();
    }

    async fn run_queue(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain_once();
                }
                _ = shutdown.cancelled() => break,
            }
        }
        tracing::info!("Queue drain stopped");
    }

    async fn run_cleanup(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tracker.purge_expired(self.config.retention).await {
                        tracing::error!(error = %e, "Notification history cleanup failed");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }

    fn records_for(request: &NotificationRequest) -> Vec<NewNotificationRecord> {
        let project_id = request.project_id.clone();
        match &request.target {
            Target::Role { role } => {
                vec![
                    NewNotificationRecord::for_role(role, &request.payload)
                        .with_project(project_id),
                ]
            }
            Target::Users { ids } => {
                let mut seen = std::collections::HashSet::new();
                ids.iter()
                    .map(|id| id.trim())
                    .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
                    .map(|id| {
                        NewNotificationRecord::for_user(id, &request.payload)
                            .with_project(project_id.clone())
                    })
                    .collect()
            }
        }
    }
}
