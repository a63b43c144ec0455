//! Single-attempt push sender.
//!
//! Makes exactly one call to the push backend and turns whatever went wrong
//! into one of a handful of user-facing failure categories. It never retries
//! and never propagates raw backend text.

use std::sync::Arc;

use thiserror::Error;

use beacon_common::types::{NotificationRequest, NotificationPayload, Target};

use crate::backend::{BackendError, PushBackend};

/// Categorized delivery failure. `Display` is the message shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendFailure {
    #[error("Push notifications are not configured. Please contact your administrator.")]
    NotConfigured,

    #[error("Unable to connect to the notification service. Please try again later.")]
    Unreachable,

    #[error("Notification permissions are required. Please enable notifications and try again.")]
    PermissionRequired,

    #[error("Network connection failed. Please check your connection and try again.")]
    Network,

    #[error("Failed to send notification. Please try again.")]
    Other,
}

impl SendFailure {
    /// Known backend error fragments, checked in order. First match wins.
    const PATTERNS: &[(&str, SendFailure)] = &[
        ("VAPID", SendFailure::NotConfigured),
        ("Failed to send a request", SendFailure::Unreachable),
        ("Permission denied", SendFailure::PermissionRequired),
    ];

    /// Map raw backend error text to a category.
    pub fn categorize(raw: &str) -> Self {
        Self::PATTERNS
            .iter()
            .find(|(needle, _)| raw.contains(needle))
            .map(|(_, failure)| *failure)
            .unwrap_or(SendFailure::Other)
    }

    /// Configuration and permission problems will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SendFailure::NotConfigured | SendFailure::PermissionRequired
        )
    }
}

impl From<&BackendError> for SendFailure {
    fn from(err: &BackendError) -> Self {
        match err {
            BackendError::Rejected(text) => SendFailure::categorize(text),
            BackendError::Transport(_) => SendFailure::Network,
        }
    }
}

/// Issues one delivery attempt per call.
#[derive(Clone)]
pub struct PushSender {
    backend: Arc<dyn PushBackend>,
}

impl PushSender {
    pub fn new(backend: Arc<dyn PushBackend>) -> Self {
        Self { backend }
    }

    /// Send a request once.
    pub async fn send(&self, request: &NotificationRequest) -> Result<(), SendFailure> {
        self.send_to(
            &request.target,
            &request.payload,
            request.project_id.as_deref(),
        )
        .await
    }

    /// Send a payload to a target once.
    pub async fn send_to(
        &self,
        target: &Target,
        payload: &NotificationPayload,
        project_id: Option<&str>,
    ) -> Result<(), SendFailure> {
        match self.backend.deliver(target, payload, project_id).await {
            Ok(()) => {
                tracing::debug!(recipients = %target, "Push notification delivered");
                Ok(())
            }
            Err(err) => {
                let failure = SendFailure::from(&err);
                tracing::warn!(
                    recipients = %target,
                    error = %err,
                    category = ?failure,
                    "Push notification failed"
                );
                Err(failure)
            }
        }
    }
}
