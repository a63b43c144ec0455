//! Shared application state for the Axum API server.

use std::sync::Arc;

use beacon_notifier::service::NotificationService;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub notifier: Arc<NotificationService>,
}

impl AppState {
    pub fn new(notifier: Arc<NotificationService>) -> Self {
        Self { notifier }
    }
}
