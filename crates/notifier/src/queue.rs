//! In-memory notification queue.
//!
//! High-priority entries go ahead of every normal entry; within a tier the
//! order is FIFO. Contents are not persisted and are lost on restart.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use beacon_common::types::{NotificationRequest, Priority};

/// A request waiting to be drained.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: Uuid,
    pub request: NotificationRequest,
    pub enqueued_at: DateTime<Utc>,
    pub priority: Priority,
}

/// Observability snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub processing: bool,
    pub active_count: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    active: usize,
}

/// Priority-ordered buffer between callers and the sender.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    state: Mutex<QueueState>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request and return its queue id. Never blocks on delivery.
    pub fn enqueue(&self, request: NotificationRequest) -> Uuid {
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            priority: request.priority,
            request,
            enqueued_at: Utc::now(),
        };
        let id = entry.id;

        let mut state = self.lock();
        let position = match entry.priority {
            Priority::High => state
                .entries
                .iter()
                .position(|e| e.priority != Priority::High)
                .unwrap_or(state.entries.len()),
            Priority::Normal => state.entries.len(),
        };
        state.entries.insert(position, entry);

        tracing::debug!(
            queue_id = %id,
            position,
            queue_length = state.entries.len(),
            "Notification enqueued"
        );
        id
    }

    /// Remove the next entry without marking it active.
    pub fn pop(&self) -> Option<QueueEntry> {
        self.lock().entries.pop_front()
    }

    /// Take up to `max_active - active` entries and mark them in flight.
    /// Each must be released with [`NotificationQueue::complete`].
    pub fn take_batch(&self, max_active: usize) -> Vec<QueueEntry> {
        let mut state = self.lock();
        let room = max_active.saturating_sub(state.active);
        let take = room.min(state.entries.len());
        let batch: Vec<QueueEntry> = state.entries.drain(..take).collect();
        state.active += batch.len();
        batch
    }

    /// Release one in-flight entry taken by [`NotificationQueue::take_batch`].
    pub fn complete(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        QueueStatus {
            queue_length: state.entries.len(),
            processing: state.active > 0,
            active_count: state.active,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything still waiting. In-flight sends are not affected.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let cleared = state.entries.len();
        state.entries.clear();
        cleared
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_common::types::Target;

    fn request(title: &str, priority: Priority) -> NotificationRequest {
        NotificationRequest::new(Target::role("worker"), title, "body").with_priority(priority)
    }

    fn drain_titles(queue: &NotificationQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop())
            .map(|e| e.request.payload.title)
            .collect()
    }

    #[test]
    fn test_high_priority_drains_first_fifo_within_tier() {
        let queue = NotificationQueue::new();
        queue.enqueue(request("n1", Priority::Normal));
        queue.enqueue(request("h1", Priority::High));
        queue.enqueue(request("n2", Priority::Normal));
        queue.enqueue(request("n3", Priority::Normal));
        queue.enqueue(request("h2", Priority::High));

        assert_eq!(drain_titles(&queue), vec!["h1", "h2", "n1", "n2", "n3"]);
    }

    #[test]
    fn test_enqueue_returns_distinct_ids() {
        let queue = NotificationQueue::new();
        let a = queue.enqueue(request("a", Priority::Normal));
        let b = queue.enqueue(request("b", Priority::Normal));
        assert_ne!(a, b);
        assert_eq!(queue.pop().unwrap().id, a);
    }

    #[test]
    fn test_take_batch_respects_active_limit() {
        let queue = NotificationQueue::new();
        for i in 0..5 {
            queue.enqueue(request(&format!("n{}", i), Priority::Normal));
        }

        let first = queue.take_batch(3);
        assert_eq!(first.len(), 3);
        assert_eq!(
            queue.status(),
            QueueStatus {
                queue_length: 2,
                processing: true,
                active_count: 3,
            }
        );

        // No room until something completes.
        assert!(queue.take_batch(3).is_empty());
        queue.complete();
        let second = queue.take_batch(3);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].request.payload.title, "n3");
    }

    #[test]
    fn test_status_idle() {
        let queue = NotificationQueue::new();
        assert_eq!(
            queue.status(),
            QueueStatus {
                queue_length: 0,
                processing: false,
                active_count: 0,
            }
        );
    }

    #[test]
    fn test_clear_keeps_in_flight_count() {
        let queue = NotificationQueue::new();
        for i in 0..4 {
            queue.enqueue(request(&format!("n{}", i), Priority::Normal));
        }
        let batch = queue.take_batch(1);
        assert_eq!(batch.len(), 1);

        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
        assert_eq!(queue.status().active_count, 1);

        queue.complete();
        assert!(!queue.status().processing);
    }

    #[test]
    fn test_complete_never_underflows() {
        let queue = NotificationQueue::new();
        queue.complete();
        assert_eq!(queue.status().active_count, 0);
    }
}
