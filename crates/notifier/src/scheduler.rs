//! Delayed retry scheduler.
//!
//! One min-heap ordered by due time holds every pending retry. A single
//! consumer awaits [`RetryScheduler::next_due`]; clearing drops the whole heap
//! at once instead of cancelling one timer per notification.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Cap for delays too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A retry waiting to fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryEntry {
    pub notification_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub attempt: u32,
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    seq: u64,
    entry: RetryEntry,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Default)]
struct HeapState {
    heap: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
}

/// Min-heap of pending retries keyed by due time.
#[derive(Debug, Default)]
pub struct RetryScheduler {
    state: Mutex<HeapState>,
    wake: Notify,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule retry `attempt` of a notification to fire after `delay`.
    pub fn schedule(&self, notification_id: i64, attempt: u32, delay: Duration) -> RetryEntry {
        let now = Instant::now();
        let due = now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE);
        let scheduled_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = RetryEntry {
            notification_id,
            scheduled_at,
            attempt,
        };

        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Reverse(Scheduled {
                due,
                seq,
                entry: entry.clone(),
            }));
        }

        // Wakes the consumer so it can re-evaluate the earliest deadline.
        self.wake.notify_one();
        entry
    }

    /// Wait until the earliest entry is due and remove it.
    pub async fn next_due(&self) -> RetryEntry {
        loop {
            let deadline = {
                let mut state = self.lock();
                let earliest = state.heap.peek().map(|Reverse(next)| next.due);
                match earliest {
                    Some(due) if due <= Instant::now() => {
                        if let Some(Reverse(ready)) = state.heap.pop() {
                            return ready.entry;
                        }
                        None
                    }
                    other => other,
                }
            };

            match deadline {
                Some(due) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(due) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                None => self.wake.notified().await,
            }
        }
    }

    /// Whether a retry is already pending for this notification.
    pub fn contains(&self, notification_id: i64) -> bool {
        self.lock()
            .heap
            .iter()
            .any(|Reverse(s)| s.entry.notification_id == notification_id)
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending entries in firing order.
    pub fn pending(&self) -> Vec<RetryEntry> {
        let state = self.lock();
        let mut scheduled: Vec<&Scheduled> = state.heap.iter().map(|Reverse(s)| s).collect();
        scheduled.sort();
        scheduled.into_iter().map(|s| s.entry.clone()).collect()
    }

    /// Drop every pending entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.lock();
            let removed = state.heap.len();
            state.heap.clear();
            removed
        };
        self.wake.notify_one();
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeapState> {
        // A poisoned heap is still structurally valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
