//! In-memory notification store for tests and local runs without Postgres.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use beacon_common::error::AppError;
use beacon_common::types::{
    DeliveryStatus, NewNotificationRecord, NotificationRecord, StatusCounts,
};

use crate::store::NotificationStore;

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<i64, NotificationRecord>,
    next_id: i64,
    fail_inserts: bool,
    fail_reads: bool,
}

/// Map-backed store with auto-increment ids, mirroring the Postgres table.
#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    state: Mutex<MemoryState>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail, as a broken database would.
    pub fn fail_inserts(&self, fail: bool) {
        self.lock().fail_inserts = fail;
    }

    /// Make every subsequent `get` fail, as during a database outage.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Put a fully formed record in place, e.g. one left over from a previous run.
    pub fn seed(&self, record: NotificationRecord) {
        let mut state = self.lock();
        state.next_id = state.next_id.max(record.id);
        state.records.insert(record.id, record);
    }

    pub fn all(&self) -> Vec<NotificationRecord> {
        self.lock().records.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, record: &NewNotificationRecord) -> Result<NotificationRecord, AppError> {
        let mut state = self.lock();
        if state.fail_inserts {
            return Err(AppError::Internal(
                "notification_history insert failed".to_string(),
            ));
        }

        state.next_id += 1;
        let now = Utc::now();
        let row = NotificationRecord {
            id: state.next_id,
            user_id: record.user_id.clone(),
            target_role: record.target_role.clone(),
            project_id: record.project_id.clone(),
            title: record.title.clone(),
            body: record.body.clone(),
            delivery_status: DeliveryStatus::Pending,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_delivery(
        &self,
        id: i64,
        status: DeliveryStatus,
        retry_count: i32,
    ) -> Result<(), AppError> {
        let mut state = self.lock();
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;
        record.delivery_status = status;
        record.retry_count = retry_count;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<NotificationRecord>, AppError> {
        let state = self.lock();
        if state.fail_reads {
            return Err(AppError::Internal(
                "notification_history read failed".to_string(),
            ));
        }
        Ok(state.records.get(&id).cloned())
    }

    async fn failed_since(
        &self,
        since: DateTime<Utc>,
        max_retries: i32,
    ) -> Result<Vec<NotificationRecord>, AppError> {
        let mut rows: Vec<NotificationRecord> = self
            .lock()
            .records
            .values()
            .filter(|r| {
                r.delivery_status == DeliveryStatus::Failed
                    && r.retry_count < max_retries
                    && r.created_at >= since
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.id));
        Ok(rows)
    }

    async fn history(&self, user_id: &str, limit: i64) -> Result<Vec<NotificationRecord>, AppError> {
        let mut rows: Vec<NotificationRecord> = self
            .lock()
            .records
            .values()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn status_counts(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<StatusCounts, AppError> {
        let mut counts = StatusCounts::default();
        for record in self.lock().records.values() {
            if start.is_some_and(|s| record.created_at < s) || end.is_some_and(|e| record.created_at > e)
            {
                continue;
            }
            counts.add(record.delivery_status, 1);
        }
        Ok(counts)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.lock();
        let before = state.records.len();
        state.records.retain(|_, r| r.created_at >= cutoff);
        Ok((before - state.records.len()) as u64)
    }
}
