use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status '{}'", other)),
        }
    }
}

/// Scheduling hint. High priority jumps the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Recipients of a notification: everyone holding a role, or an explicit user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Target {
    Role { role: String },
    Users { ids: Vec<String> },
}

impl Target {
    pub fn role(role: impl Into<String>) -> Self {
        Target::Role { role: role.into() }
    }

    pub fn users<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Target::Users {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// True when the target cannot reach anyone (blank role or no user ids).
    pub fn is_empty(&self) -> bool {
        match self {
            Target::Role { role } => role.trim().is_empty(),
            Target::Users { ids } => ids.iter().all(|id| id.trim().is_empty()),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Role { role } => write!(f, "role:{}", role),
            Target::Users { ids } => write!(f, "users:{}", ids.len()),
        }
    }
}

/// Human-readable notification content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
}

/// A request to notify a target. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub target: Target,
    pub payload: NotificationPayload,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl NotificationRequest {
    pub fn new(target: Target, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            target,
            payload: NotificationPayload {
                title: title.into(),
                body: body.into(),
            },
            priority: Priority::Normal,
            project_id: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Data needed to create a delivery record.
///
/// Exactly one of `user_id` / `target_role` identifies the recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotificationRecord {
    pub user_id: Option<String>,
    pub target_role: Option<String>,
    pub project_id: Option<String>,
    pub title: String,
    pub body: String,
}

impl NewNotificationRecord {
    pub fn for_user(user_id: impl Into<String>, payload: &NotificationPayload) -> Self {
        Self {
            user_id: Some(user_id.into()),
            target_role: None,
            project_id: None,
            title: payload.title.clone(),
            body: payload.body.clone(),
        }
    }

    pub fn for_role(role: impl Into<String>, payload: &NotificationPayload) -> Self {
        Self {
            user_id: None,
            target_role: Some(role.into()),
            project_id: None,
            title: payload.title.clone(),
            body: payload.body.clone(),
        }
    }

    pub fn with_project(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    /// The single-recipient request this record describes.
    pub fn to_request(&self) -> Option<NotificationRequest> {
        recipient_request(
            self.user_id.as_deref(),
            self.target_role.as_deref(),
            &self.title,
            &self.body,
            self.project_id.as_deref(),
        )
    }
}

fn recipient_request(
    user_id: Option<&str>,
    target_role: Option<&str>,
    title: &str,
    body: &str,
    project_id: Option<&str>,
) -> Option<NotificationRequest> {
    let target = match (user_id, target_role) {
        (Some(user_id), _) => Target::users([user_id]),
        (None, Some(role)) => Target::role(role),
        (None, None) => return None,
    };

    Some(NotificationRequest {
        target,
        payload: NotificationPayload {
            title: title.to_string(),
            body: body.to_string(),
        },
        priority: Priority::Normal,
        project_id: project_id.map(str::to_string),
    })
}

/// A persisted notification delivery record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: Option<String>,
    pub target_role: Option<String>,
    pub project_id: Option<String>,
    pub title: String,
    pub body: String,
    pub delivery_status: DeliveryStatus,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Rebuild the request this record was created for, so it can be re-sent.
    pub fn to_request(&self) -> Option<NotificationRequest> {
        recipient_request(
            self.user_id.as_deref(),
            self.target_role.as_deref(),
            &self.title,
            &self.body,
            self.project_id.as_deref(),
        )
    }
}

/// Raw per-status counts for a stats window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: DeliveryStatus, count: u64) {
        match status {
            DeliveryStatus::Pending => self.pending += count,
            DeliveryStatus::Delivered => self.delivered += count,
            DeliveryStatus::Failed => self.failed += count,
        }
    }
}

/// Aggregated delivery statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total: u64,
    pub delivered: u64,
    pub failed: u64,
    pub pending: u64,
    /// Delivered share of total, as a rounded percentage. 0 when total is 0.
    pub delivery_rate: u32,
}

impl From<StatusCounts> for NotificationStats {
    fn from(counts: StatusCounts) -> Self {
        let total = counts.pending + counts.delivered + counts.failed;
        let delivery_rate = if total == 0 {
            0
        } else {
            (counts.delivered as f64 / total as f64 * 100.0).round() as u32
        };

        Self {
            total,
            delivered: counts.delivered,
            failed: counts.failed,
            pending: counts.pending,
            delivery_rate,
        }
    }
}
