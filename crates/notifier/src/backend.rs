//! Push delivery backends.
//!
//! A backend performs the raw outbound call and reports the backend's own
//! error text. Translating that text into user-facing categories is the
//! sender's job.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use beacon_common::types::{NotificationPayload, Target};

/// Raw outcome of a failed backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend answered and refused the delivery.
    #[error("push backend rejected delivery: {0}")]
    Rejected(String),

    /// The call never completed.
    #[error("push transport failed: {0}")]
    Transport(String),
}

/// Outbound push delivery.
#[async_trait]
pub trait PushBackend: Send + Sync {
    async fn deliver(
        &self,
        target: &Target,
        payload: &NotificationPayload,
        project_id: Option<&str>,
    ) -> Result<(), BackendError>;
}

/// Wire shape of the target on the push endpoint: `{role}` or `{userIds}`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireTarget<'a> {
    Role {
        role: &'a str,
    },
    Users {
        #[serde(rename = "userIds")]
        user_ids: &'a [String],
    },
}

impl<'a> From<&'a Target> for WireTarget<'a> {
    fn from(target: &'a Target) -> Self {
        match target {
            Target::Role { role } => WireTarget::Role { role },
            Target::Users { ids } => WireTarget::Users { user_ids: ids },
        }
    }
}

#[derive(Debug, Serialize)]
struct DeliveryBody<'a> {
    #[serde(flatten)]
    target: WireTarget<'a>,
    title: &'a str,
    body: &'a str,
    #[serde(rename = "projectId", skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DeliveryResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// HTTP push backend: POSTs JSON to a single delivery endpoint.
pub struct HttpPushBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpPushBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Pull the most useful error text out of a non-2xx response body.
    fn error_text(body: &str, status: reqwest::StatusCode) -> String {
        let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
        let from_json = parsed.as_ref().and_then(|v| {
            v.get("error")
                .and_then(|e| e.as_str().map(str::to_string).or_else(|| Some(e.to_string())))
                .or_else(|| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        });

        match from_json {
            Some(text) => text,
            None if !body.trim().is_empty() => body.trim().to_string(),
            None => format!("HTTP {}", status),
        }
    }
}

#[async_trait]
impl PushBackend for HttpPushBackend {
    async fn deliver(
        &self,
        target: &Target,
        payload: &NotificationPayload,
        project_id: Option<&str>,
    ) -> Result<(), BackendError> {
        let body = DeliveryBody {
            target: target.into(),
            title: &payload.title,
            body: &payload.body,
            project_id,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(BackendError::Rejected(Self::error_text(&text, status)));
        }

        if text.trim().is_empty() {
            return Ok(());
        }

        // Non-JSON 2xx bodies count as delivered.
        let Ok(parsed) = serde_json::from_str::<DeliveryResponse>(&text) else {
            return Ok(());
        };
        if parsed.success && parsed.error.is_none() {
            Ok(())
        } else {
            Err(BackendError::Rejected(
                parsed
                    .error
                    .unwrap_or_else(|| "push backend reported failure".to_string()),
            ))
        }
    }
}

/// Stand-in used when no push endpoint is configured.
pub struct UnconfiguredBackend;

#[async_trait]
impl PushBackend for UnconfiguredBackend {
    async fn deliver(
        &self,
        _target: &Target,
        _payload: &NotificationPayload,
        _project_id: Option<&str>,
    ) -> Result<(), BackendError> {
        Err(BackendError::Rejected(
            "VAPID keys are not configured on the push server".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> NotificationPayload {
        NotificationPayload {
            title: "Project approved".to_string(),
            body: "Project #12 was approved".to_string(),
        }
    }

    fn backend(server: &MockServer) -> HttpPushBackend {
        HttpPushBackend::new(
            format!("{}/push", server.uri()),
            Some("secret".to_string()),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_posts_user_target_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/push"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(serde_json::json!({
                "userIds": ["u1", "u2"],
                "title": "Project approved",
                "body": "Project #12 was approved",
                "projectId": "p12"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let result = backend(&server)
            .deliver(&Target::users(["u1", "u2"]), &payload(), Some("p12"))
            .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_posts_role_target_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "role": "worker",
                "title": "Project approved",
                "body": "Project #12 was approved"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let result = backend(&server)
            .deliver(&Target::role("worker"), &payload(), None)
            .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_error_status_is_rejection_with_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"error": "VAPID keys missing"})),
            )
            .mount(&server)
            .await;

        let result = backend(&server)
            .deliver(&Target::role("agent"), &payload(), None)
            .await;
        assert_eq!(
            result,
            Err(BackendError::Rejected("VAPID keys missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_plain_text_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Permission denied"))
            .mount(&server)
            .await;

        let result = backend(&server)
            .deliver(&Target::role("agent"), &payload(), None)
            .await;
        assert_eq!(
            result,
            Err(BackendError::Rejected("Permission denied".to_string()))
        );
    }

    #[tokio::test]
    async fn test_success_false_body_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"success": false, "error": "no subscriptions"})),
            )
            .mount(&server)
            .await;

        let result = backend(&server)
            .deliver(&Target::users(["u1"]), &payload(), None)
            .await;
        assert_eq!(
            result,
            Err(BackendError::Rejected("no subscriptions".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let backend = HttpPushBackend::new(
            "http://127.0.0.1:1/push",
            None,
            Duration::from_millis(500),
        )
        .unwrap();

        let result = backend
            .deliver(&Target::users(["u1"]), &payload(), None)
            .await;
        assert!(matches!(result, Err(BackendError::Transport(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_backend_mentions_vapid() {
        let result = UnconfiguredBackend
            .deliver(&Target::role("client"), &payload(), None)
            .await;
        match result {
            Err(BackendError::Rejected(text)) => assert!(text.contains("VAPID")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
