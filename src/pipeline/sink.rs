//! Destinations for detected events.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while delivering an event.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Webhook {url} answered with status {status}")]
    Status { url: String, status: u16 },
}

/// An event found in one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEvent {
    pub id: String,
    pub event_name: String,
    /// Detection engine that produced the event.
    pub source: String,
    pub message_id: String,
    pub task_id: Option<String>,
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    pub org_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Receives every detected event of a pipeline run.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch(&self, event: &DetectedEvent) -> Result<(), SinkError>;
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DetectedEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DetectedEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn dispatch(&self, event: &DetectedEvent) -> Result<(), SinkError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// POSTs each event as JSON to its definition's webhook URL.
///
/// Events without a webhook URL are ignored.
pub struct WebhookSink {
    http_client: Client,
}

impl Default for WebhookSink {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSink {
    pub fn new() -> Self {
        let http_client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http_client }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn dispatch(&self, event: &DetectedEvent) -> Result<(), SinkError> {
        let Some(url) = event.webhook_url.as_deref() else {
            return Ok(());
        };

        let response = self
            .http_client
            .post(url)
            .json(event)
            .send()
            .await
            .map_err(|e| SinkError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        debug!(event = %event.event_name, url = %url, "Webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(webhook_url: Option<&str>) -> DetectedEvent {
        DetectedEvent {
            id: "e1".to_string(),
            event_name: "refund".to_string(),
            source: "keyword_detection".to_string(),
            message_id: "output_1".to_string(),
            task_id: Some("1".to_string()),
            session_id: None,
            project_id: Some("p1".to_string()),
            org_id: None,
            created_at: Utc::now(),
            confidence: None,
            webhook_url: webhook_url.map(str::to_string),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.dispatch(&event(None)).await.expect("memory sink never fails");
        sink.dispatch(&event(None)).await.expect("memory sink never fails");
        assert_eq!(sink.events().await.len(), 2);
    }

    #[tokio::test]
    async fn test_webhook_sink_skips_events_without_url() {
        let sink = WebhookSink::new();
        assert!(sink.dispatch(&event(None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_sink_reports_connection_errors() {
        let sink = WebhookSink::new();
        let result = sink.dispatch(&event(Some("http://localhost:65535/hook"))).await;
        assert!(matches!(result, Err(SinkError::Http(_))));
    }

    #[test]
    fn test_event_serialization_skips_empty_fields() {
        let json = serde_json::to_string(&event(None)).expect("serializes");
        assert!(json.contains("\"event_name\":\"refund\""));
        assert!(!json.contains("webhook_url"));
    }
}
