//! Progress stream: ordered updates for whoever is watching a session.
//!
//! Updates are published on a broadcast channel. Publishing never blocks
//! and never fails: with no subscribers the update is dropped, and a slow
//! subscriber lags instead of applying backpressure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Running,
    Completed,
    Failed,
}

/// One progress update for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub session_id: String,
    pub status: ProgressStatus,

    /// 1-based step (loop iteration) the update belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn running(session_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: ProgressStatus::Running,
            current_step: None,
            description: Some(description.into()),
            result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.current_step = Some(step);
        self
    }

    pub fn with_status(mut self, status: ProgressStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// A broadcast-based bus for progress updates.
pub struct EventBus {
    sender: broadcast::Sender<Arc<ProgressUpdate>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an update to all subscribers.
    pub fn publish(&self, update: ProgressUpdate) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(update));
    }

    /// Subscribe to receive updates.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ProgressUpdate>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
