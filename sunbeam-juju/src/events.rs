//! Wait progress events (JSON lines over a broadcast channel).

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_BUFFER: usize = 256;

pub const WAIT_STARTED: &str = "wait_started";
pub const APPLICATION_READY: &str = "application_ready";
pub const APPLICATION_FAILED: &str = "application_failed";
pub const WAIT_TIMED_OUT: &str = "wait_timed_out";
pub const WAIT_COMPLETED: &str = "wait_completed";

/// Broadcast channel for wait events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl EventBus {
    /// Create a new event bus; the buffer is never smaller than 256 events.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(DEFAULT_BUFFER));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Emit a structured event with payload.
    pub fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(err) => {
                warn!("Failed to serialize event {}: {}", event, err);
                return;
            }
        };
        let payload = json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        // No subscribers is fine.
        let _ = self.sender.send(payload.to_string());
    }
}
