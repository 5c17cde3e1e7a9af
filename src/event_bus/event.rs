//! Status events delivered to subscribers

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Ephemeral progress event; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub id: String,
    pub phase: String,
    pub message: String,
    pub severity: Severity,
    /// 0-100
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_details: Option<Value>,
}

impl StatusEvent {
    pub fn new(
        phase: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        progress: u8,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phase: phase.into(),
            message: message.into(),
            severity,
            progress: progress.min(100),
            technical_details: None,
        }
    }

    pub fn info(phase: impl Into<String>, message: impl Into<String>, progress: u8) -> Self {
        Self::new(phase, message, Severity::Info, progress)
    }

    pub fn success(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(phase, message, Severity::Success, 100)
    }

    pub fn warning(phase: impl Into<String>, message: impl Into<String>, progress: u8) -> Self {
        Self::new(phase, message, Severity::Warning, progress)
    }

    pub fn error(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(phase, message, Severity::Error, 100)
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.technical_details = Some(details);
        self
    }
}

/// What a live sink receives
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Event(StatusEvent),
    /// No-op keep-alive used to detect half-open connections
    Heartbeat,
}

impl BusMessage {
    pub fn into_event(self) -> Option<StatusEvent> {
        match self {
            BusMessage::Event(event) => Some(event),
            BusMessage::Heartbeat => None,
        }
    }
}
