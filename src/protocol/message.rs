//! Outgoing wire messages.
//!
//! Everything the mapper emits — command responses, error responses, events —
//! is an [`OutgoingMessage`], tagged with the delivery channel carried over
//! from the originating command or subscription. The transport consumes these
//! from the outgoing sink and owns framing.
//!
//! # Format
//!
//! ```json
//! {"type": "success", "id": 7, "result": {...}}
//! {"type": "error", "id": 7, "error": "invalid argument", "message": "..."}
//! {"type": "event", "method": "browsingContext.load", "params": {...}}
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::protocol::EventEnvelope;

// ============================================================================
// OutgoingMessage
// ============================================================================

/// A message ready for the transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingMessage {
    /// Successful command response.
    Success {
        /// The command's id.
        id: u64,
        /// Command result.
        result: Value,
        /// Delivery channel.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },

    /// Error response, correlated to a command when `id` is present.
    Error {
        /// The command's id; `null` for failures without a command.
        id: Option<u64>,
        /// BiDi error code.
        error: String,
        /// Human-readable message.
        message: String,
        /// Diagnostic stack trace.
        #[serde(skip_serializing_if = "Option::is_none")]
        stacktrace: Option<String>,
        /// Delivery channel.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },

    /// Event notification.
    Event {
        /// Event name in `module.eventName` format.
        method: String,
        /// Event parameters.
        params: Value,
        /// Delivery channel.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
}

impl OutgoingMessage {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: u64, result: Value, channel: Option<String>) -> Self {
        Self::Success {
            id,
            result,
            channel,
        }
    }

    /// Creates an error response from a crate error.
    #[must_use]
    pub fn error(error: &Error, id: Option<u64>, channel: Option<String>) -> Self {
        Self::Error {
            id,
            error: error.error_code().to_string(),
            message: error.to_string(),
            stacktrace: error.stacktrace().map(str::to_string),
            channel,
        }
    }

    /// Creates an event message.
    #[inline]
    #[must_use]
    pub fn event(envelope: EventEnvelope, channel: Option<String>) -> Self {
        Self::Event {
            method: envelope.name.as_str().to_string(),
            params: envelope.params,
            channel,
        }
    }

    /// Returns the delivery channel.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Success { channel, .. }
            | Self::Error { channel, .. }
            | Self::Event { channel, .. } => channel.as_deref(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::EventName;

    #[test]
    fn test_success_serialization() {
        let message = OutgoingMessage::success(3, json!({"contexts": []}), None);
        let json = serde_json::to_value(&message).expect("serialize");

        assert_eq!(json["type"], "success");
        assert_eq!(json["id"], 3);
        assert!(json.get("channel").is_none());
    }

    #[test]
    fn test_error_serialization() {
        let err = Error::invalid_argument("viewport on nested context");
        let message = OutgoingMessage::error(&err, Some(9), Some("ch".to_string()));
        let json = serde_json::to_value(&message).expect("serialize");

        assert_eq!(json["type"], "error");
        assert_eq!(json["id"], 9);
        assert_eq!(json["error"], "invalid argument");
        assert_eq!(json["channel"], "ch");
        assert!(json.get("stacktrace").is_none());
    }

    #[test]
    fn test_error_without_command_id() {
        let err = Error::invalid_argument("deferred event failed");
        let message = OutgoingMessage::error(&err, None, None);
        let json = serde_json::to_value(&message).expect("serialize");

        assert_eq!(json["id"], Value::Null);
    }

    #[test]
    fn test_event_serialization() {
        let envelope = EventEnvelope::new(EventName::Load, json!({"context": "C1"}));
        let message = OutgoingMessage::event(envelope, Some("ch".to_string()));
        let json = serde_json::to_value(&message).expect("serialize");

        assert_eq!(json["type"], "event");
        assert_eq!(json["method"], "browsingContext.load");
        assert_eq!(json["params"]["context"], "C1");
    }
}
