//! BiDi event names and envelopes.
//!
//! Event kinds form a closed set: subscription requests referencing a name
//! outside it fail with "invalid argument". A few kinds are *bufferable* —
//! their recent occurrences are retained so late subscribers can catch up.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use serde_json::Value;

// ============================================================================
// EventName
// ============================================================================

/// Closed set of event kinds the mapper can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// `browsingContext.contextCreated`
    ContextCreated,
    /// `browsingContext.contextDestroyed`
    ContextDestroyed,
    /// `browsingContext.navigationStarted`
    NavigationStarted,
    /// `browsingContext.domContentLoaded`
    DomContentLoaded,
    /// `browsingContext.load`
    Load,
    /// `network.beforeRequestSent`
    BeforeRequestSent,
    /// `network.responseStarted`
    ResponseStarted,
    /// `network.responseCompleted`
    ResponseCompleted,
    /// `network.fetchError`
    FetchError,
    /// `network.authRequired`
    AuthRequired,
    /// `log.entryAdded`
    LogEntryAdded,
}

/// Buffer capacity for `log.entryAdded`.
const LOG_BUFFER_CAPACITY: usize = 100;

impl EventName {
    /// Returns the wire name in `module.eventName` format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContextCreated => "browsingContext.contextCreated",
            Self::ContextDestroyed => "browsingContext.contextDestroyed",
            Self::NavigationStarted => "browsingContext.navigationStarted",
            Self::DomContentLoaded => "browsingContext.domContentLoaded",
            Self::Load => "browsingContext.load",
            Self::BeforeRequestSent => "network.beforeRequestSent",
            Self::ResponseStarted => "network.responseStarted",
            Self::ResponseCompleted => "network.responseCompleted",
            Self::FetchError => "network.fetchError",
            Self::AuthRequired => "network.authRequired",
            Self::LogEntryAdded => "log.entryAdded",
        }
    }

    /// Parses a wire name into an event kind.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "browsingContext.contextCreated" => Some(Self::ContextCreated),
            "browsingContext.contextDestroyed" => Some(Self::ContextDestroyed),
            "browsingContext.navigationStarted" => Some(Self::NavigationStarted),
            "browsingContext.domContentLoaded" => Some(Self::DomContentLoaded),
            "browsingContext.load" => Some(Self::Load),
            "network.beforeRequestSent" => Some(Self::BeforeRequestSent),
            "network.responseStarted" => Some(Self::ResponseStarted),
            "network.responseCompleted" => Some(Self::ResponseCompleted),
            "network.fetchError" => Some(Self::FetchError),
            "network.authRequired" => Some(Self::AuthRequired),
            "log.entryAdded" => Some(Self::LogEntryAdded),
            _ => None,
        }
    }

    /// Returns the buffer capacity for bufferable event kinds.
    ///
    /// `None` means occurrences are not retained for late subscribers.
    #[inline]
    #[must_use]
    pub fn buffer_capacity(self) -> Option<usize> {
        match self {
            Self::LogEntryAdded => Some(LOG_BUFFER_CAPACITY),
            _ => None,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// EventEnvelope
// ============================================================================

/// One event occurrence ready for the wire: kind plus rendered params.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Event kind.
    #[serde(skip)]
    pub name: EventName,
    /// Event parameters.
    pub params: Value,
}

impl EventEnvelope {
    /// Creates an envelope for the given kind.
    #[inline]
    #[must_use]
    pub fn new(name: EventName, params: Value) -> Self {
        Self { name, params }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        for name in [
            EventName::ContextCreated,
            EventName::ContextDestroyed,
            EventName::NavigationStarted,
            EventName::DomContentLoaded,
            EventName::Load,
            EventName::BeforeRequestSent,
            EventName::ResponseStarted,
            EventName::ResponseCompleted,
            EventName::FetchError,
            EventName::AuthRequired,
            EventName::LogEntryAdded,
        ] {
            assert_eq!(EventName::parse(name.as_str()), Some(name));
        }
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(EventName::parse("script.realmCreated"), None);
        assert_eq!(EventName::parse(""), None);
    }

    #[test]
    fn test_buffer_capacity() {
        assert_eq!(EventName::LogEntryAdded.buffer_capacity(), Some(100));
        assert_eq!(EventName::Load.buffer_capacity(), None);
    }
}
