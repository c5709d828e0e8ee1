//! CDP client boundary.
//!
//! The mapper never owns a socket: the transport layer hands it objects
//! implementing [`CdpClient`] (one per attached session, plus one
//! browser-level client) and an implementation of [`CdpConnection`] to
//! resolve session IDs to clients. Incoming CDP events are fed to the mapper
//! separately, already framed, via [`MapperSession::handle_cdp_event`].
//!
//! [`MapperSession::handle_cdp_event`]: crate::session::MapperSession::handle_cdp_event

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::identifiers::CdpSessionId;

// ============================================================================
// Constants
// ============================================================================

/// Generic CDP server error code (`-32000`).
///
/// CDP reports most page-state failures under this one code; callers must
/// inspect the message to tell them apart.
pub const CDP_GENERIC_ERROR: i64 = -32000;

/// Message of the benign race where a command reaches a page that was
/// destroyed mid-flight (e.g. by a fatal certificate error during close).
const NOT_ATTACHED_MESSAGE: &str = "Not attached to an active page";

// ============================================================================
// CdpError
// ============================================================================

/// Error response from a CDP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdpError {
    /// CDP error code.
    pub code: i64,
    /// CDP error message.
    pub message: String,
}

impl CdpError {
    /// Creates a new CDP error.
    #[inline]
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` if this is the benign "page already gone" race.
    ///
    /// This is the only CDP failure the close path swallows; everything
    /// else propagates.
    #[inline]
    #[must_use]
    pub fn is_not_attached(&self) -> bool {
        self.code == CDP_GENERIC_ERROR && self.message == NOT_ATTACHED_MESSAGE
    }
}

impl fmt::Display for CdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for CdpError {}

/// Result alias for CDP round-trips.
pub type CdpResult<T> = std::result::Result<T, CdpError>;

// ============================================================================
// CdpClient
// ============================================================================

/// A single CDP session capable of command round-trips.
///
/// The browser-level client has no session ID; target clients carry the
/// session ID under which they were attached.
#[async_trait]
pub trait CdpClient: Send + Sync {
    /// Sends a CDP command and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns [`CdpError`] when the browser reports an error response.
    async fn send_command(&self, method: &str, params: Value) -> CdpResult<Value>;

    /// Returns the session ID, or `None` for the browser-level client.
    fn session_id(&self) -> Option<&CdpSessionId>;
}

// ============================================================================
// CdpConnection
// ============================================================================

/// Resolves session IDs to [`CdpClient`] instances.
pub trait CdpConnection: Send + Sync {
    /// Returns the client for an attached session, if it is still alive.
    fn client(&self, session: &CdpSessionId) -> Option<Arc<dyn CdpClient>>;

    /// Returns the browser-level client.
    fn browser_client(&self) -> Arc<dyn CdpClient>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_attached_predicate() {
        let benign = CdpError::new(CDP_GENERIC_ERROR, "Not attached to an active page");
        assert!(benign.is_not_attached());

        let other_message = CdpError::new(CDP_GENERIC_ERROR, "Target closed");
        assert!(!other_message.is_not_attached());

        let other_code = CdpError::new(-32601, "Not attached to an active page");
        assert!(!other_code.is_not_attached());
    }

    #[test]
    fn test_display() {
        let err = CdpError::new(-32601, "Method not found");
        assert_eq!(err.to_string(), "Method not found (-32601)");
    }
}
