//! Error types for the BiDi mapper.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use bidi_mapper::{Result, Error};
//!
//! fn resolve(store: &ContextStore, id: &BrowsingContextId) -> Result<()> {
//!     let context = store.get(id)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! *Protocol errors* carry a BiDi error code and are rendered into correlated
//! error responses; they never crash the process. Everything else (CDP
//! failures, serialization failures, a closed outgoing sink) is an internal
//! error which the dispatcher reports as a generic `"unknown error"` response.
//!
//! | Category | Variants |
//! |----------|----------|
//! | Protocol | [`Error::UnknownCommand`], [`Error::UnsupportedOperation`], [`Error::InvalidArgument`], [`Error::NoSuchContext`], [`Error::NoSuchIntercept`], [`Error::NoSuchRequest`], [`Error::NoSuchScript`], [`Error::UnknownError`] |
//! | CDP | [`Error::Cdp`] |
//! | External | [`Error::Json`], [`Error::SinkClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::cdp::CdpError;
use crate::identifiers::{BrowsingContextId, InterceptId, NetworkId, PreloadScriptId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Protocol variants map one-to-one onto BiDi error codes via
/// [`Error::error_code`].
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Command method is not part of the protocol.
    #[error("Unknown command '{command}'")]
    UnknownCommand {
        /// The unrecognized command method.
        command: String,
    },

    /// Command method is recognized but not implemented.
    #[error("Command '{command}' not yet implemented")]
    UnsupportedOperation {
        /// The unimplemented command method.
        command: String,
    },

    /// Command parameters are invalid.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Browsing context ID does not exist.
    #[error("No such context: {context}")]
    NoSuchContext {
        /// The missing context ID.
        context: BrowsingContextId,
    },

    /// Intercept ID does not exist.
    #[error("Intercept '{intercept}' does not exist")]
    NoSuchIntercept {
        /// The missing intercept ID.
        intercept: InterceptId,
    },

    /// No blocked network request with the given ID.
    #[error("No blocked request found for network id '{request}'")]
    NoSuchRequest {
        /// The missing request ID.
        request: NetworkId,
    },

    /// Preload script ID does not exist.
    #[error("No such script: {script}")]
    NoSuchScript {
        /// The missing script ID.
        script: PreloadScriptId,
    },

    /// Unexpected failure reported back to the caller.
    ///
    /// Produced at the dispatcher boundary when a command fails with a
    /// non-protocol error; carries the original message and, for
    /// diagnostics, a rendering of the source error.
    #[error("Unknown error: {message}")]
    UnknownError {
        /// Message of the original error.
        message: String,
        /// Debug rendering of the original error, if any.
        stacktrace: Option<String>,
    },

    // ========================================================================
    // CDP Errors
    // ========================================================================
    /// Error response from a CDP command.
    #[error("CDP error: {0}")]
    Cdp(#[from] CdpError),

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outgoing message sink was dropped by the transport.
    #[error("Outgoing message sink closed")]
    SinkClosed,
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an unknown command error.
    #[inline]
    pub fn unknown_command(command: impl Into<String>) -> Self {
        Self::UnknownCommand {
            command: command.into(),
        }
    }

    /// Creates an unsupported operation error.
    #[inline]
    pub fn unsupported_operation(command: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            command: command.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a no such context error.
    #[inline]
    pub fn no_such_context(context: BrowsingContextId) -> Self {
        Self::NoSuchContext { context }
    }

    /// Creates a no such intercept error.
    #[inline]
    pub fn no_such_intercept(intercept: InterceptId) -> Self {
        Self::NoSuchIntercept { intercept }
    }

    /// Creates a no such request error.
    #[inline]
    pub fn no_such_request(request: NetworkId) -> Self {
        Self::NoSuchRequest { request }
    }

    /// Creates a no such script error.
    #[inline]
    pub fn no_such_script(script: PreloadScriptId) -> Self {
        Self::NoSuchScript { script }
    }
}

// ============================================================================
// Error Classification
// ============================================================================

impl Error {
    /// Returns `true` if this is a typed protocol error.
    ///
    /// Protocol errors are rendered into error responses with their own
    /// error code; anything else becomes a generic `"unknown error"`.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownCommand { .. }
                | Self::UnsupportedOperation { .. }
                | Self::InvalidArgument { .. }
                | Self::NoSuchContext { .. }
                | Self::NoSuchIntercept { .. }
                | Self::NoSuchRequest { .. }
                | Self::NoSuchScript { .. }
                | Self::UnknownError { .. }
        )
    }

    /// Returns the BiDi error code for this error.
    ///
    /// Context lookups use the spec code `"no such frame"`: browsing
    /// contexts and frames share one ID space.
    #[inline]
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownCommand { .. } => "unknown command",
            Self::UnsupportedOperation { .. } => "unsupported operation",
            Self::InvalidArgument { .. } => "invalid argument",
            Self::NoSuchContext { .. } => "no such frame",
            Self::NoSuchIntercept { .. } => "no such intercept",
            Self::NoSuchRequest { .. } => "no such request",
            Self::NoSuchScript { .. } => "no such script",
            _ => "unknown error",
        }
    }

    /// Returns the stacktrace payload for the error response, if any.
    #[inline]
    #[must_use]
    pub fn stacktrace(&self) -> Option<&str> {
        match self {
            Self::UnknownError { stacktrace, .. } => stacktrace.as_deref(),
            _ => None,
        }
    }

    /// Wraps a non-protocol error into [`Error::UnknownError`].
    ///
    /// The original error's `Display` becomes the message and its `Debug`
    /// rendering the stacktrace; the original shape is never reflected to
    /// the caller.
    #[must_use]
    pub fn into_unknown(self) -> Self {
        if self.is_protocol_error() {
            return self;
        }
        Self::UnknownError {
            message: self.to_string(),
            stacktrace: Some(format!("{self:?}")),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
