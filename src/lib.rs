//! BiDi mapper - WebDriver BiDi to Chrome DevTools Protocol translator.
//!
//! This library implements the stateful coordination layer between an
//! automation client speaking WebDriver BiDi and a browser exposing CDP:
//! one BiDi session multiplexed over many CDP sessions, with stable
//! higher-level objects (browsing contexts, network requests) reconstructed
//! from independent, unordered low-level event streams.
//!
//! # Architecture
//!
//! - **Command flow**: the transport feeds [`MapperSession::process_command`]
//!   with command envelopes; the dispatcher routes each to its domain
//!   handler and emits exactly one correlated response into the outgoing
//!   sink.
//! - **Event flow**: CDP events enter via
//!   [`MapperSession::handle_cdp_event`], mutate the context tree and
//!   network state, and fan out BiDi events through the broker to
//!   subscribed channels.
//!
//! The physical transport, parameter schemas beyond serde validation,
//! process bootstrapping, and the debug UI are out of scope: the crate
//! consumes a [`cdp::CdpConnection`] implementation and an outgoing
//! message sink, nothing else.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bidi_mapper::{MapperSession, identifiers::BrowsingContextId};
//! use tokio::sync::mpsc;
//!
//! # async fn run(connection: Arc<dyn bidi_mapper::cdp::CdpConnection>) {
//! let (sink, mut outgoing) = mpsc::unbounded_channel();
//! let session = MapperSession::new(
//!     connection,
//!     BrowsingContextId::new("mapper-tab"),
//!     sink,
//! );
//!
//! session
//!     .process_raw_command(r#"{"id": 1, "method": "session.status", "params": {}}"#)
//!     .await;
//! let response = outgoing.recv().await;
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cdp`] | CDP boundary: client traits, typed events, target bindings |
//! | [`context`] | Browsing context tree and `browsingContext.*` commands |
//! | [`dispatch`] | Command dispatch and response correlation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Event subscription, buffering, and ordered delivery |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`network`] | Request records, intercepts, blocked requests |
//! | [`protocol`] | BiDi wire types (commands, responses, events) |
//! | [`script`] | Preload script registrations |
//! | [`session`] | Top-level session wiring |

// ============================================================================
// Modules
// ============================================================================

/// CDP boundary: client traits, typed events, target bindings.
pub mod cdp;

/// Browsing context tree: contexts, store, processor.
pub mod context;

/// Command dispatch and response correlation.
pub mod dispatch;

/// Error types and result aliases.
pub mod error;

/// Event subscription, buffering, and ordered delivery.
pub mod events;

/// Type-safe identifiers for mapper entities.
pub mod identifiers;

/// Network request tracking and interception.
pub mod network;

/// BiDi wire protocol types.
pub mod protocol;

/// Preload script registrations.
pub mod script;

/// Top-level session wiring.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

// Core entry points
pub use dispatch::CommandDispatcher;
pub use session::MapperSession;

// Error types
pub use error::{Error, Result};

// Frequently used protocol types
pub use protocol::{Command, CommandEnvelope, EventName, OutgoingMessage};
