//! Ordered delivery into the outgoing sink.
//!
//! Event payloads may be deferred (their rendering can require further CDP
//! round-trips), but delivery order must stay fixed per §ordering: for one
//! (event, channel) pair ids never go backwards, and a fan-out reaches
//! channels in subscription order. The queue therefore serializes all
//! deliveries through one forwarder task that awaits each payload in FIFO
//! order before writing the resolved message to the sink.
//!
//! A payload that resolves to a failure is delivered as an error message
//! (id `null`) instead of crashing the forwarder.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Error;
use crate::protocol::{EventEnvelope, OutgoingMessage};

// ============================================================================
// Types
// ============================================================================

/// Failure outcome of a deferred event payload.
#[derive(Debug, Clone)]
pub struct EventFailure {
    /// Description of the failure.
    pub message: String,
}

/// Outcome of an event payload: the rendered envelope or a failure.
pub type EventResult = Result<EventEnvelope, EventFailure>;

/// A deferred, shareable event payload.
///
/// Shared so the same occurrence can be delivered to late subscribers from
/// the buffer without re-running the underlying work.
pub type SharedEventResult = Shared<BoxFuture<'static, Arc<EventResult>>>;

/// Wraps an already-rendered envelope into a deferred payload.
#[must_use]
pub fn ready_event(envelope: EventEnvelope) -> SharedEventResult {
    let result: Arc<EventResult> = Arc::new(Ok(envelope));
    futures_util::future::ready(result).boxed().shared()
}

/// Wraps a future envelope computation into a deferred payload.
#[must_use]
pub fn deferred_event<F>(future: F) -> SharedEventResult
where
    F: Future<Output = EventResult> + Send + 'static,
{
    async move { Arc::new(future.await) }.boxed().shared()
}

// ============================================================================
// OutboundQueue
// ============================================================================

enum Delivery {
    /// An already-resolved message (command responses).
    Immediate(OutgoingMessage),
    /// A deferred event payload for the given channel.
    Deferred {
        payload: SharedEventResult,
        channel: Option<String>,
    },
}

/// FIFO bridge between producers and the outgoing sink.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl OutboundQueue {
    /// Creates the queue and spawns its forwarder task.
    ///
    /// The forwarder stops when every queue handle is dropped or the sink
    /// is closed by the transport.
    #[must_use]
    pub fn new(sink: mpsc::UnboundedSender<OutgoingMessage>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let message = match delivery {
                    Delivery::Immediate(message) => message,
                    Delivery::Deferred { payload, channel } => match payload.await.as_ref() {
                        Ok(envelope) => OutgoingMessage::event(envelope.clone(), channel),
                        Err(failure) => {
                            let error = Error::UnknownError {
                                message: failure.message.clone(),
                                stacktrace: None,
                            };
                            OutgoingMessage::error(&error, None, channel)
                        }
                    },
                };

                if sink.send(message).is_err() {
                    debug!("Outgoing sink closed, stopping forwarder");
                    break;
                }
            }
        });

        Self { tx }
    }

    /// Queues a resolved message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkClosed`] if the forwarder has stopped.
    pub fn send_message(&self, message: OutgoingMessage) -> crate::error::Result<()> {
        self.tx
            .send(Delivery::Immediate(message))
            .map_err(|_| Error::SinkClosed)
    }

    /// Queues a deferred event payload for a channel.
    pub fn send_event(&self, payload: SharedEventResult, channel: Option<String>) {
        // The session outlives individual deliveries; a closed queue only
        // means the transport went away, so drops are silent here.
        let _ = self.tx.send(Delivery::Deferred { payload, channel });
    }
}

// ============================================================================
// Tests
// ============================================================================
