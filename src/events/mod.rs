//! Event subscription, buffering, and delivery.
//!
//! [`EventBroker`] owns the subscription tables and buffers;
//! [`OutboundQueue`] serializes delivery into the outgoing sink.

mod broker;
mod outbound;
mod subscriptions;

pub use broker::EventBroker;
pub use outbound::{
    EventFailure, EventResult, OutboundQueue, SharedEventResult, deferred_event, ready_event,
};
pub use subscriptions::{Channel, ContextScope, SubscriptionManager};
