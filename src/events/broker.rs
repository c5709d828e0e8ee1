//! Event fan-out, buffering, and replay.
//!
//! The broker assigns every produced event a process-wide, strictly
//! increasing ID and fans it out to the channels subscribed to its
//! (kind, context) pair, in ascending subscription-time order. Occurrences
//! of bufferable kinds are retained (bounded per (kind, context)) so a
//! subscriber arriving late catches up on exactly the occurrences it has
//! not seen: the broker tracks the last ID sent per
//! (kind, context, channel) and replays only newer ones, which makes
//! subscribe → unsubscribe → subscribe free of duplicates.
//!
//! Payloads are deferred futures; buffering and bookkeeping never await
//! them. A payload that fails is delivered as a failed-event result by the
//! outbound queue.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::context::ContextStore;
use crate::error::{Error, Result};
use crate::events::outbound::{OutboundQueue, SharedEventResult, ready_event};
use crate::events::subscriptions::{Channel, ContextScope, SubscriptionManager};
use crate::identifiers::BrowsingContextId;
use crate::protocol::{EventEnvelope, EventName};

// ============================================================================
// EventRecord
// ============================================================================

/// One event occurrence: ID plus deferred payload.
///
/// The originating context is the buffer key, not record state.
#[derive(Clone)]
struct EventRecord {
    id: u64,
    payload: SharedEventResult,
}

// ============================================================================
// Broker State
// ============================================================================

#[derive(Default)]
struct BrokerState {
    subscriptions: SubscriptionManager,
    /// Buffered occurrences per (kind, context). Bufferable kinds only.
    buffers: FxHashMap<(EventName, ContextScope), VecDeque<EventRecord>>,
    /// Highest ID delivered per (kind, context, channel).
    last_sent: FxHashMap<(EventName, ContextScope, Channel), u64>,
    /// Contexts that ever produced a given kind; drives global replay.
    event_contexts: FxHashMap<EventName, FxHashSet<ContextScope>>,
}

impl BrokerState {
    fn buffer_event(&mut self, name: EventName, context: &ContextScope, record: EventRecord) {
        let Some(capacity) = name.buffer_capacity() else {
            return;
        };
        let buffer = self.buffers.entry((name, context.clone())).or_default();
        buffer.push_back(record);
        if buffer.len() > capacity {
            buffer.pop_front();
        }
        self.event_contexts
            .entry(name)
            .or_default()
            .insert(context.clone());
    }

    fn mark_sent(&mut self, name: EventName, context: &ContextScope, channel: &Channel, id: u64) {
        if name.buffer_capacity().is_none() {
            return;
        }
        let entry = self
            .last_sent
            .entry((name, context.clone(), channel.clone()))
            .or_insert(0);
        *entry = (*entry).max(id);
    }

    /// Buffered occurrences not yet sent to `channel`, ascending by ID.
    ///
    /// For a global scope, occurrences buffered per still-existing context
    /// are merged in; contexts destroyed since are skipped.
    fn buffered_events(
        &self,
        store: &ContextStore,
        name: EventName,
        context: &ContextScope,
        channel: &Channel,
    ) -> Vec<EventRecord> {
        let last_sent = self
            .last_sent
            .get(&(name, context.clone(), channel.clone()))
            .copied()
            .unwrap_or(0);

        let mut result: Vec<EventRecord> = self
            .buffers
            .get(&(name, context.clone()))
            .map(|buffer| {
                buffer
                    .iter()
                    .filter(|record| record.id > last_sent)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if context.is_none()
            && let Some(scopes) = self.event_contexts.get(&name)
        {
            for scope in scopes {
                let Some(context_id) = scope else {
                    // Context-less occurrences are already in the result.
                    continue;
                };
                if !store.has_context(context_id) {
                    continue;
                }
                result.extend(self.buffered_events(store, name, scope, channel));
            }
        }

        result.sort_by_key(|record| record.id);
        result
    }
}

// ============================================================================
// EventBroker
// ============================================================================

/// Subscription, buffering, and delivery engine.
pub struct EventBroker {
    /// Next event ID; IDs are strictly increasing process-wide.
    next_event_id: AtomicU64,
    state: Mutex<BrokerState>,
    store: Arc<ContextStore>,
    outbound: OutboundQueue,
}

impl EventBroker {
    /// Creates a broker delivering through the given queue.
    #[must_use]
    pub fn new(store: Arc<ContextStore>, outbound: OutboundQueue) -> Self {
        Self {
            next_event_id: AtomicU64::new(1),
            state: Mutex::new(BrokerState::default()),
            store,
            outbound,
        }
    }

    /// Registers an already-rendered event occurrence.
    pub fn register_event(
        &self,
        name: EventName,
        context: ContextScope,
        params: Value,
    ) {
        self.register_promise_event(name, context, ready_event(EventEnvelope::new(name, params)));
    }

    /// Registers an event occurrence whose payload is still being computed.
    ///
    /// Bookkeeping is synchronous; the payload's resolution is observed
    /// only by the outbound queue at delivery time.
    pub fn register_promise_event(
        &self,
        name: EventName,
        context: ContextScope,
        payload: SharedEventResult,
    ) {
        let id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        let record = EventRecord {
            id,
            payload: payload.clone(),
        };

        let mut state = self.state.lock();
        state.buffer_event(name, &context, record);
        for channel in state.subscriptions.channels_for(name, &context) {
            self.outbound.send_event(payload.clone(), channel.clone());
            state.mark_sent(name, &context, &channel, id);
        }
    }

    /// Handles `session.subscribe`.
    ///
    /// Validates every event name and context before mutating anything,
    /// then registers the subscriptions and replays unseen buffered
    /// occurrences in ascending ID order.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an unrecognized event name
    /// - [`Error::NoSuchContext`] for an unrecognized context
    pub fn subscribe(
        &self,
        events: &[String],
        contexts: &[BrowsingContextId],
        channel: &Channel,
    ) -> Result<()> {
        let (names, scopes) = self.validate(events, contexts)?;

        let mut state = self.state.lock();
        for &name in &names {
            for scope in &scopes {
                state.subscriptions.subscribe(name, scope.clone(), channel);
                for record in state.buffered_events(&self.store, name, scope, channel) {
                    // Replay order is part of the contract.
                    self.outbound.send_event(record.payload.clone(), channel.clone());
                    state.mark_sent(name, scope, channel, record.id);
                }
            }
        }
        Ok(())
    }

    /// Handles `session.unsubscribe`.
    ///
    /// # Errors
    ///
    /// Same validation as [`EventBroker::subscribe`].
    pub fn unsubscribe(
        &self,
        events: &[String],
        contexts: &[BrowsingContextId],
        channel: &Channel,
    ) -> Result<()> {
        let (names, scopes) = self.validate(events, contexts)?;

        let mut state = self.state.lock();
        for &name in &names {
            for scope in &scopes {
                state.subscriptions.unsubscribe(name, scope, channel);
            }
        }
        Ok(())
    }

    fn validate(
        &self,
        events: &[String],
        contexts: &[BrowsingContextId],
    ) -> Result<(Vec<EventName>, Vec<ContextScope>)> {
        let names = events
            .iter()
            .map(|event| {
                EventName::parse(event)
                    .ok_or_else(|| Error::invalid_argument(format!("Unknown event '{event}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        for context in contexts {
            self.store.get(context)?;
        }

        let scopes = if contexts.is_empty() {
            vec![None]
        } else {
            contexts.iter().cloned().map(Some).collect()
        };

        Ok((names, scopes))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::context::BrowsingContext;
    use crate::protocol::OutgoingMessage;

    struct Fixture {
        broker: EventBroker,
        store: Arc<ContextStore>,
        rx: mpsc::UnboundedReceiver<OutgoingMessage>,
    }

    fn fixture() -> Fixture {
        let (sink, rx) = mpsc::unbounded_channel();
        let store = Arc::new(ContextStore::new());
        let broker = EventBroker::new(Arc::clone(&store), OutboundQueue::new(sink));
        Fixture { broker, store, rx }
    }

    fn add_context(store: &ContextStore, id: &str) {
        store.insert(BrowsingContext::new(
            BrowsingContextId::new(id),
            None,
            None,
            "about:blank",
        ));
    }

    fn scope(id: &str) -> ContextScope {
        Some(BrowsingContextId::new(id))
    }

    fn chan(name: &str) -> Channel {
        Some(name.to_string())
    }

    /// Receives `count` event messages, returning their `n` params.
    async fn receive_ids(rx: &mut mpsc::UnboundedReceiver<OutgoingMessage>, count: usize) -> Vec<u64> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            match rx.recv().await.expect("message") {
                OutgoingMessage::Event { params, .. } => {
                    ids.push(params["n"].as_u64().expect("n param"));
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
        ids
    }

    #[tokio::test]
    async fn test_fanout_in_subscription_order() {
        let mut fx = fixture();
        add_context(&fx.store, "C1");

        let events = vec!["browsingContext.load".to_string()];
        fx.broker.subscribe(&events, &[], &chan("first")).expect("subscribe");
        fx.broker.subscribe(&events, &[], &chan("second")).expect("subscribe");

        fx.broker
            .register_event(EventName::Load, scope("C1"), json!({"n": 1}));

        let a = fx.rx.recv().await.expect("message");
        let b = fx.rx.recv().await.expect("message");
        assert_eq!(a.channel(), Some("first"));
        assert_eq!(b.channel(), Some("second"));
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_last_capacity_events() {
        let mut fx = fixture();
        add_context(&fx.store, "C1");

        let capacity = EventName::LogEntryAdded.buffer_capacity().expect("bufferable");
        let total = capacity + 5;
        for n in 1..=total {
            fx.broker
                .register_event(EventName::LogEntryAdded, scope("C1"), json!({"n": n}));
        }

        fx.broker
            .subscribe(&["log.entryAdded".to_string()], &[], &chan("late"))
            .expect("subscribe");

        let ids = receive_ids(&mut fx.rx, capacity).await;
        let expected: Vec<u64> = ((total - capacity + 1)..=total).map(|n| n as u64).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_resubscribe_never_redelivers() {
        let mut fx = fixture();
        add_context(&fx.store, "C1");

        let events = vec!["log.entryAdded".to_string()];
        let contexts = vec![BrowsingContextId::new("C1")];

        fx.broker
            .register_event(EventName::LogEntryAdded, scope("C1"), json!({"n": 1}));
        fx.broker.subscribe(&events, &contexts, &chan("a")).expect("subscribe");
        assert_eq!(receive_ids(&mut fx.rx, 1).await, vec![1]);

        fx.broker.unsubscribe(&events, &contexts, &chan("a")).expect("unsubscribe");
        fx.broker
            .register_event(EventName::LogEntryAdded, scope("C1"), json!({"n": 2}));
        fx.broker.subscribe(&events, &contexts, &chan("a")).expect("subscribe");

        // Only the occurrence produced while unsubscribed is replayed.
        assert_eq!(receive_ids(&mut fx.rx, 1).await, vec![2]);
    }

    #[tokio::test]
    async fn test_global_replay_merges_and_skips_destroyed_contexts() {
        let mut fx = fixture();
        add_context(&fx.store, "C1");
        add_context(&fx.store, "C2");

        fx.broker
            .register_event(EventName::LogEntryAdded, scope("C1"), json!({"n": 1}));
        fx.broker
            .register_event(EventName::LogEntryAdded, scope("C2"), json!({"n": 2}));
        fx.broker
            .register_event(EventName::LogEntryAdded, scope("C1"), json!({"n": 3}));

        fx.store.remove(&BrowsingContextId::new("C2"));

        fx.broker
            .subscribe(&["log.entryAdded".to_string()], &[], &chan("g"))
            .expect("subscribe");

        // C2's occurrence is excluded; the rest arrive in ascending ID order.
        assert_eq!(receive_ids(&mut fx.rx, 2).await, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_subscribe_validation() {
        let fx = fixture();

        let err = fx
            .broker
            .subscribe(&["script.realmCreated".to_string()], &[], &None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let err = fx
            .broker
            .subscribe(
                &["browsingContext.load".to_string()],
                &[BrowsingContextId::new("ghost")],
                &None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchContext { .. }));
    }

    #[tokio::test]
    async fn test_unsubscribed_channel_receives_nothing() {
        let mut fx = fixture();
        add_context(&fx.store, "C1");

        fx.broker
            .subscribe(&["browsingContext.load".to_string()], &[], &chan("only"))
            .expect("subscribe");
        fx.broker
            .register_event(EventName::DomContentLoaded, scope("C1"), json!({"n": 1}));
        fx.broker
            .register_event(EventName::Load, scope("C1"), json!({"n": 2}));

        // Only the load event arrives; domContentLoaded has no subscriber.
        assert_eq!(receive_ids(&mut fx.rx, 1).await, vec![2]);
        assert!(fx.rx.try_recv().is_err());
    }
}
