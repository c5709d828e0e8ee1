//! Subscription bookkeeping.
//!
//! A subscription is the triple (event kind, context-or-global, channel).
//! Channels are ordered by the time of their first subscription; that order
//! is the delivery priority used when one event fans out to several channels
//! at once. Subscriptions never expire implicitly.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::{FxHashMap, FxHashSet};

use crate::identifiers::BrowsingContextId;
use crate::protocol::EventName;

// ============================================================================
// Types
// ============================================================================

/// A delivery channel; `None` is the default (unnamed) channel.
pub type Channel = Option<String>;

/// Scope of a subscription; `None` subscribes across all contexts.
pub type ContextScope = Option<BrowsingContextId>;

// ============================================================================
// SubscriptionManager
// ============================================================================

/// Tracks which channels are subscribed to which (event, context) pairs.
#[derive(Default)]
pub struct SubscriptionManager {
    /// Next priority to hand out; strictly increasing.
    next_priority: u64,
    /// Channel to priority of its first subscription.
    channel_priority: FxHashMap<Channel, u64>,
    /// Event kind to context scope to subscribed channels.
    subscriptions: FxHashMap<EventName, FxHashMap<ContextScope, FxHashSet<Channel>>>,
}

impl SubscriptionManager {
    /// Creates an empty manager.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription.
    ///
    /// The channel's priority is fixed at its first subscription and kept
    /// on resubscription.
    pub fn subscribe(&mut self, event: EventName, context: ContextScope, channel: &Channel) {
        if !self.channel_priority.contains_key(channel) {
            self.channel_priority
                .insert(channel.clone(), self.next_priority);
            self.next_priority += 1;
        }

        self.subscriptions
            .entry(event)
            .or_default()
            .entry(context)
            .or_default()
            .insert(channel.clone());
    }

    /// Removes a subscription, if present.
    pub fn unsubscribe(&mut self, event: EventName, context: &ContextScope, channel: &Channel) {
        let Some(by_context) = self.subscriptions.get_mut(&event) else {
            return;
        };
        if let Some(channels) = by_context.get_mut(context) {
            channels.remove(channel);
            if channels.is_empty() {
                by_context.remove(context);
            }
        }
        if by_context.is_empty() {
            self.subscriptions.remove(&event);
        }
    }

    /// Returns `true` if the channel is subscribed to the exact pair.
    #[must_use]
    pub fn is_subscribed(
        &self,
        event: EventName,
        context: &ContextScope,
        channel: &Channel,
    ) -> bool {
        self.subscriptions
            .get(&event)
            .and_then(|by_context| by_context.get(context))
            .is_some_and(|channels| channels.contains(channel))
    }

    /// Returns the channels an event produced in `context` fans out to,
    /// in ascending subscription-time order.
    ///
    /// A channel qualifies through an exact-context subscription or a
    /// global one; a channel subscribed both ways appears once.
    #[must_use]
    pub fn channels_for(&self, event: EventName, context: &ContextScope) -> Vec<Channel> {
        let Some(by_context) = self.subscriptions.get(&event) else {
            return Vec::new();
        };

        let mut channels: Vec<&Channel> = Vec::new();
        if let Some(global) = by_context.get(&None) {
            channels.extend(global.iter());
        }
        if context.is_some()
            && let Some(exact) = by_context.get(context)
        {
            channels.extend(exact.iter());
        }

        channels.sort_by_key(|channel| self.channel_priority.get(*channel).copied());
        channels.dedup();
        channels.into_iter().cloned().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: &str) -> ContextScope {
        Some(BrowsingContextId::new(id))
    }

    fn chan(name: &str) -> Channel {
        Some(name.to_string())
    }

    #[test]
    fn test_channels_sorted_by_first_subscription() {
        let mut manager = SubscriptionManager::new();
        manager.subscribe(EventName::Load, None, &chan("b"));
        manager.subscribe(EventName::Load, ctx("C1"), &chan("a"));

        // "b" subscribed first, so it leads even though "a" sorts lower.
        let channels = manager.channels_for(EventName::Load, &ctx("C1"));
        assert_eq!(channels, vec![chan("b"), chan("a")]);
    }

    #[test]
    fn test_priority_survives_resubscription() {
        let mut manager = SubscriptionManager::new();
        manager.subscribe(EventName::Load, None, &chan("a"));
        manager.subscribe(EventName::Load, None, &chan("b"));
        manager.unsubscribe(EventName::Load, &None, &chan("a"));
        manager.subscribe(EventName::Load, None, &chan("a"));

        let channels = manager.channels_for(EventName::Load, &ctx("C1"));
        assert_eq!(channels, vec![chan("a"), chan("b")]);
    }

    #[test]
    fn test_global_and_exact_dedup() {
        let mut manager = SubscriptionManager::new();
        manager.subscribe(EventName::Load, None, &chan("a"));
        manager.subscribe(EventName::Load, ctx("C1"), &chan("a"));

        let channels = manager.channels_for(EventName::Load, &ctx("C1"));
        assert_eq!(channels, vec![chan("a")]);
    }

    #[test]
    fn test_exact_subscription_does_not_leak_to_other_contexts() {
        let mut manager = SubscriptionManager::new();
        manager.subscribe(EventName::Load, ctx("C1"), &chan("a"));

        assert!(manager.channels_for(EventName::Load, &ctx("C2")).is_empty());
        // A context-less event only reaches global subscribers.
        assert!(manager.channels_for(EventName::Load, &None).is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let mut manager = SubscriptionManager::new();
        manager.subscribe(EventName::Load, ctx("C1"), &chan("a"));
        assert!(manager.is_subscribed(EventName::Load, &ctx("C1"), &chan("a")));

        manager.unsubscribe(EventName::Load, &ctx("C1"), &chan("a"));
        assert!(!manager.is_subscribed(EventName::Load, &ctx("C1"), &chan("a")));
        assert!(manager.channels_for(EventName::Load, &ctx("C1")).is_empty());
    }
}
