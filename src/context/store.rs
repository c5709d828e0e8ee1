//! Browsing context registry.
//!
//! Owns the id → context map and the tree serialization used by
//! `browsingContext.getTree`. Creation during `browsingContext.create` races
//! the `Target.attachedToTarget` event, so the store also supports waiting
//! for a context to appear; waiters are registered before the map is
//! checked, which rules out lost wakeups.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::context::BrowsingContext;
use crate::error::{Error, Result};
use crate::identifiers::BrowsingContextId;

// ============================================================================
// ContextStore
// ============================================================================

/// Registry of live browsing contexts.
#[derive(Default)]
pub struct ContextStore {
    contexts: Mutex<FxHashMap<BrowsingContextId, Arc<BrowsingContext>>>,
    waiters: Mutex<FxHashMap<BrowsingContextId, Arc<Notify>>>,
}

impl ContextStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a context and wakes anyone waiting for its ID.
    pub fn insert(&self, context: Arc<BrowsingContext>) {
        let id = context.id().clone();
        self.contexts.lock().insert(id.clone(), context);
        if let Some(notify) = self.waiters.lock().remove(&id) {
            notify.notify_waiters();
        }
    }

    /// Removes and returns a context.
    pub fn remove(&self, id: &BrowsingContextId) -> Option<Arc<BrowsingContext>> {
        self.contexts.lock().remove(id)
    }

    /// Returns a context if it exists.
    #[must_use]
    pub fn find(&self, id: &BrowsingContextId) -> Option<Arc<BrowsingContext>> {
        self.contexts.lock().get(id).cloned()
    }

    /// Returns a context, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchContext`] for unknown IDs.
    pub fn get(&self, id: &BrowsingContextId) -> Result<Arc<BrowsingContext>> {
        self.find(id).ok_or_else(|| Error::no_such_context(id.clone()))
    }

    /// Returns `true` if the context exists.
    #[must_use]
    pub fn has_context(&self, id: &BrowsingContextId) -> bool {
        self.contexts.lock().contains_key(id)
    }

    /// Returns all top-level contexts, ordered by ID for stable output.
    #[must_use]
    pub fn top_level_contexts(&self) -> Vec<Arc<BrowsingContext>> {
        let mut contexts: Vec<_> = self
            .contexts
            .lock()
            .values()
            .filter(|context| context.is_top_level())
            .cloned()
            .collect();
        contexts.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
        contexts
    }

    /// Waits for a context with the given ID to be registered.
    ///
    /// Returns immediately when the context already exists. The waiter is
    /// registered before the check, so an insert between check and sleep
    /// cannot be missed.
    pub async fn wait_for_context(&self, id: &BrowsingContextId) -> Arc<BrowsingContext> {
        loop {
            let notify = Arc::clone(
                self.waiters
                    .lock()
                    .entry(id.clone())
                    .or_insert_with(|| Arc::new(Notify::new())),
            );
            let notified = notify.notified();

            if let Some(context) = self.find(id) {
                return context;
            }

            notified.await;
        }
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Serializes a context subtree to the wire format.
    ///
    /// `max_depth` counts child levels: `Some(0)` yields `children: null`,
    /// `None` is unbounded.
    #[must_use]
    pub fn serialize(&self, context: &BrowsingContext, max_depth: Option<u32>) -> Value {
        let children = match max_depth {
            Some(0) => Value::Null,
            _ => {
                let next_depth = max_depth.map(|depth| depth - 1);
                Value::Array(
                    context
                        .children()
                        .iter()
                        .filter_map(|child_id| self.find(child_id))
                        .map(|child| self.serialize(&child, next_depth))
                        .collect(),
                )
            }
        };

        let mut serialized = json!({
            "context": context.id(),
            "url": context.url(),
            "children": children,
        });
        if let Some(parent) = context.parent() {
            serialized["parent"] = json!(parent);
        }
        serialized
    }
}

// ============================================================================
// Tests
// ============================================================================
