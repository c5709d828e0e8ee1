//! A tracked browsing context.
//!
//! One [`BrowsingContext`] models a navigable unit (tab, window, or frame)
//! and its one-to-one binding to a CDP target. Contexts form a forest: a
//! context with no parent is top-level, everything else hangs off the
//! parent's child list.
//!
//! # Lifecycle
//!
//! Navigation lifecycle is a watch channel stepping through
//! pending → interactive → complete, reset on every navigation start.
//! Waiters hold an `Arc` of the context, so a context torn down mid-wait
//! leaves the wait pending forever — teardown never resolves lifecycle
//! watches (see DESIGN.md, abandoned waits).

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::cdp::CdpTarget;
use crate::identifiers::{BrowsingContextId, NavigationId};
use crate::protocol::ReadinessState;

// ============================================================================
// Lifecycle
// ============================================================================

/// Navigation lifecycle stage of a context's current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    /// Navigation started, nothing parsed yet.
    Pending,
    /// DOMContentLoaded fired.
    Interactive,
    /// Load fired.
    Complete,
}

// ============================================================================
// BrowsingContext
// ============================================================================

/// One browsing context and its target binding.
pub struct BrowsingContext {
    /// Context ID (CDP target/frame ID).
    id: BrowsingContextId,
    /// Parent context; `None` for top-level contexts.
    parent: Option<BrowsingContextId>,
    /// Child contexts in attachment order.
    children: Mutex<Vec<BrowsingContextId>>,
    /// Current navigable URL.
    url: Mutex<String>,
    /// Bound target; `None` only transiently during an OOPiF swap.
    target: Mutex<Option<Arc<CdpTarget>>>,
    /// ID of the current navigation.
    navigation: Mutex<NavigationId>,
    /// Lifecycle stage of the current navigation.
    lifecycle: watch::Sender<Lifecycle>,
    /// Set once, on disposal.
    closed: watch::Sender<bool>,
}

impl BrowsingContext {
    /// Creates a context bound to the given target.
    #[must_use]
    pub fn new(
        id: BrowsingContextId,
        parent: Option<BrowsingContextId>,
        target: Option<Arc<CdpTarget>>,
        url: impl Into<String>,
    ) -> Arc<Self> {
        let (lifecycle, _) = watch::channel(Lifecycle::Pending);
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id,
            parent,
            children: Mutex::new(Vec::new()),
            url: Mutex::new(url.into()),
            target: Mutex::new(target),
            navigation: Mutex::new(NavigationId::generate()),
            lifecycle,
            closed,
        })
    }

    /// Returns the context ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &BrowsingContextId {
        &self.id
    }

    /// Returns the parent context ID.
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<&BrowsingContextId> {
        self.parent.as_ref()
    }

    /// Returns `true` for contexts with no parent.
    #[inline]
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns the current URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.url.lock().clone()
    }

    /// Updates the current URL without touching the lifecycle.
    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.lock() = url.into();
    }

    /// Returns the bound target.
    #[must_use]
    pub fn target(&self) -> Option<Arc<CdpTarget>> {
        self.target.lock().clone()
    }

    /// Rebinds the context to a new target.
    ///
    /// Used when an out-of-process frame swap re-attaches the same target
    /// ID under a fresh session.
    pub fn set_target(&self, target: Arc<CdpTarget>) {
        *self.target.lock() = Some(target);
    }

    /// Returns the current navigation ID.
    #[must_use]
    pub fn navigation_id(&self) -> NavigationId {
        self.navigation.lock().clone()
    }

    // ========================================================================
    // Children
    // ========================================================================

    /// Appends a child context.
    pub fn add_child(&self, child: BrowsingContextId) {
        let mut children = self.children.lock();
        if !children.contains(&child) {
            children.push(child);
        }
    }

    /// Removes a child context.
    pub fn remove_child(&self, child: &BrowsingContextId) {
        self.children.lock().retain(|c| c != child);
    }

    /// Returns the child contexts in attachment order.
    #[must_use]
    pub fn children(&self) -> Vec<BrowsingContextId> {
        self.children.lock().clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts a new navigation: fresh navigation ID, lifecycle reset.
    ///
    /// Returns the new navigation ID.
    pub fn on_navigation_started(&self, url: Option<&str>) -> NavigationId {
        if let Some(url) = url {
            self.set_url(url);
        }
        let navigation = NavigationId::generate();
        *self.navigation.lock() = navigation.clone();
        let _ = self.lifecycle.send(Lifecycle::Pending);
        navigation
    }

    /// Records DOMContentLoaded for the current navigation.
    pub fn on_dom_content_loaded(&self) {
        self.lifecycle.send_if_modified(|stage| {
            if *stage < Lifecycle::Interactive {
                *stage = Lifecycle::Interactive;
                true
            } else {
                false
            }
        });
    }

    /// Records load for the current navigation.
    pub fn on_load(&self) {
        let _ = self.lifecycle.send(Lifecycle::Complete);
    }

    /// Returns the current lifecycle stage.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Waits until the current navigation reaches the requested readiness.
    ///
    /// Suspension point: the caller must re-validate shared state after
    /// this returns.
    pub async fn await_lifecycle(&self, readiness: ReadinessState) {
        let wanted = match readiness {
            ReadinessState::None => return,
            ReadinessState::Interactive => Lifecycle::Interactive,
            ReadinessState::Complete => Lifecycle::Complete,
        };
        let mut rx = self.lifecycle.subscribe();
        // The sender lives in `self`; the wait can only end by reaching
        // the stage.
        let _ = rx.wait_for(|stage| *stage >= wanted).await;
    }

    /// Waits until the initial document finished loading.
    pub async fn lifecycle_loaded(&self) {
        self.await_lifecycle(ReadinessState::Complete).await;
    }

    // ========================================================================
    // Closure
    // ========================================================================

    /// Marks the context disposed. Idempotent.
    pub fn mark_closed(&self) {
        let _ = self.closed.send(true);
    }

    /// Returns `true` once the context was disposed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Waits for disposal (the close signal derived from target detach).
    pub async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for BrowsingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowsingContext")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("url", &*self.url.lock())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn context(id: &str) -> Arc<BrowsingContext> {
        BrowsingContext::new(BrowsingContextId::new(id), None, None, "about:blank")
    }

    #[test]
    fn test_top_level() {
        let top = context("C1");
        assert!(top.is_top_level());

        let nested = BrowsingContext::new(
            BrowsingContextId::new("C2"),
            Some(BrowsingContextId::new("C1")),
            None,
            "",
        );
        assert!(!nested.is_top_level());
    }

    #[test]
    fn test_children_order_and_dedup() {
        let ctx = context("C1");
        ctx.add_child("A".into());
        ctx.add_child("B".into());
        ctx.add_child("A".into());
        assert_eq!(
            ctx.children(),
            vec![BrowsingContextId::new("A"), BrowsingContextId::new("B")]
        );

        ctx.remove_child(&"A".into());
        assert_eq!(ctx.children(), vec![BrowsingContextId::new("B")]);
    }

    #[test]
    fn test_navigation_resets_lifecycle() {
        let ctx = context("C1");
        ctx.on_dom_content_loaded();
        ctx.on_load();
        assert_eq!(ctx.lifecycle(), Lifecycle::Complete);

        let first = ctx.navigation_id();
        let second = ctx.on_navigation_started(Some("https://example.com"));
        assert_ne!(first, second);
        assert_eq!(ctx.lifecycle(), Lifecycle::Pending);
        assert_eq!(ctx.url(), "https://example.com");
    }

    #[test]
    fn test_dom_content_loaded_never_regresses() {
        let ctx = context("C1");
        ctx.on_load();
        ctx.on_dom_content_loaded();
        assert_eq!(ctx.lifecycle(), Lifecycle::Complete);
    }

    #[tokio::test]
    async fn test_await_lifecycle() {
        let ctx = context("C1");
        let waiter = Arc::clone(&ctx);
        let wait = tokio::spawn(async move {
            waiter.await_lifecycle(ReadinessState::Complete).await;
        });

        ctx.on_dom_content_loaded();
        assert!(!wait.is_finished());
        ctx.on_load();
        wait.await.expect("join");
    }

    #[tokio::test]
    async fn test_wait_closed_idempotent() {
        let ctx = context("C1");
        ctx.mark_closed();
        ctx.mark_closed();
        assert!(ctx.is_closed());
        // Resolves immediately once closed.
        ctx.wait_closed().await;
    }
}
