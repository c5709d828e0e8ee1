//! Per-target session binding.
//!
//! A [`CdpTarget`] pairs a target ID with the CDP session currently
//! debugging it. Exactly one browsing context owns a target at a time; the
//! binding moves to a fresh `CdpTarget` when an out-of-process frame swap
//! re-attaches the same target ID under a new session.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::cdp::CdpClient;
use crate::identifiers::{BrowsingContextId, CdpSessionId};

// ============================================================================
// CdpTarget
// ============================================================================

/// One attached CDP target: the session and its command client.
pub struct CdpTarget {
    /// Target ID; equals the bound top-level browsing context's ID.
    target_id: BrowsingContextId,
    /// Session the target is attached under.
    session_id: CdpSessionId,
    /// Command client for this session.
    client: Arc<dyn CdpClient>,
}

impl CdpTarget {
    /// Creates a new target binding.
    #[inline]
    #[must_use]
    pub fn new(
        target_id: BrowsingContextId,
        session_id: CdpSessionId,
        client: Arc<dyn CdpClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            target_id,
            session_id,
            client,
        })
    }

    /// Returns the target ID.
    #[inline]
    #[must_use]
    pub fn target_id(&self) -> &BrowsingContextId {
        &self.target_id
    }

    /// Returns the session ID.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &CdpSessionId {
        &self.session_id
    }

    /// Returns the command client.
    #[inline]
    #[must_use]
    pub fn client(&self) -> Arc<dyn CdpClient> {
        Arc::clone(&self.client)
    }
}

impl std::fmt::Debug for CdpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpTarget")
            .field("target_id", &self.target_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TargetRegistry
// ============================================================================

/// Live target bindings keyed by session ID.
#[derive(Default)]
pub struct TargetRegistry {
    targets: Mutex<FxHashMap<CdpSessionId, Arc<CdpTarget>>>,
}

impl TargetRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a target under its session ID.
    pub fn insert(&self, target: Arc<CdpTarget>) {
        self.targets
            .lock()
            .insert(target.session_id().clone(), target);
    }

    /// Removes and returns the target for a session.
    pub fn remove(&self, session: &CdpSessionId) -> Option<Arc<CdpTarget>> {
        self.targets.lock().remove(session)
    }

    /// Returns the target for a session, if registered.
    #[must_use]
    pub fn get(&self, session: &CdpSessionId) -> Option<Arc<CdpTarget>> {
        self.targets.lock().get(session).cloned()
    }

    /// Returns all registered targets.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<CdpTarget>> {
        self.targets.lock().values().cloned().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
