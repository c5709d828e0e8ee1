//! Type-safe identifiers for mapper entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//! All IDs are opaque strings on the wire; the CDP side assigns
//! target/frame/request IDs, the mapper allocates the rest as UUIDs.
//!
//! # ID Types
//!
//! | Type | Assigned by | Used for |
//! |------|-------------|----------|
//! | [`BrowsingContextId`] | CDP (target/frame id) | browsing contexts |
//! | [`CdpSessionId`] | CDP | attached debugging sessions |
//! | [`NetworkId`] | CDP (`Network.RequestId`) | network request records |
//! | [`FetchId`] | CDP (`Fetch.RequestId`) | paused interception jobs |
//! | [`InterceptId`] | mapper (UUID) | intercept registrations |
//! | [`NavigationId`] | mapper (UUID) | navigation lifecycles |
//! | [`PreloadScriptId`] | mapper (UUID) | preload script registrations |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Macro
// ============================================================================

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an ID from a string value.
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the ID as a string slice.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

macro_rules! generated_id {
    ($name:ident) => {
        impl $name {
            /// Generates a fresh random ID.
            #[inline]
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }
    };
}

// ============================================================================
// ID Types
// ============================================================================

string_id! {
    /// Identifier of a browsing context (tab, window, or frame).
    ///
    /// Shares the CDP target/frame ID space: a top-level context's ID is its
    /// target ID, a nested context's ID is its frame ID.
    BrowsingContextId
}

string_id! {
    /// Identifier of an attached CDP debugging session.
    CdpSessionId
}

string_id! {
    /// Identifier of a network request, as assigned by `Network.*` events.
    NetworkId
}

string_id! {
    /// Identifier of a paused interception job, as assigned by `Fetch.*`
    /// events. Distinct from [`NetworkId`]: one network request may pass
    /// through several fetch jobs.
    FetchId
}

string_id! {
    /// Identifier of an intercept registration.
    InterceptId
}
generated_id!(InterceptId);

string_id! {
    /// Identifier of one navigation of a browsing context.
    NavigationId
}
generated_id!(NavigationId);

string_id! {
    /// Identifier of a preload script registration.
    PreloadScriptId
}
generated_id!(PreloadScriptId);

// ============================================================================
// Tests
// ============================================================================
