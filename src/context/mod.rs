//! Browsing context tree.
//!
//! [`BrowsingContext`] models one navigable unit, [`ContextStore`] the
//! forest, and [`BrowsingContextProcessor`] the `browsingContext.*` commands
//! plus the target/frame discovery reactions that keep the tree consistent.

mod context;
mod processor;
mod store;

pub use context::{BrowsingContext, Lifecycle};
pub use processor::BrowsingContextProcessor;
pub use store::ContextStore;
