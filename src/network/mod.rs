//! Network request tracking and interception.
//!
//! [`NetworkCoordinator`] reconstructs per-request state from a target's
//! CDP event stream; [`NetworkStorage`] owns the intercept registry and
//! blocked-request map; [`NetworkProcessor`] implements the `network.*`
//! commands.

mod coordinator;
mod processor;
mod request;
mod storage;

pub use coordinator::NetworkCoordinator;
pub use processor::NetworkProcessor;
pub use request::NetworkRequest;
pub use storage::{BlockedRequest, InterceptRegistration, NetworkStorage};
