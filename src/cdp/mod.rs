//! CDP boundary: client traits, typed events, target bindings.
//!
//! The mapper consumes CDP through two narrow interfaces: [`CdpClient`] /
//! [`CdpConnection`] for command round-trips and [`CdpEvent`] for incoming
//! events. The physical transport lives outside the crate.

mod client;
mod events;
mod target;

pub use client::{CDP_GENERIC_ERROR, CdpClient, CdpConnection, CdpError, CdpResult};
pub use events::{
    AttachedToTargetParams, AuthRequiredParams, CdpEvent, CdpRequest, CdpResponse,
    ConsoleApiCalledParams, DetachedFromTargetParams, FrameAttachedParams, FrameDetachedParams,
    FrameInfo, FrameNavigatedParams, LifecycleEventParams, LoadingFailedParams,
    RequestExtraInfoParams, RequestPausedParams, RequestServedFromCacheParams,
    RequestWillBeSentParams, ResponseExtraInfoParams, ResponseReceivedParams, TargetInfo,
    TargetInfoChangedParams,
};
pub use target::{CdpTarget, TargetRegistry};
