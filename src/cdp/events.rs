//! Typed CDP events consumed by the mapper.
//!
//! The transport delivers CDP events as `(method, params)` pairs;
//! [`CdpEvent::parse`] turns the pairs the mapper cares about into typed
//! variants and drops everything else. Parsing is lenient: CDP adds fields
//! freely between browser versions, so unknown fields are ignored and most
//! fields are optional.
//!
//! # Consumed Events
//!
//! | Domain | Events |
//! |--------|--------|
//! | `Target` | `attachedToTarget`, `detachedFromTarget`, `targetInfoChanged` |
//! | `Page` | `frameAttached`, `frameDetached`, `frameNavigated`, `lifecycleEvent` |
//! | `Runtime` | `consoleAPICalled` |
//! | `Network` | `requestWillBeSent`, `requestWillBeSentExtraInfo`, `responseReceived`, `responseReceivedExtraInfo`, `requestServedFromCache`, `loadingFailed` |
//! | `Fetch` | `requestPaused`, `authRequired` |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::identifiers::{BrowsingContextId, CdpSessionId, FetchId, NetworkId};

// ============================================================================
// Shared Structures
// ============================================================================

/// CDP target description.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target ID (doubles as the top-level browsing context ID).
    pub target_id: BrowsingContextId,
    /// Target kind: `page`, `iframe`, `service_worker`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Current URL of the target.
    #[serde(default)]
    pub url: String,
    /// Frame that opened this target, when the target is a frame
    /// implemented out-of-process.
    #[serde(default)]
    pub opener_frame_id: Option<BrowsingContextId>,
}

/// Request data carried by `Network.requestWillBeSent` and
/// `Fetch.requestPaused`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpRequest {
    /// Request URL.
    pub url: String,
    /// HTTP method.
    #[serde(default)]
    pub method: String,
    /// Request headers as a JSON object.
    #[serde(default)]
    pub headers: Value,
}

/// Response data carried by `Network.responseReceived` and redirect
/// responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpResponse {
    /// Response URL.
    #[serde(default)]
    pub url: String,
    /// HTTP status code.
    #[serde(default)]
    pub status: i64,
    /// HTTP status text.
    #[serde(default)]
    pub status_text: String,
    /// Response headers as a JSON object.
    #[serde(default)]
    pub headers: Value,
    /// Response MIME type.
    #[serde(default)]
    pub mime_type: String,
}

// ============================================================================
// Target / Page / Runtime Parameters
// ============================================================================

/// `Target.attachedToTarget` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedToTargetParams {
    /// Session the target was attached under.
    pub session_id: CdpSessionId,
    /// Description of the attached target.
    pub target_info: TargetInfo,
}

/// `Target.detachedFromTarget` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTargetParams {
    /// Detached session.
    pub session_id: CdpSessionId,
    /// Target the session belonged to.
    #[serde(default)]
    pub target_id: Option<BrowsingContextId>,
}

/// `Target.targetInfoChanged` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfoChangedParams {
    /// Updated target description.
    pub target_info: TargetInfo,
}

/// `Page.frameAttached` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAttachedParams {
    /// Attached frame.
    pub frame_id: BrowsingContextId,
    /// Parent frame.
    pub parent_frame_id: BrowsingContextId,
}

/// `Page.frameDetached` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetachedParams {
    /// Detached frame.
    pub frame_id: BrowsingContextId,
    /// `"remove"` for destruction, `"swap"` for a cross-process move.
    #[serde(default)]
    pub reason: String,
}

/// Frame description inside `Page.frameNavigated`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    /// Frame ID.
    pub id: BrowsingContextId,
    /// URL the frame navigated to.
    #[serde(default)]
    pub url: String,
}

/// `Page.frameNavigated` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameNavigatedParams {
    /// Navigated frame.
    pub frame: FrameInfo,
}

/// `Page.lifecycleEvent` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEventParams {
    /// Frame the lifecycle event belongs to.
    pub frame_id: BrowsingContextId,
    /// Lifecycle stage: `init`, `DOMContentLoaded`, `load`, ...
    pub name: String,
}

/// `Runtime.consoleAPICalled` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalledParams {
    /// Console call kind: `log`, `error`, `warning`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw call arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Call timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: f64,
}

// ============================================================================
// Network Parameters
// ============================================================================

/// `Network.requestWillBeSent` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentParams {
    /// Request ID; stable across the redirect chain.
    pub request_id: NetworkId,
    /// Request data.
    pub request: CdpRequest,
    /// Response that triggered this request, when it is a redirect hop.
    #[serde(default)]
    pub redirect_response: Option<CdpResponse>,
    /// Monotonic timestamp in seconds.
    #[serde(default)]
    pub timestamp: f64,
    /// Frame that issued the request.
    #[serde(default)]
    pub frame_id: Option<BrowsingContextId>,
}

/// `Network.requestWillBeSentExtraInfo` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestExtraInfoParams {
    /// Request ID.
    pub request_id: NetworkId,
    /// Raw request headers.
    #[serde(default)]
    pub headers: Value,
}

/// `Network.responseReceived` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedParams {
    /// Request ID.
    pub request_id: NetworkId,
    /// Response data.
    pub response: CdpResponse,
}

/// `Network.responseReceivedExtraInfo` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseExtraInfoParams {
    /// Request ID.
    pub request_id: NetworkId,
    /// Raw response headers.
    #[serde(default)]
    pub headers: Value,
    /// Status code as seen on the wire.
    #[serde(default)]
    pub status_code: Option<i64>,
}

/// `Network.requestServedFromCache` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestServedFromCacheParams {
    /// Request ID.
    pub request_id: NetworkId,
}

/// `Network.loadingFailed` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailedParams {
    /// Request ID.
    pub request_id: NetworkId,
    /// Failure description.
    #[serde(default)]
    pub error_text: String,
    /// `true` when the request was canceled.
    #[serde(default)]
    pub canceled: bool,
}

// ============================================================================
// Fetch Parameters
// ============================================================================

/// `Fetch.requestPaused` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPausedParams {
    /// Interception job ID (`Fetch` ID space, not `Network`).
    pub request_id: FetchId,
    /// Request data.
    pub request: CdpRequest,
    /// Error reason, present only at the response stage.
    #[serde(default)]
    pub response_error_reason: Option<String>,
    /// Status code, present only at the response stage.
    #[serde(default)]
    pub response_status_code: Option<i64>,
    /// Matching `Network` request ID, when the network domain is enabled.
    #[serde(default)]
    pub network_id: Option<NetworkId>,
}

impl RequestPausedParams {
    /// Returns `true` if the request is paused at the response stage.
    #[inline]
    #[must_use]
    pub fn is_response_stage(&self) -> bool {
        self.response_status_code.is_some() || self.response_error_reason.is_some()
    }
}

/// `Fetch.authRequired` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequiredParams {
    /// Interception job ID.
    pub request_id: FetchId,
    /// Request data.
    pub request: CdpRequest,
    /// Challenge details.
    #[serde(default)]
    pub auth_challenge: Option<Value>,
}

// ============================================================================
// CdpEvent
// ============================================================================

/// A CDP event the mapper reacts to.
#[derive(Debug, Clone)]
pub enum CdpEvent {
    /// `Target.attachedToTarget`.
    AttachedToTarget(AttachedToTargetParams),
    /// `Target.detachedFromTarget`.
    DetachedFromTarget(DetachedFromTargetParams),
    /// `Target.targetInfoChanged`.
    TargetInfoChanged(TargetInfoChangedParams),
    /// `Page.frameAttached`.
    FrameAttached(FrameAttachedParams),
    /// `Page.frameDetached`.
    FrameDetached(FrameDetachedParams),
    /// `Page.frameNavigated`.
    FrameNavigated(FrameNavigatedParams),
    /// `Page.lifecycleEvent`.
    LifecycleEvent(LifecycleEventParams),
    /// `Runtime.consoleAPICalled`.
    ConsoleApiCalled(ConsoleApiCalledParams),
    /// `Network.requestWillBeSent`.
    RequestWillBeSent(RequestWillBeSentParams),
    /// `Network.requestWillBeSentExtraInfo`.
    RequestWillBeSentExtraInfo(RequestExtraInfoParams),
    /// `Network.responseReceived`.
    ResponseReceived(ResponseReceivedParams),
    /// `Network.responseReceivedExtraInfo`.
    ResponseReceivedExtraInfo(ResponseExtraInfoParams),
    /// `Network.requestServedFromCache`.
    RequestServedFromCache(RequestServedFromCacheParams),
    /// `Network.loadingFailed`.
    LoadingFailed(LoadingFailedParams),
    /// `Fetch.requestPaused`.
    RequestPaused(RequestPausedParams),
    /// `Fetch.authRequired`.
    AuthRequired(AuthRequiredParams),
}

impl CdpEvent {
    /// Parses a CDP event from its method name and parameters.
    ///
    /// Returns `None` for events the mapper does not consume, and for
    /// consumed events whose parameters fail to deserialize (logged).
    #[must_use]
    pub fn parse(method: &str, params: Value) -> Option<Self> {
        fn typed<T: serde::de::DeserializeOwned>(
            method: &str,
            params: Value,
            wrap: fn(T) -> CdpEvent,
        ) -> Option<CdpEvent> {
            match serde_json::from_value(params) {
                Ok(parsed) => Some(wrap(parsed)),
                Err(error) => {
                    warn!(method, %error, "Malformed CDP event dropped");
                    None
                }
            }
        }

        match method {
            "Target.attachedToTarget" => typed(method, params, Self::AttachedToTarget),
            "Target.detachedFromTarget" => typed(method, params, Self::DetachedFromTarget),
            "Target.targetInfoChanged" => typed(method, params, Self::TargetInfoChanged),
            "Page.frameAttached" => typed(method, params, Self::FrameAttached),
            "Page.frameDetached" => typed(method, params, Self::FrameDetached),
            "Page.frameNavigated" => typed(method, params, Self::FrameNavigated),
            "Page.lifecycleEvent" => typed(method, params, Self::LifecycleEvent),
            "Runtime.consoleAPICalled" => typed(method, params, Self::ConsoleApiCalled),
            "Network.requestWillBeSent" => typed(method, params, Self::RequestWillBeSent),
            "Network.requestWillBeSentExtraInfo" => {
                typed(method, params, Self::RequestWillBeSentExtraInfo)
            }
            "Network.responseReceived" => typed(method, params, Self::ResponseReceived),
            "Network.responseReceivedExtraInfo" => {
                typed(method, params, Self::ResponseReceivedExtraInfo)
            }
            "Network.requestServedFromCache" => {
                typed(method, params, Self::RequestServedFromCache)
            }
            "Network.loadingFailed" => typed(method, params, Self::LoadingFailed),
            "Fetch.requestPaused" => typed(method, params, Self::RequestPaused),
            "Fetch.authRequired" => typed(method, params, Self::AuthRequired),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_attached_to_target() {
        let params = json!({
            "sessionId": "S1",
            "targetInfo": {
                "targetId": "T1",
                "type": "page",
                "url": "about:blank"
            },
            "waitingForDebugger": false
        });

        let event = CdpEvent::parse("Target.attachedToTarget", params).expect("parse");
        match event {
            CdpEvent::AttachedToTarget(params) => {
                assert_eq!(params.session_id.as_str(), "S1");
                assert_eq!(params.target_info.target_id.as_str(), "T1");
                assert_eq!(params.target_info.kind, "page");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_request_will_be_sent_redirect() {
        let params = json!({
            "requestId": "R1",
            "request": {"url": "https://a.test/next", "method": "GET", "headers": {}},
            "redirectResponse": {"url": "https://a.test/", "status": 302, "headers": {}},
            "timestamp": 1.5
        });

        let event = CdpEvent::parse("Network.requestWillBeSent", params).expect("parse");
        match event {
            CdpEvent::RequestWillBeSent(params) => {
                assert_eq!(params.request.url, "https://a.test/next");
                assert_eq!(params.redirect_response.expect("redirect").status, 302);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_request_paused_stage() {
        let request_stage: RequestPausedParams = serde_json::from_value(json!({
            "requestId": "F1",
            "request": {"url": "https://a.test/", "method": "GET"}
        }))
        .expect("parse");
        assert!(!request_stage.is_response_stage());

        let response_stage: RequestPausedParams = serde_json::from_value(json!({
            "requestId": "F2",
            "request": {"url": "https://a.test/", "method": "GET"},
            "responseStatusCode": 200
        }))
        .expect("parse");
        assert!(response_stage.is_response_stage());
    }

    #[test]
    fn test_unknown_event_ignored() {
        assert!(CdpEvent::parse("Animation.animationStarted", json!({})).is_none());
    }

    #[test]
    fn test_malformed_event_dropped() {
        // frameId missing entirely.
        assert!(CdpEvent::parse("Page.lifecycleEvent", json!({"name": "load"})).is_none());
    }
}
