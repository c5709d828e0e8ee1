//! Per-request record state machine.
//!
//! Information about one network request arrives spread over independent,
//! unordered CDP sub-events. A [`NetworkRequest`] merges them under the
//! request ID and renders BiDi network events from the merged state.
//!
//! # Redirects
//!
//! CDP reuses one request ID across a redirect chain: a second
//! `requestWillBeSent` for an ID whose record already holds primary request
//! info means the previous hop redirected. The coordinator then finalizes
//! this record ([`NetworkRequest::handle_redirect`]) and replaces it with a
//! fresh one carrying `redirect_count + 1`.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};

use crate::cdp::{
    CdpResponse, LoadingFailedParams, RequestExtraInfoParams, RequestWillBeSentParams,
    ResponseExtraInfoParams,
};
use crate::identifiers::{BrowsingContextId, NetworkId};
use crate::protocol::{EventEnvelope, EventName};

// ============================================================================
// NetworkRequest
// ============================================================================

/// Merged state of one network request.
#[derive(Debug)]
pub struct NetworkRequest {
    id: NetworkId,
    redirect_count: u64,
    request: Option<RequestWillBeSentParams>,
    request_extra: Option<RequestExtraInfoParams>,
    response: Option<CdpResponse>,
    response_extra: Option<ResponseExtraInfoParams>,
    served_from_cache: bool,
    failure: Option<LoadingFailedParams>,
    disposed: bool,
}

impl NetworkRequest {
    /// Creates an empty record for a request ID.
    #[must_use]
    pub fn new(id: NetworkId, redirect_count: u64) -> Self {
        Self {
            id,
            redirect_count,
            request: None,
            request_extra: None,
            response: None,
            response_extra: None,
            served_from_cache: false,
            failure: None,
            disposed: false,
        }
    }

    /// Returns the request ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &NetworkId {
        &self.id
    }

    /// Returns how many redirect hops preceded this record.
    #[inline]
    #[must_use]
    pub fn redirect_count(&self) -> u64 {
        self.redirect_count
    }

    /// Returns the request URL, once known.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.request.as_ref().map(|request| request.request.url.as_str())
    }

    /// Returns the originating context, once known.
    #[must_use]
    pub fn context(&self) -> Option<&BrowsingContextId> {
        self.request.as_ref().and_then(|request| request.frame_id.as_ref())
    }

    /// Returns `true` once the record holds primary request info.
    ///
    /// A further `requestWillBeSent` for the same ID then means the
    /// previous hop is redirecting.
    #[inline]
    #[must_use]
    pub fn is_redirecting(&self) -> bool {
        self.request.is_some()
    }

    /// Returns the failure text, once the request failed to load.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_ref().map(|failure| failure.error_text.as_str())
    }

    /// Returns `true` once the record was disposed.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Releases the record. Disposed records ignore further sub-events.
    pub fn dispose(&mut self) {
        self.disposed = true;
    }

    // ========================================================================
    // Sub-event Merging
    // ========================================================================

    /// Merges the primary `requestWillBeSent` sub-event.
    ///
    /// Returns the `network.beforeRequestSent` occurrence.
    pub fn on_request_will_be_sent(
        &mut self,
        params: RequestWillBeSentParams,
    ) -> Option<EventEnvelope> {
        if self.disposed {
            return None;
        }
        self.request = Some(params);
        Some(EventEnvelope::new(
            EventName::BeforeRequestSent,
            self.base_params(json!({"isBlocked": false})),
        ))
    }

    /// Finalizes this record for a redirect hop.
    ///
    /// The redirect response carried by the *next* hop's
    /// `requestWillBeSent` is this hop's response; emitting
    /// `responseCompleted` for it closes the hop.
    pub fn handle_redirect(&mut self, params: &RequestWillBeSentParams) -> Option<EventEnvelope> {
        if self.disposed {
            return None;
        }
        self.response = params.redirect_response.clone();
        let envelope = EventEnvelope::new(
            EventName::ResponseCompleted,
            self.base_params(json!({"response": self.response_params()})),
        );
        Some(envelope)
    }

    /// Merges the `requestWillBeSentExtraInfo` sub-event.
    pub fn on_request_extra_info(&mut self, params: RequestExtraInfoParams) {
        if self.disposed {
            return;
        }
        self.request_extra = Some(params);
    }

    /// Merges the `responseReceived` sub-event.
    ///
    /// Returns the `network.responseCompleted` occurrence.
    pub fn on_response_received(&mut self, response: CdpResponse) -> Option<EventEnvelope> {
        if self.disposed {
            return None;
        }
        self.response = Some(response);
        Some(EventEnvelope::new(
            EventName::ResponseCompleted,
            self.base_params(json!({"response": self.response_params()})),
        ))
    }

    /// Merges the `responseReceivedExtraInfo` sub-event.
    pub fn on_response_extra_info(&mut self, params: ResponseExtraInfoParams) {
        if self.disposed {
            return;
        }
        self.response_extra = Some(params);
    }

    /// Records that the response was served from cache.
    pub fn on_served_from_cache(&mut self) {
        if self.disposed {
            return;
        }
        self.served_from_cache = true;
    }

    /// Merges the `loadingFailed` sub-event.
    ///
    /// Returns the `network.fetchError` occurrence.
    pub fn on_loading_failed(&mut self, params: LoadingFailedParams) -> Option<EventEnvelope> {
        if self.disposed {
            return None;
        }
        let error_text = params.error_text.clone();
        self.failure = Some(params);
        Some(EventEnvelope::new(
            EventName::FetchError,
            self.base_params(json!({"errorText": error_text})),
        ))
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Common event params: context, redirect count, request data.
    fn base_params(&self, extra: Value) -> Value {
        let mut params = json!({
            "context": self.context(),
            "navigation": Value::Null,
            "redirectCount": self.redirect_count,
            "request": self.request_params(),
            "timestamp": self.request.as_ref().map_or(0.0, |request| request.timestamp),
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut params, extra) {
            base.extend(extra);
        }
        params
    }

    fn request_params(&self) -> Value {
        // Extra-info headers are the raw wire headers; prefer them once
        // they arrived.
        let headers = self
            .request_extra
            .as_ref()
            .map(|extra| &extra.headers)
            .or_else(|| self.request.as_ref().map(|request| &request.request.headers));

        match &self.request {
            Some(request) => json!({
                "request": self.id,
                "url": request.request.url,
                "method": request.request.method,
                "headers": headers,
            }),
            None => json!({"request": self.id}),
        }
    }

    fn response_params(&self) -> Value {
        let headers = self
            .response_extra
            .as_ref()
            .map(|extra| &extra.headers)
            .or_else(|| self.response.as_ref().map(|response| &response.headers));

        match &self.response {
            Some(response) => json!({
                "url": response.url,
                "status": response.status,
                "statusText": response.status_text,
                "mimeType": response.mime_type,
                "headers": headers,
                "fromCache": self.served_from_cache,
            }),
            None => Value::Null,
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

    fn sent_params(url: &str, redirect: Option<i64>) -> RequestWillBeSentParams {
        let mut value = json!({
            "requestId": "R1",
            "request": {"url": url, "method": "GET", "headers": {}},
            "frameId": "C1",
            "timestamp": 3.5
        });
        if let Some(status) = redirect {
            value["redirectResponse"] =
                json!({"url": url, "status": status, "headers": {}});
        }
        serde_json::from_value(value).expect("params")
    }

    #[test]
    fn test_before_request_sent_rendering() {
        let mut record = NetworkRequest::new(NetworkId::new("R1"), 0);
        let envelope = record
            .on_request_will_be_sent(sent_params("https://a.test/", None))
            .expect("event");

        assert_eq!(envelope.name, EventName::BeforeRequestSent);
        assert_eq!(envelope.params["context"], "C1");
        assert_eq!(envelope.params["redirectCount"], 0);
        assert_eq!(envelope.params["request"]["url"], "https://a.test/");
        assert_eq!(envelope.params["isBlocked"], false);
        assert!(record.is_redirecting());
    }

    #[test]
    fn test_placeholder_record_enriched_later() {
        // Extra info arrives before the primary sub-event.
        let mut record = NetworkRequest::new(NetworkId::new("R1"), 0);
        record.on_response_extra_info(
            serde_json::from_value(json!({"requestId": "R1", "headers": {"x": "1"}}))
                .expect("params"),
        );
        assert!(!record.is_redirecting());
        assert!(record.url().is_none());

        record
            .on_request_will_be_sent(sent_params("https://a.test/", None))
            .expect("event");
        assert_eq!(record.url(), Some("https://a.test/"));
    }

    #[test]
    fn test_handle_redirect_closes_hop() {
        let mut record = NetworkRequest::new(NetworkId::new("R1"), 0);
        record
            .on_request_will_be_sent(sent_params("https://a.test/", None))
            .expect("event");

        let next_hop = sent_params("https://a.test/next", Some(302));
        let envelope = record.handle_redirect(&next_hop).expect("event");
        assert_eq!(envelope.name, EventName::ResponseCompleted);
        assert_eq!(envelope.params["response"]["status"], 302);
    }

    #[test]
    fn test_response_merging_with_cache_flag() {
        let mut record = NetworkRequest::new(NetworkId::new("R1"), 0);
        record
            .on_request_will_be_sent(sent_params("https://a.test/", None))
            .expect("event");
        record.on_served_from_cache();

        let envelope = record
            .on_response_received(
                serde_json::from_value(json!({
                    "url": "https://a.test/",
                    "status": 200,
                    "statusText": "OK",
                    "headers": {},
                    "mimeType": "text/html"
                }))
                .expect("response"),
            )
            .expect("event");

        assert_eq!(envelope.params["response"]["fromCache"], true);
        assert_eq!(envelope.params["response"]["status"], 200);
    }

    #[test]
    fn test_loading_failed() {
        let mut record = NetworkRequest::new(NetworkId::new("R1"), 0);
        record
            .on_request_will_be_sent(sent_params("https://a.test/", None))
            .expect("event");

        let envelope = record
            .on_loading_failed(
                serde_json::from_value(
                    json!({"requestId": "R1", "errorText": "net::ERR_FAILED"}),
                )
                .expect("params"),
            )
            .expect("event");

        assert_eq!(envelope.name, EventName::FetchError);
        assert_eq!(envelope.params["errorText"], "net::ERR_FAILED");
        assert_eq!(record.failure(), Some("net::ERR_FAILED"));
    }

    #[test]
    fn test_extra_info_headers_preferred() {
        let mut record = NetworkRequest::new(NetworkId::new("R1"), 0);
        record
            .on_request_will_be_sent(sent_params("https://a.test/", None))
            .expect("event");
        record.on_request_extra_info(
            serde_json::from_value(json!({"requestId": "R1", "headers": {"cookie": "a=1"}}))
                .expect("params"),
        );

        let envelope = record
            .on_response_received(
                serde_json::from_value(json!({
                    "url": "https://a.test/",
                    "status": 200,
                    "headers": {}
                }))
                .expect("response"),
            )
            .expect("event");
        assert_eq!(envelope.params["request"]["headers"]["cookie"], "a=1");
    }

    #[test]
    fn test_disposed_record_ignores_events() {
        let mut record = NetworkRequest::new(NetworkId::new("R1"), 0);
        record.dispose();
        assert!(record.is_disposed());
        assert!(
            record
                .on_request_will_be_sent(sent_params("https://a.test/", None))
                .is_none()
        );
        assert!(
            record
                .on_loading_failed(
                    serde_json::from_value(json!({"requestId": "R1", "errorText": "x"}))
                        .expect("params"),
                )
                .is_none()
        );
    }
}
