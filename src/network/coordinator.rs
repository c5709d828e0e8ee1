//! Per-target network event coordination.
//!
//! One [`NetworkCoordinator`] exists per target binding and exclusively
//! owns that target's request map. It consumes the target's `Network.*`
//! sub-events to maintain request records (including the redirect
//! algorithm), and its `Fetch.*` events to pause matching requests and
//! auto-continue the rest. Target teardown disposes every live record
//! without resolving anything held against it.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::cdp::{
    AuthRequiredParams, CdpEvent, CdpTarget, LoadingFailedParams, RequestExtraInfoParams,
    RequestPausedParams, RequestServedFromCacheParams, RequestWillBeSentParams,
    ResponseExtraInfoParams, ResponseReceivedParams,
};
use crate::events::EventBroker;
use crate::identifiers::{BrowsingContextId, InterceptId, NetworkId};
use crate::network::request::NetworkRequest;
use crate::network::storage::{BlockedRequest, NetworkStorage};
use crate::protocol::{EventEnvelope, EventName, InterceptPhase};

// ============================================================================
// NetworkCoordinator
// ============================================================================

/// Network state machine of one target. Maps 1:1 to a target binding.
pub struct NetworkCoordinator {
    target: Arc<CdpTarget>,
    storage: Arc<NetworkStorage>,
    broker: Arc<EventBroker>,
    /// Live request records of this target, keyed by network ID.
    requests: Mutex<FxHashMap<NetworkId, NetworkRequest>>,
}

impl NetworkCoordinator {
    /// Creates a coordinator for a target binding.
    #[must_use]
    pub fn new(
        target: Arc<CdpTarget>,
        storage: Arc<NetworkStorage>,
        broker: Arc<EventBroker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            storage,
            broker,
            requests: Mutex::new(FxHashMap::default()),
        })
    }

    /// Returns the target this coordinator belongs to.
    #[inline]
    #[must_use]
    pub fn target(&self) -> &Arc<CdpTarget> {
        &self.target
    }

    /// Routes one CDP event of this target's session.
    ///
    /// Non-network events are ignored.
    pub fn handle_event(&self, event: &CdpEvent) {
        match event {
            CdpEvent::RequestWillBeSent(params) => self.on_request_will_be_sent(params.clone()),
            CdpEvent::RequestWillBeSentExtraInfo(params) => {
                self.on_request_extra_info(params.clone());
            }
            CdpEvent::ResponseReceived(params) => self.on_response_received(params.clone()),
            CdpEvent::ResponseReceivedExtraInfo(params) => {
                self.on_response_extra_info(params.clone());
            }
            CdpEvent::RequestServedFromCache(params) => self.on_served_from_cache(params),
            CdpEvent::LoadingFailed(params) => self.on_loading_failed(params.clone()),
            CdpEvent::RequestPaused(params) => self.on_request_paused(params),
            CdpEvent::AuthRequired(params) => self.on_auth_required(params),
            _ => {}
        }
    }

    /// Returns the intercept registrations applicable to a request at a
    /// phase: phase covered, and pattern set empty or matching the
    /// request's current URL.
    #[must_use]
    pub fn get_network_intercepts(
        &self,
        request: &NetworkId,
        phase: InterceptPhase,
    ) -> Vec<InterceptId> {
        let requests = self.requests.lock();
        let Some(url) = requests.get(request).and_then(NetworkRequest::url) else {
            return Vec::new();
        };
        self.storage.matching_intercepts(url, phase)
    }

    /// Returns the number of live request records.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the redirect count of a live record.
    #[must_use]
    pub fn redirect_count(&self, request: &NetworkId) -> Option<u64> {
        self.requests.lock().get(request).map(NetworkRequest::redirect_count)
    }

    /// Disposes every live record without resolving anything.
    ///
    /// Invoked when the target detaches; disposal is idempotent.
    pub fn dispose(&self) {
        let mut requests = self.requests.lock();
        for (_, mut record) in requests.drain() {
            record.dispose();
        }
        debug!(target_id = %self.target.target_id(), "Disposed request map");
    }

    // ========================================================================
    // Network Sub-events
    // ========================================================================

    fn on_request_will_be_sent(&self, params: RequestWillBeSentParams) {
        let request_id = params.request_id.clone();
        let mut emitted: Vec<(Option<BrowsingContextId>, EventEnvelope)> = Vec::new();

        {
            let mut requests = self.requests.lock();
            match requests.get_mut(&request_id) {
                Some(record) if record.is_redirecting() => {
                    // Redirect: finalize the old hop, replace it under the
                    // same ID with an incremented redirect count, then run
                    // the new sub-event against the replacement.
                    let next_count = record.redirect_count() + 1;
                    if let Some(envelope) = record.handle_redirect(&params) {
                        emitted.push((record.context().cloned(), envelope));
                    }
                    record.dispose();
                    requests.remove(&request_id);

                    let mut replacement = NetworkRequest::new(request_id.clone(), next_count);
                    if let Some(envelope) = replacement.on_request_will_be_sent(params) {
                        emitted.push((replacement.context().cloned(), envelope));
                    }
                    requests.insert(request_id, replacement);
                }
                Some(record) => {
                    if let Some(envelope) = record.on_request_will_be_sent(params) {
                        emitted.push((record.context().cloned(), envelope));
                    }
                }
                None => {
                    let mut record = NetworkRequest::new(request_id.clone(), 0);
                    if let Some(envelope) = record.on_request_will_be_sent(params) {
                        emitted.push((record.context().cloned(), envelope));
                    }
                    requests.insert(request_id, record);
                }
            }
        }

        for (context, envelope) in emitted {
            self.emit(context, envelope);
        }
    }

    fn on_request_extra_info(&self, params: RequestExtraInfoParams) {
        let request_id = params.request_id.clone();
        let mut requests = self.requests.lock();
        self.get_or_create(&mut requests, &request_id)
            .on_request_extra_info(params);
    }

    fn on_response_received(&self, params: ResponseReceivedParams) {
        let emitted = {
            let mut requests = self.requests.lock();
            let record = self.get_or_create(&mut requests, &params.request_id);
            record
                .on_response_received(params.response)
                .map(|envelope| (record.context().cloned(), envelope))
        };
        if let Some((context, envelope)) = emitted {
            self.emit(context, envelope);
        }
    }

    fn on_response_extra_info(&self, params: ResponseExtraInfoParams) {
        let request_id = params.request_id.clone();
        let mut requests = self.requests.lock();
        self.get_or_create(&mut requests, &request_id)
            .on_response_extra_info(params);
    }

    fn on_served_from_cache(&self, params: &RequestServedFromCacheParams) {
        let mut requests = self.requests.lock();
        self.get_or_create(&mut requests, &params.request_id)
            .on_served_from_cache();
    }

    fn on_loading_failed(&self, params: LoadingFailedParams) {
        let request_id = params.request_id.clone();
        let emitted = {
            let mut requests = self.requests.lock();
            let record = self.get_or_create(&mut requests, &request_id);
            record
                .on_loading_failed(params)
                .map(|envelope| (record.context().cloned(), envelope))
        };
        if let Some((context, envelope)) = emitted {
            self.emit(context, envelope);
        }
    }

    /// Returns the live record for an ID, creating a placeholder when a
    /// sub-event arrives before the primary one.
    fn get_or_create<'map>(
        &self,
        requests: &'map mut FxHashMap<NetworkId, NetworkRequest>,
        request_id: &NetworkId,
    ) -> &'map mut NetworkRequest {
        requests
            .entry(request_id.clone())
            .or_insert_with(|| NetworkRequest::new(request_id.clone(), 0))
    }

    // ========================================================================
    // Fetch Events
    // ========================================================================

    fn on_request_paused(&self, params: &RequestPausedParams) {
        let phase = if params.is_response_stage() {
            InterceptPhase::ResponseStarted
        } else {
            InterceptPhase::BeforeRequestSent
        };

        let Some(network_id) = params.network_id.clone() else {
            // No network correlation, nothing to block against.
            self.continue_paused_job(params.request_id.as_str().to_string());
            return;
        };

        let intercepts = self
            .storage
            .matching_intercepts(&params.request.url, phase);
        if intercepts.is_empty() {
            self.continue_paused_job(params.request_id.as_str().to_string());
            return;
        }

        let response = json!({
            "status": params.response_status_code,
            "errorReason": params.response_error_reason,
        });
        self.storage.add_blocked_request(
            network_id.clone(),
            BlockedRequest {
                fetch_id: params.request_id.clone(),
                phase,
                response,
                client: self.target.client(),
            },
        );

        let name = match phase {
            InterceptPhase::BeforeRequestSent => EventName::BeforeRequestSent,
            _ => EventName::ResponseStarted,
        };
        let context = self.context_of(&network_id);
        self.emit(
            context.clone(),
            EventEnvelope::new(
                name,
                json!({
                    "context": context,
                    "request": {"request": network_id, "url": params.request.url},
                    "isBlocked": true,
                    "intercepts": intercepts,
                }),
            ),
        );
    }

    fn on_auth_required(&self, params: &AuthRequiredParams) {
        let intercepts = self
            .storage
            .matching_intercepts(&params.request.url, InterceptPhase::AuthRequired);
        if intercepts.is_empty() {
            // Unwatched challenge: let the browser handle it.
            let client = self.target.client();
            let fetch_id = params.request_id.as_str().to_string();
            tokio::spawn(async move {
                let result = client
                    .send_command(
                        "Fetch.continueWithAuth",
                        json!({
                            "requestId": fetch_id,
                            "authChallengeResponse": {"response": "Default"},
                        }),
                    )
                    .await;
                if let Err(error) = result {
                    warn!(%error, "Default auth continuation failed");
                }
            });
            return;
        }

        // Fetch auth events carry no network ID; correlate via the URL.
        let network_id = self
            .find_by_url(&params.request.url)
            .unwrap_or_else(|| NetworkId::new(params.request_id.as_str()));

        self.storage.add_blocked_request(
            network_id.clone(),
            BlockedRequest {
                fetch_id: params.request_id.clone(),
                phase: InterceptPhase::AuthRequired,
                response: params.auth_challenge.clone().unwrap_or(Value::Null),
                client: self.target.client(),
            },
        );

        let context = self.context_of(&network_id);
        self.emit(
            context.clone(),
            EventEnvelope::new(
                EventName::AuthRequired,
                json!({
                    "context": context,
                    "request": {"request": network_id, "url": params.request.url},
                    "isBlocked": true,
                    "intercepts": intercepts,
                }),
            ),
        );
    }

    fn continue_paused_job(&self, fetch_id: String) {
        let client = self.target.client();
        tokio::spawn(async move {
            let result = client
                .send_command("Fetch.continueRequest", json!({"requestId": fetch_id}))
                .await;
            if let Err(error) = result {
                warn!(%error, "Auto-continue of unmatched paused request failed");
            }
        });
    }

    fn find_by_url(&self, url: &str) -> Option<NetworkId> {
        let requests = self.requests.lock();
        requests
            .values()
            .find(|record| record.url() == Some(url))
            .map(|record| record.id().clone())
    }

    fn context_of(&self, request: &NetworkId) -> Option<BrowsingContextId> {
        let requests = self.requests.lock();
        requests
            .get(request)
            .and_then(|record| record.context().cloned())
    }

    fn emit(&self, context: Option<BrowsingContextId>, envelope: EventEnvelope) {
        let name = envelope.name;
        self.broker.register_event(name, context, envelope.params);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::cdp::{CdpClient, CdpResult};
    use crate::context::ContextStore;
    use crate::events::OutboundQueue;
    use crate::identifiers::CdpSessionId;
    use crate::network::storage::InterceptRegistration;
    use crate::protocol::{OutgoingMessage, UrlPattern};

    /// Client recording every sent command.
    struct RecordingClient {
        session: CdpSessionId,
        sent: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                session: CdpSessionId::new("S1"),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(String, Value)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl CdpClient for RecordingClient {
        async fn send_command(&self, method: &str, params: Value) -> CdpResult<Value> {
            self.sent.lock().push((method.to_string(), params));
            Ok(Value::Null)
        }

        fn session_id(&self) -> Option<&CdpSessionId> {
            Some(&self.session)
        }
    }

    struct Fixture {
        coordinator: Arc<NetworkCoordinator>,
        storage: Arc<NetworkStorage>,
        client: Arc<RecordingClient>,
        rx: mpsc::UnboundedReceiver<OutgoingMessage>,
    }

    fn fixture() -> Fixture {
        let (sink, rx) = mpsc::unbounded_channel();
        let store = Arc::new(ContextStore::new());
        let broker = Arc::new(EventBroker::new(
            Arc::clone(&store),
            OutboundQueue::new(sink),
        ));
        let storage = Arc::new(NetworkStorage::new());
        let client = RecordingClient::new();
        let target = CdpTarget::new(
            "T1".into(),
            "S1".into(),
            Arc::clone(&client) as Arc<dyn CdpClient>,
        );
        let coordinator = NetworkCoordinator::new(target, Arc::clone(&storage), broker);
        Fixture {
            coordinator,
            storage,
            client,
            rx,
        }
    }

    fn sent_event(request_id: &str, url: &str, redirect_status: Option<i64>) -> CdpEvent {
        let mut params = json!({
            "requestId": request_id,
            "request": {"url": url, "method": "GET", "headers": {}},
            "frameId": "C1",
            "timestamp": 1.0
        });
        if let Some(status) = redirect_status {
            params["redirectResponse"] = json!({"url": url, "status": status, "headers": {}});
        }
        CdpEvent::parse("Network.requestWillBeSent", params).expect("event")
    }

    #[tokio::test]
    async fn test_redirect_replaces_live_record() {
        let fx = fixture();
        let id = NetworkId::new("R1");

        fx.coordinator
            .handle_event(&sent_event("R1", "https://a.test/", None));
        assert_eq!(fx.coordinator.redirect_count(&id), Some(0));

        // Second primary sub-event for the same ID: redirect.
        fx.coordinator
            .handle_event(&sent_event("R1", "https://a.test/next", Some(302)));

        assert_eq!(fx.coordinator.request_count(), 1);
        assert_eq!(fx.coordinator.redirect_count(&id), Some(1));
    }

    #[tokio::test]
    async fn test_intercept_lookup_sees_replacement_url() {
        let fx = fixture();
        let id = NetworkId::new("R1");
        fx.storage.add_intercept(InterceptRegistration {
            patterns: vec![UrlPattern::String {
                pattern: "https://a.test/next".to_string(),
            }],
            phases: vec![InterceptPhase::BeforeRequestSent],
        });

        fx.coordinator
            .handle_event(&sent_event("R1", "https://a.test/", None));
        assert!(
            fx.coordinator
                .get_network_intercepts(&id, InterceptPhase::BeforeRequestSent)
                .is_empty()
        );

        fx.coordinator
            .handle_event(&sent_event("R1", "https://a.test/next", Some(302)));
        assert_eq!(
            fx.coordinator
                .get_network_intercepts(&id, InterceptPhase::BeforeRequestSent)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_paused_request_without_match_auto_continues() {
        let fx = fixture();
        fx.coordinator
            .handle_event(&sent_event("R1", "https://a.test/", None));

        let paused = CdpEvent::parse(
            "Fetch.requestPaused",
            json!({
                "requestId": "F1",
                "request": {"url": "https://a.test/", "method": "GET"},
                "networkId": "R1"
            }),
        )
        .expect("event");
        fx.coordinator.handle_event(&paused);

        // Auto-continue runs on a spawned task.
        tokio::task::yield_now().await;
        let sent = fx.client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Fetch.continueRequest");
        assert_eq!(sent[0].1["requestId"], "F1");
        assert!(!fx.storage.has_blocked_requests());
    }

    #[tokio::test]
    async fn test_paused_request_with_match_blocks_and_emits() {
        let mut fx = fixture();
        fx.storage.add_intercept(InterceptRegistration {
            patterns: vec![],
            phases: vec![InterceptPhase::BeforeRequestSent],
        });

        // Subscribe so the blocked event reaches the sink.
        let broker_events = vec!["network.beforeRequestSent".to_string()];
        fx.coordinator
            .broker
            .subscribe(&broker_events, &[], &None)
            .expect("subscribe");

        fx.coordinator
            .handle_event(&sent_event("R1", "https://a.test/", None));
        let paused = CdpEvent::parse(
            "Fetch.requestPaused",
            json!({
                "requestId": "F1",
                "request": {"url": "https://a.test/", "method": "GET"},
                "networkId": "R1"
            }),
        )
        .expect("event");
        fx.coordinator.handle_event(&paused);

        assert!(fx.storage.has_blocked_requests());
        let blocked = fx
            .storage
            .take_blocked_request(&NetworkId::new("R1"))
            .expect("blocked");
        assert_eq!(blocked.fetch_id.as_str(), "F1");
        assert_eq!(blocked.phase, InterceptPhase::BeforeRequestSent);

        // First message is the unblocked beforeRequestSent, second the
        // blocked one.
        let mut saw_blocked = false;
        for _ in 0..2 {
            if let Some(OutgoingMessage::Event { params, .. }) = fx.rx.recv().await
                && params["isBlocked"] == true
            {
                assert_eq!(params["intercepts"].as_array().map(Vec::len), Some(1));
                saw_blocked = true;
            }
        }
        assert!(saw_blocked);
    }

    #[tokio::test]
    async fn test_response_stage_classification() {
        let fx = fixture();
        fx.storage.add_intercept(InterceptRegistration {
            patterns: vec![],
            phases: vec![InterceptPhase::ResponseStarted],
        });

        fx.coordinator
            .handle_event(&sent_event("R1", "https://a.test/", None));
        let paused = CdpEvent::parse(
            "Fetch.requestPaused",
            json!({
                "requestId": "F2",
                "request": {"url": "https://a.test/", "method": "GET"},
                "networkId": "R1",
                "responseStatusCode": 200
            }),
        )
        .expect("event");
        fx.coordinator.handle_event(&paused);

        let blocked = fx
            .storage
            .take_blocked_request(&NetworkId::new("R1"))
            .expect("blocked");
        assert_eq!(blocked.phase, InterceptPhase::ResponseStarted);
    }

    #[tokio::test]
    async fn test_dispose_abandons_records() {
        let fx = fixture();
        fx.coordinator
            .handle_event(&sent_event("R1", "https://a.test/", None));
        fx.coordinator
            .handle_event(&sent_event("R2", "https://b.test/", None));
        assert_eq!(fx.coordinator.request_count(), 2);

        fx.coordinator.dispose();
        fx.coordinator.dispose();
        assert_eq!(fx.coordinator.request_count(), 0);
    }
}
