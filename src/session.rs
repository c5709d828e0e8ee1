//! Mapper session: one full state universe per debugged browser.
//!
//! [`MapperSession`] owns every shared map — context store, target registry,
//! network storage, broker tables — as explicit instance state and wires the
//! processors together. The transport feeds it raw commands and CDP events;
//! everything it emits goes out through the outgoing message sink handed in
//! at construction.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cdp::{CdpConnection, CdpEvent, ConsoleApiCalledParams};
use crate::context::{BrowsingContextProcessor, ContextStore};
use crate::dispatch::CommandDispatcher;
use crate::error::Error;
use crate::events::{EventBroker, OutboundQueue, deferred_event};
use crate::identifiers::{BrowsingContextId, CdpSessionId};
use crate::network::{NetworkCoordinator, NetworkProcessor, NetworkStorage};
use crate::protocol::{CommandEnvelope, EventEnvelope, EventName, OutgoingMessage};
use crate::script::ScriptProcessor;

// ============================================================================
// MapperSession
// ============================================================================

/// One BiDi session multiplexed over many CDP sessions.
pub struct MapperSession {
    store: Arc<ContextStore>,
    broker: Arc<EventBroker>,
    contexts: Arc<BrowsingContextProcessor>,
    dispatcher: CommandDispatcher,
    /// Per-target network coordinators, keyed by CDP session.
    coordinators: Mutex<FxHashMap<CdpSessionId, Arc<NetworkCoordinator>>>,
    network_storage: Arc<NetworkStorage>,
    outbound: OutboundQueue,
}

impl MapperSession {
    /// Creates a session.
    ///
    /// `self_target_id` is the mapper's own tab, which is never modeled as
    /// a browsing context. `sink` receives every outgoing message.
    #[must_use]
    pub fn new(
        connection: Arc<dyn CdpConnection>,
        self_target_id: BrowsingContextId,
        sink: mpsc::UnboundedSender<OutgoingMessage>,
    ) -> Arc<Self> {
        let outbound = OutboundQueue::new(sink);
        let store = Arc::new(ContextStore::new());
        let targets = Arc::new(crate::cdp::TargetRegistry::new());
        let network_storage = Arc::new(NetworkStorage::new());
        let broker = Arc::new(EventBroker::new(Arc::clone(&store), outbound.clone()));
        let scripts = Arc::new(ScriptProcessor::new(
            Arc::clone(&store),
            Arc::clone(&targets),
        ));
        let contexts = Arc::new(BrowsingContextProcessor::new(
            Arc::clone(&connection),
            self_target_id,
            Arc::clone(&store),
            Arc::clone(&targets),
            Arc::clone(&network_storage),
            Arc::clone(&broker),
            Arc::clone(&scripts),
        ));
        let network = Arc::new(NetworkProcessor::new(
            Arc::clone(&network_storage),
            Arc::clone(&targets),
        ));
        let dispatcher = CommandDispatcher::new(
            connection,
            Arc::clone(&store),
            Arc::clone(&broker),
            Arc::clone(&contexts),
            network,
            scripts,
            outbound.clone(),
        );

        Arc::new(Self {
            store,
            broker,
            contexts,
            dispatcher,
            coordinators: Mutex::new(FxHashMap::default()),
            network_storage,
            outbound,
        })
    }

    /// Returns the context store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Returns the event broker.
    #[inline]
    #[must_use]
    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Processes one parsed command envelope.
    pub async fn process_command(&self, envelope: CommandEnvelope) {
        self.dispatcher.process_command(envelope).await;
    }

    /// Processes one raw command message from the transport.
    ///
    /// A message that is not a valid envelope cannot be correlated; it is
    /// answered with an uncorrelated "invalid argument" error response.
    pub async fn process_raw_command(&self, raw: &str) {
        match serde_json::from_str::<CommandEnvelope>(raw) {
            Ok(envelope) => self.process_command(envelope).await,
            Err(parse_error) => {
                debug!(%parse_error, "Unparseable command message");
                let error = Error::invalid_argument(format!(
                    "Cannot parse command: {parse_error}"
                ));
                let message = OutgoingMessage::error(&error, None, None);
                if self.outbound.send_message(message).is_err() {
                    warn!("Parse-error response dropped: outgoing sink closed");
                }
            }
        }
    }

    // ========================================================================
    // CDP Events
    // ========================================================================

    /// Routes one incoming CDP event.
    ///
    /// `session` is the CDP session the event arrived on; `None` for
    /// browser-level events. Events the mapper does not consume are
    /// dropped.
    pub async fn handle_cdp_event(
        &self,
        session: Option<&CdpSessionId>,
        method: &str,
        params: Value,
    ) {
        let Some(event) = CdpEvent::parse(method, params) else {
            return;
        };

        match event {
            CdpEvent::AttachedToTarget(params) => {
                let session_id = params.session_id.clone();
                if let Some(target) = self.contexts.handle_attached_to_target(params).await {
                    let coordinator = NetworkCoordinator::new(
                        target,
                        Arc::clone(&self.network_storage),
                        Arc::clone(&self.broker),
                    );
                    self.coordinators.lock().insert(session_id, coordinator);
                }
            }
            CdpEvent::DetachedFromTarget(params) => {
                // The coordinator abandons its request map before the
                // context tree is torn down.
                if let Some(coordinator) = self.coordinators.lock().remove(&params.session_id) {
                    coordinator.dispose();
                }
                self.contexts.handle_detached_from_target(&params);
            }
            CdpEvent::TargetInfoChanged(params) => {
                self.contexts.handle_target_info_changed(&params);
            }
            CdpEvent::FrameAttached(params) => self.contexts.handle_frame_attached(&params),
            CdpEvent::FrameDetached(params) => self.contexts.handle_frame_detached(&params),
            CdpEvent::FrameNavigated(params) => self.contexts.handle_frame_navigated(&params),
            CdpEvent::LifecycleEvent(params) => self.contexts.handle_lifecycle_event(&params),
            CdpEvent::ConsoleApiCalled(params) => self.handle_console_api(session, params),
            network_event => {
                let Some(session) = session else {
                    return;
                };
                let coordinator = self.coordinators.lock().get(session).cloned();
                if let Some(coordinator) = coordinator {
                    coordinator.handle_event(&network_event);
                }
            }
        }
    }

    /// Turns a console call into a buffered `log.entryAdded` occurrence.
    ///
    /// The entry rendering goes through the deferred-payload path: the
    /// broker's bookkeeping never waits on it.
    fn handle_console_api(
        &self,
        session: Option<&CdpSessionId>,
        params: ConsoleApiCalledParams,
    ) {
        let context = session
            .and_then(|session| self.coordinators.lock().get(session).cloned())
            .map(|coordinator| coordinator.target().target_id().clone());

        let payload_context = context.clone();
        let payload = deferred_event(async move {
            Ok(EventEnvelope::new(
                EventName::LogEntryAdded,
                render_log_entry(payload_context, &params),
            ))
        });
        self.broker
            .register_promise_event(EventName::LogEntryAdded, context, payload);
    }
}

/// Renders a console call into a BiDi log entry.
fn render_log_entry(
    context: Option<BrowsingContextId>,
    params: &ConsoleApiCalledParams,
) -> Value {
    let level = match params.kind.as_str() {
        "error" | "assert" => "error",
        "warning" => "warn",
        "debug" | "trace" => "debug",
        _ => "info",
    };
    let text = params
        .args
        .iter()
        .map(|arg| {
            arg.get("value")
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(" ");

    json!({
        "type": "console",
        "level": level,
        "method": params.kind,
        "text": text,
        "timestamp": params.timestamp,
        "args": params.args,
        "source": {"context": context},
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::cdp::{CdpClient, CdpResult};

    struct StubClient {
        session: Option<CdpSessionId>,
    }

    #[async_trait]
    impl CdpClient for StubClient {
        async fn send_command(&self, _method: &str, _params: Value) -> CdpResult<Value> {
            Ok(Value::Null)
        }

        fn session_id(&self) -> Option<&CdpSessionId> {
            self.session.as_ref()
        }
    }

    struct StubConnection;

    impl CdpConnection for StubConnection {
        fn client(&self, session: &CdpSessionId) -> Option<Arc<dyn CdpClient>> {
            Some(Arc::new(StubClient {
                session: Some(session.clone()),
            }))
        }

        fn browser_client(&self) -> Arc<dyn CdpClient> {
            Arc::new(StubClient { session: None })
        }
    }

    fn session() -> (Arc<MapperSession>, mpsc::UnboundedReceiver<OutgoingMessage>) {
        let (sink, rx) = mpsc::unbounded_channel();
        (
            MapperSession::new(
                Arc::new(StubConnection),
                BrowsingContextId::new("MAPPER"),
                sink,
            ),
            rx,
        )
    }

    async fn attach(session: &MapperSession, cdp_session: &str, target: &str) {
        session
            .handle_cdp_event(
                None,
                "Target.attachedToTarget",
                json!({
                    "sessionId": cdp_session,
                    "targetInfo": {"targetId": target, "type": "page", "url": "about:blank"}
                }),
            )
            .await;
    }

    #[tokio::test]
    async fn test_attach_creates_context_and_coordinator() {
        let (session, _rx) = session();
        attach(&session, "S1", "T1").await;

        assert!(session.store().has_context(&BrowsingContextId::new("T1")));
        assert!(
            session
                .coordinators
                .lock()
                .contains_key(&CdpSessionId::new("S1"))
        );
    }

    #[tokio::test]
    async fn test_detach_tears_down_both() {
        let (session, _rx) = session();
        attach(&session, "S1", "T1").await;

        session
            .handle_cdp_event(
                None,
                "Target.detachedFromTarget",
                json!({"sessionId": "S1", "targetId": "T1"}),
            )
            .await;

        assert!(!session.store().has_context(&BrowsingContextId::new("T1")));
        assert!(session.coordinators.lock().is_empty());
    }

    #[tokio::test]
    async fn test_network_events_reach_coordinator() {
        let (session, _rx) = session();
        attach(&session, "S1", "T1").await;

        let cdp_session = CdpSessionId::new("S1");
        session
            .handle_cdp_event(
                Some(&cdp_session),
                "Network.requestWillBeSent",
                json!({
                    "requestId": "R1",
                    "request": {"url": "https://a.test/", "method": "GET", "headers": {}},
                    "frameId": "T1",
                    "timestamp": 1.0
                }),
            )
            .await;

        let coordinator = session
            .coordinators
            .lock()
            .get(&cdp_session)
            .cloned()
            .expect("coordinator");
        assert_eq!(coordinator.request_count(), 1);
    }

    #[tokio::test]
    async fn test_console_call_buffers_log_entry() {
        let (session, mut rx) = session();
        attach(&session, "S1", "T1").await;

        let cdp_session = CdpSessionId::new("S1");
        session
            .handle_cdp_event(
                Some(&cdp_session),
                "Runtime.consoleAPICalled",
                json!({
                    "type": "error",
                    "args": [{"type": "string", "value": "boom"}],
                    "timestamp": 1000.0
                }),
            )
            .await;

        // The occurrence was buffered: a later subscriber catches up.
        session
            .broker()
            .subscribe(&["log.entryAdded".to_string()], &[], &None)
            .expect("subscribe");

        match rx.recv().await.expect("message") {
            OutgoingMessage::Event { method, params, .. } => {
                assert_eq!(method, "log.entryAdded");
                assert_eq!(params["level"], "error");
                assert_eq!(params["text"], "boom");
                assert_eq!(params["source"]["context"], "T1");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_raw_command_roundtrip() {
        let (session, mut rx) = session();

        session
            .process_raw_command(r#"{"id": 5, "method": "session.status", "params": {}}"#)
            .await;
        assert!(matches!(
            rx.recv().await.expect("response"),
            OutgoingMessage::Success { id: 5, .. }
        ));

        session.process_raw_command("not json").await;
        match rx.recv().await.expect("response") {
            OutgoingMessage::Error { id, error, .. } => {
                assert_eq!(id, None);
                assert_eq!(error, "invalid argument");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unconsumed_event_ignored() {
        let (session, _rx) = session();
        // Must not panic or create state.
        session
            .handle_cdp_event(None, "Animation.animationStarted", json!({}))
            .await;
        assert!(session.store().top_level_contexts().is_empty());
    }
}
