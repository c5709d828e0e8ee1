//! `network.*` command handlers.
//!
//! Intercept registry operations re-arm `Fetch` on every live target so new
//! registrations take effect immediately; blocked-request commands look up
//! and remove the blocked entry first, then issue the matching `Fetch`
//! resume action on the session the job is paused on.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::cdp::TargetRegistry;
use crate::error::{Error, Result};
use crate::network::storage::{InterceptRegistration, NetworkStorage};
use crate::protocol::{
    AddInterceptParams, ContinueRequestParams, ContinueResponseParams, ContinueWithAuthAction,
    ContinueWithAuthParams, FailRequestParams, ProvideResponseParams, RemoveInterceptParams,
};

// ============================================================================
// NetworkProcessor
// ============================================================================

/// Handles the network domain's commands.
pub struct NetworkProcessor {
    storage: Arc<NetworkStorage>,
    targets: Arc<TargetRegistry>,
}

impl NetworkProcessor {
    /// Creates the processor.
    #[must_use]
    pub fn new(storage: Arc<NetworkStorage>, targets: Arc<TargetRegistry>) -> Self {
        Self { storage, targets }
    }

    // ========================================================================
    // Intercept Registry
    // ========================================================================

    /// `network.addIntercept`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when no phase is given.
    pub async fn add_intercept(&self, params: AddInterceptParams) -> Result<Value> {
        if params.phases.is_empty() {
            return Err(Error::invalid_argument(
                "At least one phase must be specified",
            ));
        }

        let intercept = self.storage.add_intercept(InterceptRegistration {
            patterns: params.url_patterns.unwrap_or_default(),
            phases: params.phases,
        });
        debug!(intercept = %intercept, "Intercept registered");

        self.rearm_fetch().await;
        Ok(json!({"intercept": intercept}))
    }

    /// `network.removeIntercept`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchIntercept`] for unknown IDs.
    pub async fn remove_intercept(&self, params: RemoveInterceptParams) -> Result<Value> {
        self.storage.remove_intercept(&params.intercept)?;
        self.rearm_fetch().await;
        Ok(empty_result())
    }

    /// Pushes the current intercept configuration to every live target.
    ///
    /// A target that fails to re-arm (typically because it is detaching)
    /// does not fail the command; the registry change already took effect.
    async fn rearm_fetch(&self) {
        let enabled = self.storage.has_intercepts();
        let enable_params = self.storage.fetch_enable_params();

        for target in self.targets.all() {
            let result = if enabled {
                target
                    .client()
                    .send_command("Fetch.enable", enable_params.clone())
                    .await
            } else {
                target.client().send_command("Fetch.disable", json!({})).await
            };
            if let Err(error) = result {
                warn!(
                    target_id = %target.target_id(),
                    %error,
                    "Re-arming fetch interception failed"
                );
            }
        }
    }

    // ========================================================================
    // Blocked Requests
    // ========================================================================

    /// `network.continueRequest`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchRequest`] when nothing is blocked under the
    /// given network ID.
    pub async fn continue_request(&self, params: ContinueRequestParams) -> Result<Value> {
        let blocked = self.storage.take_blocked_request(&params.request)?;

        let mut args = Map::new();
        args.insert("requestId".to_string(), json!(blocked.fetch_id));
        if let Some(url) = params.url {
            args.insert("url".to_string(), json!(url));
        }
        if let Some(method) = params.method {
            args.insert("method".to_string(), json!(method));
        }

        blocked
            .client
            .send_command("Fetch.continueRequest", Value::Object(args))
            .await?;
        Ok(empty_result())
    }

    /// `network.continueResponse`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchRequest`] when nothing is blocked under the
    /// given network ID.
    pub async fn continue_response(&self, params: ContinueResponseParams) -> Result<Value> {
        let blocked = self.storage.take_blocked_request(&params.request)?;
        blocked
            .client
            .send_command(
                "Fetch.continueResponse",
                json!({"requestId": blocked.fetch_id}),
            )
            .await?;
        Ok(empty_result())
    }

    /// `network.continueWithAuth`
    ///
    /// # Errors
    ///
    /// - [`Error::NoSuchRequest`] when nothing is blocked under the ID
    /// - [`Error::InvalidArgument`] when `provideCredentials` comes
    ///   without credentials
    pub async fn continue_with_auth(&self, params: ContinueWithAuthParams) -> Result<Value> {
        // Validate before consuming the blocked entry.
        let challenge_response = match params.action {
            ContinueWithAuthAction::Default => json!({"response": "Default"}),
            ContinueWithAuthAction::Cancel => json!({"response": "CancelAuth"}),
            ContinueWithAuthAction::ProvideCredentials => {
                let credentials = params.credentials.ok_or_else(|| {
                    Error::invalid_argument("provideCredentials requires credentials")
                })?;
                json!({
                    "response": "ProvideCredentials",
                    "username": credentials.username,
                    "password": credentials.password,
                })
            }
        };

        let blocked = self.storage.take_blocked_request(&params.request)?;
        blocked
            .client
            .send_command(
                "Fetch.continueWithAuth",
                json!({
                    "requestId": blocked.fetch_id,
                    "authChallengeResponse": challenge_response,
                }),
            )
            .await?;
        Ok(empty_result())
    }

    /// `network.failRequest`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchRequest`] when nothing is blocked under the
    /// given network ID.
    pub async fn fail_request(&self, params: FailRequestParams) -> Result<Value> {
        let blocked = self.storage.take_blocked_request(&params.request)?;
        blocked
            .client
            .send_command(
                "Fetch.failRequest",
                json!({"requestId": blocked.fetch_id, "errorReason": "Failed"}),
            )
            .await?;
        Ok(empty_result())
    }

    /// `network.provideResponse`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchRequest`] when nothing is blocked under the
    /// given network ID.
    pub async fn provide_response(&self, params: ProvideResponseParams) -> Result<Value> {
        let blocked = self.storage.take_blocked_request(&params.request)?;

        // Fall back to the status captured when the request was paused.
        let snapshot_status = blocked.response.get("status").and_then(Value::as_i64);
        let status_code = params
            .status_code
            .or(snapshot_status)
            .unwrap_or(200);

        let mut args = Map::new();
        args.insert("requestId".to_string(), json!(blocked.fetch_id));
        args.insert("responseCode".to_string(), json!(status_code));
        if let Some(reason) = params.reason_phrase {
            args.insert("responsePhrase".to_string(), json!(reason));
        }
        if let Some(body) = params.body {
            args.insert("body".to_string(), json!(body));
        }

        blocked
            .client
            .send_command("Fetch.fulfillRequest", Value::Object(args))
            .await?;
        Ok(empty_result())
    }
}

/// The empty `{}` result.
fn empty_result() -> Value {
    Value::Object(Map::new())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::cdp::{CdpClient, CdpResult, CdpTarget};
    use crate::identifiers::{CdpSessionId, FetchId, InterceptId, NetworkId};
    use crate::network::storage::BlockedRequest;
    use crate::protocol::{AuthCredentials, InterceptPhase};

    struct RecordingClient {
        session: CdpSessionId,
        sent: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingClient {
        fn new(session: &str) -> Arc<Self> {
            Arc::new(Self {
                session: CdpSessionId::new(session),
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

    fn processor_with_target() -> (NetworkProcessor, Arc<NetworkStorage>, Arc<RecordingClient>) {
        let storage = Arc::new(NetworkStorage::new());
        let targets = Arc::new(TargetRegistry::new());
        let client = RecordingClient::new("S1");
        targets.insert(CdpTarget::new(
            "T1".into(),
            "S1".into(),
            Arc::clone(&client) as Arc<dyn CdpClient>,
        ));
        (
            NetworkProcessor::new(Arc::clone(&storage), targets),
            storage,
            client,
        )
    }

    fn block(storage: &NetworkStorage, client: Arc<RecordingClient>, request: &str, fetch: &str) {
        storage.add_blocked_request(
            NetworkId::new(request),
            BlockedRequest {
                fetch_id: FetchId::new(fetch),
                phase: InterceptPhase::BeforeRequestSent,
                response: Value::Null,
                client,
            },
        );
    }

    #[tokio::test]
    async fn test_add_intercept_dedupes_and_rearms() {
        let (processor, _, client) = processor_with_target();
        let params: AddInterceptParams =
            serde_json::from_value(json!({"phases": ["beforeRequestSent"]})).expect("params");

        let first = processor.add_intercept(params.clone()).await.expect("add");
        let second = processor.add_intercept(params).await.expect("add");
        assert_eq!(first["intercept"], second["intercept"]);

        let sent = client.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(method, _)| method == "Fetch.enable"));
        assert_eq!(sent[0].1["patterns"][0]["urlPattern"], "*");
    }

    #[tokio::test]
    async fn test_remove_intercept_unknown_id() {
        let (processor, _, _) = processor_with_target();
        let err = processor
            .remove_intercept(RemoveInterceptParams {
                intercept: InterceptId::new("ghost"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchIntercept { .. }));
    }

    #[tokio::test]
    async fn test_remove_last_intercept_disables_fetch() {
        let (processor, _, client) = processor_with_target();
        let params: AddInterceptParams =
            serde_json::from_value(json!({"phases": ["beforeRequestSent"]})).expect("params");
        let added = processor.add_intercept(params).await.expect("add");
        let intercept: InterceptId =
            serde_json::from_value(added["intercept"].clone()).expect("id");

        processor
            .remove_intercept(RemoveInterceptParams { intercept })
            .await
            .expect("remove");

        let sent = client.sent();
        assert_eq!(sent.last().map(|(m, _)| m.as_str()), Some("Fetch.disable"));
    }

    #[tokio::test]
    async fn test_continue_request_consumes_blocked_entry() {
        let (processor, storage, client) = processor_with_target();
        block(&storage, Arc::clone(&client), "R1", "F1");

        processor
            .continue_request(ContinueRequestParams {
                request: NetworkId::new("R1"),
                url: Some("https://redirected.test/".to_string()),
                method: None,
            })
            .await
            .expect("continue");

        let sent = client.sent();
        assert_eq!(sent[0].0, "Fetch.continueRequest");
        assert_eq!(sent[0].1["requestId"], "F1");
        assert_eq!(sent[0].1["url"], "https://redirected.test/");

        // Second resume on the same ID fails: the entry is gone.
        let err = processor
            .continue_request(ContinueRequestParams {
                request: NetworkId::new("R1"),
                url: None,
                method: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchRequest { .. }));
    }

    #[tokio::test]
    async fn test_fail_request() {
        let (processor, storage, client) = processor_with_target();
        block(&storage, Arc::clone(&client), "R1", "F1");

        processor
            .fail_request(FailRequestParams {
                request: NetworkId::new("R1"),
            })
            .await
            .expect("fail");

        let sent = client.sent();
        assert_eq!(sent[0].0, "Fetch.failRequest");
        assert_eq!(sent[0].1["errorReason"], "Failed");
    }

    #[tokio::test]
    async fn test_provide_response_defaults() {
        let (processor, storage, client) = processor_with_target();
        block(&storage, Arc::clone(&client), "R1", "F1");

        processor
            .provide_response(ProvideResponseParams {
                request: NetworkId::new("R1"),
                status_code: None,
                reason_phrase: None,
                body: None,
            })
            .await
            .expect("provide");

        let sent = client.sent();
        assert_eq!(sent[0].0, "Fetch.fulfillRequest");
        assert_eq!(sent[0].1["responseCode"], 200);
    }

    #[tokio::test]
    async fn test_provide_response_uses_paused_snapshot_status() {
        let (processor, storage, client) = processor_with_target();
        storage.add_blocked_request(
            NetworkId::new("R1"),
            BlockedRequest {
                fetch_id: FetchId::new("F1"),
                phase: InterceptPhase::ResponseStarted,
                response: json!({"status": 304}),
                client: Arc::clone(&client) as Arc<dyn CdpClient>,
            },
        );

        processor
            .provide_response(ProvideResponseParams {
                request: NetworkId::new("R1"),
                status_code: None,
                reason_phrase: None,
                body: None,
            })
            .await
            .expect("provide");

        assert_eq!(client.sent()[0].1["responseCode"], 304);
    }

    #[tokio::test]
    async fn test_continue_with_auth_requires_credentials() {
        let (processor, storage, client) = processor_with_target();
        block(&storage, Arc::clone(&client), "R1", "F1");

        let err = processor
            .continue_with_auth(ContinueWithAuthParams {
                request: NetworkId::new("R1"),
                action: ContinueWithAuthAction::ProvideCredentials,
                credentials: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        // Validation failure must not consume the blocked entry.
        assert!(storage.has_blocked_requests());

        processor
            .continue_with_auth(ContinueWithAuthParams {
                request: NetworkId::new("R1"),
                action: ContinueWithAuthAction::ProvideCredentials,
                credentials: Some(AuthCredentials {
                    username: "user".to_string(),
                    password: "pass".to_string(),
                }),
            })
            .await
            .expect("auth");

        let sent = client.sent();
        assert_eq!(sent[0].0, "Fetch.continueWithAuth");
        assert_eq!(
            sent[0].1["authChallengeResponse"]["response"],
            "ProvideCredentials"
        );
    }
}
