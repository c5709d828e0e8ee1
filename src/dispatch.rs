//! Command dispatch and response correlation.
//!
//! [`CommandDispatcher::process_command`] is the single entry point for
//! incoming commands: parse, route to the owning domain handler, and emit
//! exactly one response envelope correlated to the command's id — a success
//! for an `Ok`, a typed error response for a protocol failure, and a generic
//! "unknown error" response (original shape never reflected, message kept)
//! for anything unexpected. A command failure never takes the process down.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{error, warn};

use crate::cdp::CdpConnection;
use crate::context::{BrowsingContextProcessor, ContextStore};
use crate::error::{Error, Result};
use crate::events::{EventBroker, OutboundQueue};
use crate::network::NetworkProcessor;
use crate::protocol::{
    BrowserCommand, BrowsingContextCommand, CdpCommand, Command, CommandEnvelope, NetworkCommand,
    OutgoingMessage, ScriptCommand, SessionCommand,
};
use crate::script::ScriptProcessor;

// ============================================================================
// CommandDispatcher
// ============================================================================

/// Routes commands to domain handlers and correlates responses.
pub struct CommandDispatcher {
    connection: Arc<dyn CdpConnection>,
    store: Arc<ContextStore>,
    broker: Arc<EventBroker>,
    contexts: Arc<BrowsingContextProcessor>,
    network: Arc<NetworkProcessor>,
    scripts: Arc<ScriptProcessor>,
    outbound: OutboundQueue,
}

impl CommandDispatcher {
    /// Creates the dispatcher.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection: Arc<dyn CdpConnection>,
        store: Arc<ContextStore>,
        broker: Arc<EventBroker>,
        contexts: Arc<BrowsingContextProcessor>,
        network: Arc<NetworkProcessor>,
        scripts: Arc<ScriptProcessor>,
        outbound: OutboundQueue,
    ) -> Self {
        Self {
            connection,
            store,
            broker,
            contexts,
            network,
            scripts,
            outbound,
        }
    }

    /// Processes one command envelope, emitting exactly one response.
    ///
    /// Handlers may cause later, asynchronous event emissions; those are
    /// never bundled with the response.
    pub async fn process_command(&self, envelope: CommandEnvelope) {
        let CommandEnvelope {
            id,
            method,
            params,
            channel,
        } = envelope;

        let result = self.handle(&method, params, &channel).await;
        let message = match result {
            Ok(value) => OutgoingMessage::success(id, value, channel),
            Err(err) if err.is_protocol_error() => {
                OutgoingMessage::error(&err, Some(id), channel)
            }
            Err(err) => {
                error!(method, %err, "Command failed unexpectedly");
                OutgoingMessage::error(&err.into_unknown(), Some(id), channel)
            }
        };

        if self.outbound.send_message(message).is_err() {
            warn!(method, id, "Response dropped: outgoing sink closed");
        }
    }

    /// Parses and routes a command to its handler.
    async fn handle(
        &self,
        method: &str,
        params: Value,
        channel: &Option<String>,
    ) -> Result<Value> {
        match Command::parse(method, params)? {
            // Session domain
            Command::Session(command) => match command {
                SessionCommand::Status => {
                    Ok(json!({"ready": false, "message": "already connected"}))
                }
                SessionCommand::Subscribe(params) => {
                    self.broker.subscribe(
                        &params.events,
                        &params.contexts.unwrap_or_default(),
                        channel,
                    )?;
                    Ok(empty_result())
                }
                SessionCommand::Unsubscribe(params) => {
                    self.broker.unsubscribe(
                        &params.events,
                        &params.contexts.unwrap_or_default(),
                        channel,
                    )?;
                    Ok(empty_result())
                }
            },

            // Browser domain
            Command::Browser(BrowserCommand::Close) => {
                self.connection
                    .browser_client()
                    .send_command("Browser.close", json!({}))
                    .await?;
                Ok(empty_result())
            }

            // Browsing Context domain
            Command::BrowsingContext(command) => match command {
                BrowsingContextCommand::Activate(params) => self.contexts.activate(params).await,
                BrowsingContextCommand::CaptureScreenshot(params) => {
                    self.contexts.capture_screenshot(params).await
                }
                BrowsingContextCommand::Close(params) => self.contexts.close(params).await,
                BrowsingContextCommand::Create(params) => self.contexts.create(params).await,
                BrowsingContextCommand::GetTree(params) => self.contexts.get_tree(params),
                BrowsingContextCommand::HandleUserPrompt(params) => {
                    self.contexts.handle_user_prompt(params).await
                }
                BrowsingContextCommand::Navigate(params) => self.contexts.navigate(params).await,
                BrowsingContextCommand::Print(params) => self.contexts.print(params).await,
                BrowsingContextCommand::Reload(params) => self.contexts.reload(params).await,
                BrowsingContextCommand::SetViewport(params) => {
                    self.contexts.set_viewport(params).await
                }
                BrowsingContextCommand::TraverseHistory(params) => {
                    self.contexts.traverse_history(params).await
                }
            },

            // Network domain
            Command::Network(command) => match command {
                NetworkCommand::AddIntercept(params) => self.network.add_intercept(params).await,
                NetworkCommand::ContinueRequest(params) => {
                    self.network.continue_request(params).await
                }
                NetworkCommand::ContinueResponse(params) => {
                    self.network.continue_response(params).await
                }
                NetworkCommand::ContinueWithAuth(params) => {
                    self.network.continue_with_auth(params).await
                }
                NetworkCommand::FailRequest(params) => self.network.fail_request(params).await,
                NetworkCommand::ProvideResponse(params) => {
                    self.network.provide_response(params).await
                }
                NetworkCommand::RemoveIntercept(params) => {
                    self.network.remove_intercept(params).await
                }
            },

            // Script domain
            Command::Script(command) => match command {
                ScriptCommand::AddPreloadScript(params) => {
                    self.scripts.add_preload_script(params).await
                }
                ScriptCommand::RemovePreloadScript(params) => {
                    self.scripts.remove_preload_script(params).await
                }
            },

            // CDP domain
            Command::Cdp(command) => match command {
                CdpCommand::GetSession(params) => {
                    let context = self.store.get(&params.context)?;
                    let session = context.target().map(|target| target.session_id().clone());
                    Ok(json!({"session": session}))
                }
                CdpCommand::SendCommand(params) => {
                    let client = match &params.session {
                        Some(session) => self.connection.client(session).ok_or_else(|| {
                            Error::invalid_argument(format!("Unknown session '{session}'"))
                        })?,
                        None => self.connection.browser_client(),
                    };
                    let result = client.send_command(&params.method, params.params).await?;
                    Ok(json!({"result": result}))
                }
            },
        }
    }
}

/// The empty `{}` result.
fn empty_result() -> Value {
    Value::Object(Map::new())
}

// ============================================================================
// Tests
// ============================================================================
