//! `browsingContext.*` command handlers and target/frame lifecycle
//! reactions.
//!
//! This processor is the only place targets and browsing contexts are
//! created and destroyed. Commands resolve their context through the store
//! (failing "no such frame" for unknown IDs) and delegate to the bound
//! target's session; CDP discovery/teardown events flow in independently
//! and keep the tree consistent.
//!
//! Every CDP round-trip is a suspension point: handlers re-resolve shared
//! state after awaiting instead of assuming it unchanged.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::cdp::{
    AttachedToTargetParams, CdpClient, CdpConnection, CdpTarget, DetachedFromTargetParams,
    FrameAttachedParams, FrameDetachedParams, FrameNavigatedParams, LifecycleEventParams,
    TargetInfo, TargetInfoChangedParams, TargetRegistry,
};
use crate::context::{BrowsingContext, ContextStore};
use crate::error::{Error, Result};
use crate::events::EventBroker;
use crate::identifiers::BrowsingContextId;
use crate::network::NetworkStorage;
use crate::protocol::{
    CloseParams, ContextParams, CreateParams, CreateType, EventName, GetTreeParams,
    HandleUserPromptParams, NavigateParams, PrintParams, ReloadParams, SetViewportParams,
    TraverseHistoryParams,
};
use crate::script::ScriptProcessor;

// ============================================================================
// Constants
// ============================================================================

/// Frame-detach reason for a cross-process reuse rather than destruction.
const DETACH_REASON_SWAP: &str = "swap";

// ============================================================================
// BrowsingContextProcessor
// ============================================================================

/// Owns target discovery and the `browsingContext` domain.
pub struct BrowsingContextProcessor {
    connection: Arc<dyn CdpConnection>,
    /// The mapper's own tab; never modeled as a context.
    self_target_id: BrowsingContextId,
    store: Arc<ContextStore>,
    targets: Arc<TargetRegistry>,
    network: Arc<NetworkStorage>,
    broker: Arc<EventBroker>,
    scripts: Arc<ScriptProcessor>,
}

impl BrowsingContextProcessor {
    /// Creates the processor.
    #[must_use]
    pub fn new(
        connection: Arc<dyn CdpConnection>,
        self_target_id: BrowsingContextId,
        store: Arc<ContextStore>,
        targets: Arc<TargetRegistry>,
        network: Arc<NetworkStorage>,
        broker: Arc<EventBroker>,
        scripts: Arc<ScriptProcessor>,
    ) -> Self {
        Self {
            connection,
            self_target_id,
            store,
            targets,
            network,
            broker,
            scripts,
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// `browsingContext.getTree`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchContext`] for an unknown root.
    pub fn get_tree(&self, params: GetTreeParams) -> Result<Value> {
        let roots = match params.root {
            Some(root) => vec![self.store.get(&root)?],
            None => self.store.top_level_contexts(),
        };
        let contexts: Vec<Value> = roots
            .iter()
            .map(|context| self.store.serialize(context, params.max_depth))
            .collect();
        Ok(json!({"contexts": contexts}))
    }

    /// `browsingContext.create`
    ///
    /// Opens a new target and waits for the initial `about:blank` document
    /// to finish loading before returning, so the blank page's own
    /// completion events cannot race a navigation the caller issues next.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a non-top-level reference
    /// context.
    pub async fn create(&self, params: CreateParams) -> Result<Value> {
        if let Some(reference) = &params.reference_context {
            let reference = self.store.get(reference)?;
            if !reference.is_top_level() {
                return Err(Error::invalid_argument(
                    "referenceContext should be a top-level context",
                ));
            }
        }

        let new_window = matches!(params.create_type, CreateType::Window);
        let result = self
            .connection
            .browser_client()
            .send_command(
                "Target.createTarget",
                json!({"url": "about:blank", "newWindow": new_window}),
            )
            .await?;

        let target_id: BrowsingContextId = result
            .get("targetId")
            .and_then(Value::as_str)
            .map(BrowsingContextId::new)
            .ok_or_else(|| Error::invalid_argument("Target.createTarget returned no targetId"))?;

        // The attach event that creates the context races the command
        // response; wait for whichever arrives last.
        let context = self.store.wait_for_context(&target_id).await;
        context.lifecycle_loaded().await;

        Ok(json!({"context": context.id()}))
    }

    /// `browsingContext.navigate`
    pub async fn navigate(&self, params: NavigateParams) -> Result<Value> {
        let context = self.store.get(&params.context)?;
        let client = target_client(&context)?;

        let navigation = context.on_navigation_started(Some(&params.url));
        self.broker.register_event(
            EventName::NavigationStarted,
            Some(context.id().clone()),
            json!({
                "context": context.id(),
                "navigation": navigation,
                "url": params.url,
            }),
        );

        let result = client
            .send_command("Page.navigate", json!({"url": params.url}))
            .await?;
        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            return Err(Error::UnknownError {
                message: error_text.to_string(),
                stacktrace: None,
            });
        }

        context.await_lifecycle(params.wait).await;
        Ok(json!({"navigation": navigation, "url": params.url}))
    }

    /// `browsingContext.reload`
    pub async fn reload(&self, params: ReloadParams) -> Result<Value> {
        let context = self.store.get(&params.context)?;
        let client = target_client(&context)?;

        context.on_navigation_started(None);
        client
            .send_command("Page.reload", json!({"ignoreCache": params.ignore_cache}))
            .await?;

        context.await_lifecycle(params.wait).await;
        Ok(empty_result())
    }

    /// `browsingContext.activate`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for non-top-level contexts.
    pub async fn activate(&self, params: ContextParams) -> Result<Value> {
        let context = self.store.get(&params.context)?;
        if !context.is_top_level() {
            return Err(Error::invalid_argument(
                "Activation is only supported on the top-level context",
            ));
        }
        target_client(&context)?
            .send_command("Page.bringToFront", json!({}))
            .await?;
        Ok(empty_result())
    }

    /// `browsingContext.captureScreenshot`
    pub async fn capture_screenshot(&self, params: ContextParams) -> Result<Value> {
        let context = self.store.get(&params.context)?;
        let result = target_client(&context)?
            .send_command("Page.captureScreenshot", json!({}))
            .await?;
        Ok(json!({"data": result.get("data").cloned().unwrap_or(Value::Null)}))
    }

    /// `browsingContext.print`
    pub async fn print(&self, params: PrintParams) -> Result<Value> {
        let context = self.store.get(&params.context)?;

        let mut args = Map::new();
        args.insert("printBackground".to_string(), json!(params.background));
        args.insert("landscape".to_string(), json!(params.landscape));
        if let Some(scale) = params.scale {
            args.insert("scale".to_string(), json!(scale));
        }
        if let Some(shrink) = params.shrink_to_fit {
            args.insert("preferCSSPageSize".to_string(), json!(!shrink));
        }

        let result = target_client(&context)?
            .send_command("Page.printToPDF", Value::Object(args))
            .await?;
        Ok(json!({"data": result.get("data").cloned().unwrap_or(Value::Null)}))
    }

    /// `browsingContext.setViewport`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for non-top-level contexts.
    pub async fn set_viewport(&self, params: SetViewportParams) -> Result<Value> {
        let context = self.store.get(&params.context)?;
        if !context.is_top_level() {
            return Err(Error::invalid_argument(
                "Emulating viewport is only supported on the top-level context",
            ));
        }

        let client = target_client(&context)?;
        match params.viewport {
            Some(viewport) => {
                client
                    .send_command(
                        "Emulation.setDeviceMetricsOverride",
                        json!({
                            "width": viewport.width,
                            "height": viewport.height,
                            "deviceScaleFactor": params.device_pixel_ratio.unwrap_or(0.0),
                            "mobile": false,
                        }),
                    )
                    .await?;
            }
            None => {
                client
                    .send_command("Emulation.clearDeviceMetricsOverride", json!({}))
                    .await?;
            }
        }
        Ok(empty_result())
    }

    /// `browsingContext.traverseHistory`
    pub async fn traverse_history(&self, params: TraverseHistoryParams) -> Result<Value> {
        let context = self.store.get(&params.context)?;
        let client = target_client(&context)?;

        let history = client
            .send_command("Page.getNavigationHistory", json!({}))
            .await?;
        let current = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let entries = history
            .get("entries")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let index = current + i64::from(params.delta);
        let entry_id = usize::try_from(index)
            .ok()
            .and_then(|index| entries.get(index))
            .and_then(|entry| entry.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::invalid_argument("No history entry at delta"))?;

        client
            .send_command("Page.navigateToHistoryEntry", json!({"entryId": entry_id}))
            .await?;
        Ok(empty_result())
    }

    /// `browsingContext.handleUserPrompt`
    pub async fn handle_user_prompt(&self, params: HandleUserPromptParams) -> Result<Value> {
        let context = self.store.get(&params.context)?;

        let mut args = Map::new();
        args.insert("accept".to_string(), json!(params.accept.unwrap_or(true)));
        if let Some(text) = params.user_text {
            args.insert("promptText".to_string(), json!(text));
        }

        target_client(&context)?
            .send_command("Page.handleJavaScriptDialog", Value::Object(args))
            .await?;
        Ok(empty_result())
    }

    /// `browsingContext.close`
    ///
    /// Races the close round-trip against the detach-derived close signal
    /// and resolves only once both completed, in either order. The one
    /// benign race swallowed here is a close reaching a page already
    /// destroyed mid-navigation; everything else propagates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for non-top-level contexts.
    pub async fn close(&self, params: CloseParams) -> Result<Value> {
        let context = self.store.get(&params.context)?;
        if !context.is_top_level() {
            return Err(Error::invalid_argument(format!(
                "Non top-level browsing context {} cannot be closed",
                context.id()
            )));
        }

        // Created before issuing the close so neither ordering of command
        // completion vs. detach can be missed.
        let closed = {
            let context = Arc::clone(&context);
            async move { context.wait_closed().await }
        };

        let request: Result<()> = if params.prompt_unload {
            // Page.close runs the unload handlers and may prompt.
            match target_client(&context) {
                Ok(client) => client
                    .send_command("Page.close", json!({}))
                    .await
                    .map(|_| ())
                    .map_err(Error::from),
                Err(error) => Err(error),
            }
        } else {
            self.connection
                .browser_client()
                .send_command("Target.closeTarget", json!({"targetId": params.context}))
                .await
                .map(|_| ())
                .map_err(Error::from)
        };

        match request {
            Ok(()) => {
                closed.await;
            }
            Err(Error::Cdp(error)) if error.is_not_attached() => {
                // Page destroyed mid-navigation (e.g. a fatal certificate
                // error); the close already happened.
                debug!(context = %params.context, "Close raced page destruction");
            }
            Err(error) => return Err(error),
        }

        Ok(empty_result())
    }

    // ========================================================================
    // CDP Reactions
    // ========================================================================

    /// Reacts to `Target.attachedToTarget`.
    ///
    /// Unsupported targets are released without being modeled. For
    /// supported ones, an existing context is rebound (OOPiF swap) or a
    /// fresh context is created — nested when the reported opener frame is
    /// already tracked, top-level otherwise.
    ///
    /// Returns the new target binding for supported targets.
    pub async fn handle_attached_to_target(
        &self,
        params: AttachedToTargetParams,
    ) -> Option<Arc<CdpTarget>> {
        let AttachedToTargetParams {
            session_id,
            target_info,
        } = params;

        let Some(client) = self.connection.client(&session_id) else {
            warn!(session = %session_id, "Attach for unknown session");
            return None;
        };

        if !self.is_valid_target(&target_info) {
            self.release_target(&session_id, client).await;
            return None;
        }

        debug!(
            target_id = %target_info.target_id,
            session = %session_id,
            kind = %target_info.kind,
            "Target attached"
        );

        let target = CdpTarget::new(target_info.target_id.clone(), session_id, client);
        self.targets.insert(Arc::clone(&target));
        self.configure_target(&target).await;
        self.scripts.install_on_new_target(&target).await;

        // Re-resolve after the configuration round-trips.
        if let Some(existing) = self.store.find(&target_info.target_id) {
            // OOPiF swap: the context survives, only the binding moves.
            existing.set_target(Arc::clone(&target));
            return Some(target);
        }

        let parent = target_info
            .opener_frame_id
            .filter(|opener| self.store.has_context(opener));
        let context = BrowsingContext::new(
            target_info.target_id,
            parent.clone(),
            Some(Arc::clone(&target)),
            target_info.url,
        );
        if let Some(parent_id) = &parent
            && let Some(parent_context) = self.store.find(parent_id)
        {
            parent_context.add_child(context.id().clone());
        }
        self.store.insert(Arc::clone(&context));
        self.emit_context_created(&context);

        Some(target)
    }

    /// Reacts to `Target.detachedFromTarget`: disposes the matching
    /// context tree. Idempotent.
    pub fn handle_detached_from_target(&self, params: &DetachedFromTargetParams) {
        let context_id = match &params.target_id {
            Some(target_id) => target_id.clone(),
            None => match self.targets.get(&params.session_id) {
                Some(target) => target.target_id().clone(),
                None => return,
            },
        };
        self.targets.remove(&params.session_id);
        self.dispose_context(&context_id);
    }

    /// Reacts to `Target.targetInfoChanged`: descriptive metadata only.
    pub fn handle_target_info_changed(&self, params: &TargetInfoChangedParams) {
        if let Some(context) = self.store.find(&params.target_info.target_id) {
            context.set_url(&params.target_info.url);
        }
    }

    /// Reacts to `Page.frameAttached`: creates a nested context under a
    /// known parent; unknown parents (not yet tracked cross-process) are
    /// ignored.
    pub fn handle_frame_attached(&self, params: &FrameAttachedParams) {
        let Some(parent) = self.store.find(&params.parent_frame_id) else {
            return;
        };

        let context = BrowsingContext::new(
            params.frame_id.clone(),
            Some(params.parent_frame_id.clone()),
            parent.target(),
            String::new(),
        );
        parent.add_child(context.id().clone());
        self.store.insert(Arc::clone(&context));
        self.emit_context_created(&context);
    }

    /// Reacts to `Page.frameDetached`: disposes the context unless the
    /// frame is being swapped cross-process.
    pub fn handle_frame_detached(&self, params: &FrameDetachedParams) {
        if params.reason == DETACH_REASON_SWAP {
            return;
        }
        self.dispose_context(&params.frame_id);
    }

    /// Reacts to `Page.frameNavigated`: updates the context URL.
    pub fn handle_frame_navigated(&self, params: &FrameNavigatedParams) {
        if let Some(context) = self.store.find(&params.frame.id) {
            context.set_url(&params.frame.url);
        }
    }

    /// Reacts to `Page.lifecycleEvent`: advances the context lifecycle
    /// and emits the matching BiDi events.
    pub fn handle_lifecycle_event(&self, params: &LifecycleEventParams) {
        let Some(context) = self.store.find(&params.frame_id) else {
            return;
        };

        match params.name.as_str() {
            "init" => {
                context.on_navigation_started(None);
            }
            "DOMContentLoaded" => {
                context.on_dom_content_loaded();
                self.emit_lifecycle(&context, EventName::DomContentLoaded);
            }
            "load" => {
                context.on_load();
                self.emit_lifecycle(&context, EventName::Load);
            }
            _ => {}
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn is_valid_target(&self, target: &TargetInfo) -> bool {
        if target.target_id == self.self_target_id {
            return false;
        }
        matches!(target.kind.as_str(), "page" | "iframe")
    }

    /// Releases a target the mapper does not model: unblock it, then
    /// detach from it.
    async fn release_target(&self, session_id: &crate::identifiers::CdpSessionId, client: Arc<dyn CdpClient>) {
        let result: Result<()> = async {
            client
                .send_command("Runtime.runIfWaitingForDebugger", json!({}))
                .await?;
            self.connection
                .browser_client()
                .send_command("Target.detachFromTarget", json!({"sessionId": session_id}))
                .await?;
            Ok(())
        }
        .await;
        if let Err(error) = result {
            debug!(session = %session_id, %error, "Releasing unsupported target failed");
        }
    }

    /// Enables the domains the mapper consumes on a fresh target and lets
    /// it run.
    async fn configure_target(&self, target: &Arc<CdpTarget>) {
        let client = target.client();
        let mut setup: Vec<(&str, Value)> = vec![
            ("Page.enable", json!({})),
            (
                "Page.setLifecycleEventsEnabled",
                json!({"enabled": true}),
            ),
            ("Network.enable", json!({})),
            ("Runtime.enable", json!({})),
            (
                "Target.setAutoAttach",
                json!({"autoAttach": true, "waitForDebuggerOnStart": true, "flatten": true}),
            ),
        ];
        if self.network.has_intercepts() {
            setup.push(("Fetch.enable", self.network.fetch_enable_params()));
        }
        setup.push(("Runtime.runIfWaitingForDebugger", json!({})));

        for (method, params) in setup {
            if let Err(error) = client.send_command(method, params).await {
                warn!(target_id = %target.target_id(), method, %error, "Target setup command failed");
            }
        }
    }

    /// Disposes a context and its subtree; cascades to context-scoped
    /// registrations. Idempotent.
    fn dispose_context(&self, id: &BrowsingContextId) {
        let Some(context) = self.store.remove(id) else {
            return;
        };

        for child in context.children() {
            self.dispose_context(&child);
        }
        if let Some(parent_id) = context.parent()
            && let Some(parent) = self.store.find(parent_id)
        {
            parent.remove_child(id);
        }

        self.scripts.dispose_for_context(id);
        context.mark_closed();
        self.broker.register_event(
            EventName::ContextDestroyed,
            Some(id.clone()),
            self.store.serialize(&context, Some(0)),
        );
        debug!(context = %id, "Context disposed");
    }

    fn emit_context_created(&self, context: &Arc<BrowsingContext>) {
        self.broker.register_event(
            EventName::ContextCreated,
            Some(context.id().clone()),
            self.store.serialize(context, Some(0)),
        );
    }

    fn emit_lifecycle(&self, context: &Arc<BrowsingContext>, name: EventName) {
        self.broker.register_event(
            name,
            Some(context.id().clone()),
            json!({
                "context": context.id(),
                "navigation": context.navigation_id(),
                "url": context.url(),
            }),
        );
    }
}

/// Resolves the command client of a context's bound target.
fn target_client(context: &BrowsingContext) -> Result<Arc<dyn CdpClient>> {
    context
        .target()
        .map(|target| target.client())
        .ok_or_else(|| Error::UnknownError {
            message: format!("Context {} has no bound target", context.id()),
            stacktrace: None,
        })
}

/// The empty `{}` result.
fn empty_result() -> Value {
    Value::Object(Map::new())
}

// ============================================================================
// Tests
// ============================================================================
