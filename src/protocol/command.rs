//! Command envelope and typed command definitions.
//!
//! Commands follow the `module.methodName` format. [`Command::parse`] is the
//! dispatch registry: the method string is matched against the closed set of
//! known methods first — an unrecognized method fails with "unknown command",
//! a recognized-but-unimplemented one with "unsupported operation" — and only
//! then are the parameters deserialized, so malformed parameters fail with
//! "invalid argument".
//!
//! # Command Modules
//!
//! | Module | Commands |
//! |--------|----------|
//! | `session` | status, subscribe, unsubscribe |
//! | `browser` | close |
//! | `browsingContext` | tree, lifecycle, navigation, viewport, prompts |
//! | `network` | intercepts, blocked-request resumption |
//! | `script` | preload scripts |
//! | `cdp` | raw CDP escape hatch |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{
    BrowsingContextId, CdpSessionId, InterceptId, NetworkId, PreloadScriptId,
};

// ============================================================================
// CommandEnvelope
// ============================================================================

/// An incoming command envelope.
///
/// # Format
///
/// ```json
/// {
///   "id": 7,
///   "method": "browsingContext.navigate",
///   "params": { ... },
///   "channel": "client-1"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    /// Identifier for response correlation.
    pub id: u64,

    /// Command method in `module.methodName` format.
    pub method: String,

    /// Raw command parameters.
    #[serde(default)]
    pub params: Value,

    /// Delivery channel the response is tagged with.
    #[serde(default)]
    pub channel: Option<String>,
}

// ============================================================================
// Shared Parameter Types
// ============================================================================

/// Navigation readiness to await before a navigate/reload resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    /// Resolve as soon as the navigation is issued.
    #[default]
    None,
    /// Resolve once DOMContentLoaded fired.
    Interactive,
    /// Resolve once the load event fired.
    Complete,
}

/// Kind of top-level context to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateType {
    /// A tab in an existing window.
    Tab,
    /// A fresh window.
    Window,
}

/// Phase of a request's lifecycle at which interception occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterceptPhase {
    /// Pause before the request leaves.
    BeforeRequestSent,
    /// Pause once response headers arrived.
    ResponseStarted,
    /// Pause on an authentication challenge.
    AuthRequired,
}

/// A URL pattern of an intercept registration.
///
/// String patterns match by exact equality; structured patterns match
/// per-field with absent fields acting as wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UrlPattern {
    /// Exact URL string.
    String {
        /// The URL to match.
        pattern: String,
    },
    /// Structured per-field pattern.
    Pattern {
        /// URL scheme, with or without the trailing `:`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
        /// Host name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hostname: Option<String>,
        /// Port, as a string.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<String>,
        /// Path, with or without the leading `/`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pathname: Option<String>,
        /// Query string, with or without the leading `?`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search: Option<String>,
    },
}

/// Action of `network.continueWithAuth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContinueWithAuthAction {
    /// Let the browser decide.
    Default,
    /// Cancel the challenge.
    Cancel,
    /// Answer with the supplied credentials.
    ProvideCredentials,
}

/// Credentials for `network.continueWithAuth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCredentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Viewport dimensions for `browsingContext.setViewport`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in CSS pixels.
    pub width: u32,
    /// Height in CSS pixels.
    pub height: u32,
}

// ============================================================================
// Parameter Structs
// ============================================================================

/// `browsingContext.getTree` parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTreeParams {
    /// Root of the subtree to serialize; absent means all top-level contexts.
    #[serde(default)]
    pub root: Option<BrowsingContextId>,
    /// Serialization depth; absent means unbounded.
    #[serde(default)]
    pub max_depth: Option<u32>,
}

/// `browsingContext.create` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParams {
    /// Tab or window.
    #[serde(rename = "type")]
    pub create_type: CreateType,
    /// Context the new one is created in relation to; must be top-level.
    #[serde(default)]
    pub reference_context: Option<BrowsingContextId>,
}

/// `browsingContext.navigate` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateParams {
    /// Context to navigate.
    pub context: BrowsingContextId,
    /// Destination URL.
    pub url: String,
    /// Readiness to await.
    #[serde(default)]
    pub wait: ReadinessState,
}

/// `browsingContext.reload` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadParams {
    /// Context to reload.
    pub context: BrowsingContextId,
    /// Bypass the cache.
    #[serde(default)]
    pub ignore_cache: bool,
    /// Readiness to await.
    #[serde(default)]
    pub wait: ReadinessState,
}

/// Parameters carrying only a context ID
/// (`activate`, `captureScreenshot`, `cdp.getSession`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextParams {
    /// Target context.
    pub context: BrowsingContextId,
}

/// `browsingContext.print` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintParams {
    /// Context to print.
    pub context: BrowsingContextId,
    /// Print background graphics.
    #[serde(default)]
    pub background: bool,
    /// Landscape orientation.
    #[serde(default)]
    pub landscape: bool,
    /// Page scale factor.
    #[serde(default)]
    pub scale: Option<f64>,
    /// Shrink content to fit the page.
    #[serde(default)]
    pub shrink_to_fit: Option<bool>,
}

/// `browsingContext.setViewport` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetViewportParams {
    /// Context to emulate on; must be top-level.
    pub context: BrowsingContextId,
    /// New dimensions; absent clears the override.
    #[serde(default)]
    pub viewport: Option<Viewport>,
    /// Device pixel ratio override.
    #[serde(default)]
    pub device_pixel_ratio: Option<f64>,
}

/// `browsingContext.traverseHistory` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraverseHistoryParams {
    /// Context whose history to traverse.
    pub context: BrowsingContextId,
    /// Steps to move; negative is back.
    pub delta: i32,
}

/// `browsingContext.handleUserPrompt` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleUserPromptParams {
    /// Context showing the prompt.
    pub context: BrowsingContextId,
    /// Accept or dismiss; defaults to accept.
    #[serde(default)]
    pub accept: Option<bool>,
    /// Text to answer a prompt dialog with.
    #[serde(default)]
    pub user_text: Option<String>,
}

/// `browsingContext.close` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseParams {
    /// Context to close; must be top-level.
    pub context: BrowsingContextId,
    /// Allow beforeunload prompts instead of force-closing.
    #[serde(default)]
    pub prompt_unload: bool,
}

/// `session.subscribe` / `session.unsubscribe` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequestParams {
    /// Event kind names.
    pub events: Vec<String>,
    /// Contexts to scope to; absent or empty means global.
    #[serde(default)]
    pub contexts: Option<Vec<BrowsingContextId>>,
}

/// `network.addIntercept` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddInterceptParams {
    /// Phases the intercept applies to.
    pub phases: Vec<InterceptPhase>,
    /// URL patterns; absent or empty matches every URL.
    #[serde(default)]
    pub url_patterns: Option<Vec<UrlPattern>>,
}

/// `network.removeIntercept` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveInterceptParams {
    /// Registration to remove.
    pub intercept: InterceptId,
}

/// `network.continueRequest` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueRequestParams {
    /// Blocked request to resume.
    pub request: NetworkId,
    /// Overridden URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Overridden method.
    #[serde(default)]
    pub method: Option<String>,
}

/// `network.continueResponse` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponseParams {
    /// Blocked request to resume.
    pub request: NetworkId,
}

/// `network.continueWithAuth` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueWithAuthParams {
    /// Blocked request to resume.
    pub request: NetworkId,
    /// How to answer the challenge.
    pub action: ContinueWithAuthAction,
    /// Credentials, required for `provideCredentials`.
    #[serde(default)]
    pub credentials: Option<AuthCredentials>,
}

/// `network.failRequest` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailRequestParams {
    /// Blocked request to fail.
    pub request: NetworkId,
}

/// `network.provideResponse` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvideResponseParams {
    /// Blocked request to answer.
    pub request: NetworkId,
    /// Status code of the fabricated response.
    #[serde(default)]
    pub status_code: Option<i64>,
    /// Reason phrase of the fabricated response.
    #[serde(default)]
    pub reason_phrase: Option<String>,
    /// Base64-encoded body.
    #[serde(default)]
    pub body: Option<String>,
}

/// `script.addPreloadScript` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPreloadScriptParams {
    /// Function to evaluate on every new document.
    pub function_declaration: String,
    /// Context to scope the script to; absent means every context.
    #[serde(default)]
    pub context: Option<BrowsingContextId>,
}

/// `script.removePreloadScript` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovePreloadScriptParams {
    /// Registration to remove.
    pub script: PreloadScriptId,
}

/// `cdp.sendCommand` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpSendCommandParams {
    /// Raw CDP method.
    pub method: String,
    /// Raw CDP parameters.
    #[serde(default)]
    pub params: Value,
    /// Session to send on; absent means the browser-level session.
    #[serde(default)]
    pub session: Option<CdpSessionId>,
}

// ============================================================================
// Command Union
// ============================================================================

/// Session module commands.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// `session.status`
    Status,
    /// `session.subscribe`
    Subscribe(SubscriptionRequestParams),
    /// `session.unsubscribe`
    Unsubscribe(SubscriptionRequestParams),
}

/// Browser module commands.
#[derive(Debug, Clone)]
pub enum BrowserCommand {
    /// `browser.close`
    Close,
}

/// BrowsingContext module commands.
#[derive(Debug, Clone)]
pub enum BrowsingContextCommand {
    /// `browsingContext.activate`
    Activate(ContextParams),
    /// `browsingContext.captureScreenshot`
    CaptureScreenshot(ContextParams),
    /// `browsingContext.close`
    Close(CloseParams),
    /// `browsingContext.create`
    Create(CreateParams),
    /// `browsingContext.getTree`
    GetTree(GetTreeParams),
    /// `browsingContext.handleUserPrompt`
    HandleUserPrompt(HandleUserPromptParams),
    /// `browsingContext.navigate`
    Navigate(NavigateParams),
    /// `browsingContext.print`
    Print(PrintParams),
    /// `browsingContext.reload`
    Reload(ReloadParams),
    /// `browsingContext.setViewport`
    SetViewport(SetViewportParams),
    /// `browsingContext.traverseHistory`
    TraverseHistory(TraverseHistoryParams),
}

/// Network module commands.
#[derive(Debug, Clone)]
pub enum NetworkCommand {
    /// `network.addIntercept`
    AddIntercept(AddInterceptParams),
    /// `network.continueRequest`
    ContinueRequest(ContinueRequestParams),
    /// `network.continueResponse`
    ContinueResponse(ContinueResponseParams),
    /// `network.continueWithAuth`
    ContinueWithAuth(ContinueWithAuthParams),
    /// `network.failRequest`
    FailRequest(FailRequestParams),
    /// `network.provideResponse`
    ProvideResponse(ProvideResponseParams),
    /// `network.removeIntercept`
    RemoveIntercept(RemoveInterceptParams),
}

/// Script module commands.
#[derive(Debug, Clone)]
pub enum ScriptCommand {
    /// `script.addPreloadScript`
    AddPreloadScript(AddPreloadScriptParams),
    /// `script.removePreloadScript`
    RemovePreloadScript(RemovePreloadScriptParams),
}

/// CDP module commands.
#[derive(Debug, Clone)]
pub enum CdpCommand {
    /// `cdp.getSession`
    GetSession(ContextParams),
    /// `cdp.sendCommand`
    SendCommand(CdpSendCommandParams),
}

/// All protocol commands organized by module.
#[derive(Debug, Clone)]
pub enum Command {
    /// Session module commands.
    Session(SessionCommand),
    /// Browser module commands.
    Browser(BrowserCommand),
    /// BrowsingContext module commands.
    BrowsingContext(BrowsingContextCommand),
    /// Network module commands.
    Network(NetworkCommand),
    /// Script module commands.
    Script(ScriptCommand),
    /// CDP module commands.
    Cdp(CdpCommand),
}

/// Methods that are part of the protocol but not implemented by this
/// mapper. They fail with "unsupported operation" rather than
/// "unknown command".
const UNSUPPORTED_METHODS: &[&str] = &[
    "session.end",
    "session.new",
    "browsingContext.locateNodes",
    "script.callFunction",
    "script.disown",
    "script.evaluate",
    "script.getRealms",
    "input.performActions",
    "input.releaseActions",
    "storage.deleteCookies",
    "storage.getCookies",
    "storage.setCookie",
];

impl Command {
    /// Parses a method name and raw parameters into a typed command.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownCommand`] for methods outside the protocol
    /// - [`Error::UnsupportedOperation`] for known-but-unimplemented methods
    /// - [`Error::InvalidArgument`] when parameters fail validation
    pub fn parse(method: &str, params: Value) -> Result<Self> {
        fn typed<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
            // An omitted params field means "no parameters", not null.
            let params = if params.is_null() {
                Value::Object(serde_json::Map::new())
            } else {
                params
            };
            serde_json::from_value(params).map_err(|e| Error::invalid_argument(e.to_string()))
        }

        let command = match method {
            "session.status" => Self::Session(SessionCommand::Status),
            "session.subscribe" => Self::Session(SessionCommand::Subscribe(typed(params)?)),
            "session.unsubscribe" => Self::Session(SessionCommand::Unsubscribe(typed(params)?)),

            "browser.close" => Self::Browser(BrowserCommand::Close),

            "browsingContext.activate" => {
                Self::BrowsingContext(BrowsingContextCommand::Activate(typed(params)?))
            }
            "browsingContext.captureScreenshot" => {
                Self::BrowsingContext(BrowsingContextCommand::CaptureScreenshot(typed(params)?))
            }
            "browsingContext.close" => {
                Self::BrowsingContext(BrowsingContextCommand::Close(typed(params)?))
            }
            "browsingContext.create" => {
                Self::BrowsingContext(BrowsingContextCommand::Create(typed(params)?))
            }
            "browsingContext.getTree" => {
                Self::BrowsingContext(BrowsingContextCommand::GetTree(typed(params)?))
            }
            "browsingContext.handleUserPrompt" => {
                Self::BrowsingContext(BrowsingContextCommand::HandleUserPrompt(typed(params)?))
            }
            "browsingContext.navigate" => {
                Self::BrowsingContext(BrowsingContextCommand::Navigate(typed(params)?))
            }
            "browsingContext.print" => {
                Self::BrowsingContext(BrowsingContextCommand::Print(typed(params)?))
            }
            "browsingContext.reload" => {
                Self::BrowsingContext(BrowsingContextCommand::Reload(typed(params)?))
            }
            "browsingContext.setViewport" => {
                Self::BrowsingContext(BrowsingContextCommand::SetViewport(typed(params)?))
            }
            "browsingContext.traverseHistory" => {
                Self::BrowsingContext(BrowsingContextCommand::TraverseHistory(typed(params)?))
            }

            "network.addIntercept" => Self::Network(NetworkCommand::AddIntercept(typed(params)?)),
            "network.continueRequest" => {
                Self::Network(NetworkCommand::ContinueRequest(typed(params)?))
            }
            "network.continueResponse" => {
                Self::Network(NetworkCommand::ContinueResponse(typed(params)?))
            }
            "network.continueWithAuth" => {
                Self::Network(NetworkCommand::ContinueWithAuth(typed(params)?))
            }
            "network.failRequest" => Self::Network(NetworkCommand::FailRequest(typed(params)?)),
            "network.provideResponse" => {
                Self::Network(NetworkCommand::ProvideResponse(typed(params)?))
            }
            "network.removeIntercept" => {
                Self::Network(NetworkCommand::RemoveIntercept(typed(params)?))
            }

            "script.addPreloadScript" => {
                Self::Script(ScriptCommand::AddPreloadScript(typed(params)?))
            }
            "script.removePreloadScript" => {
                Self::Script(ScriptCommand::RemovePreloadScript(typed(params)?))
            }

            "cdp.getSession" => Self::Cdp(CdpCommand::GetSession(typed(params)?)),
            "cdp.sendCommand" => Self::Cdp(CdpCommand::SendCommand(typed(params)?)),

            _ if UNSUPPORTED_METHODS.contains(&method) => {
                return Err(Error::unsupported_operation(method));
            }
            _ => return Err(Error::unknown_command(method)),
        };

        Ok(command)
    }
}

// ============================================================================
// Tests
// ============================================================================
