//! BiDi wire protocol types.
//!
//! Incoming [`CommandEnvelope`]s are parsed into the closed [`Command`]
//! union; everything flowing out is an [`OutgoingMessage`]. Event kinds live
//! in [`EventName`].

mod command;
mod events;
mod message;

pub use command::{
    AddInterceptParams, AddPreloadScriptParams, AuthCredentials, BrowserCommand,
    BrowsingContextCommand, CdpCommand, CdpSendCommandParams, CloseParams, Command,
    CommandEnvelope, ContextParams, ContinueRequestParams, ContinueResponseParams,
    ContinueWithAuthAction, ContinueWithAuthParams, CreateParams, CreateType, FailRequestParams,
    GetTreeParams, HandleUserPromptParams, InterceptPhase, NavigateParams, NetworkCommand,
    PrintParams,
    ProvideResponseParams, ReadinessState, ReloadParams, RemoveInterceptParams,
    RemovePreloadScriptParams, ScriptCommand, SessionCommand, SetViewportParams,
    SubscriptionRequestParams, TraverseHistoryParams, UrlPattern, Viewport,
};
pub use events::{EventEnvelope, EventName};
pub use message::OutgoingMessage;
