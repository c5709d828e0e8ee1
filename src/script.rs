//! Preload script registrations.
//!
//! Preload scripts are the crate's context-scoped registrations: an entry
//! scoped to a browsing context is disposed together with that context.
//! Installation goes through `Page.addScriptToEvaluateOnNewDocument`; the
//! per-target CDP identifiers are kept so removal can unregister the script
//! from every session it was installed on.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::cdp::{CdpTarget, TargetRegistry};
use crate::context::ContextStore;
use crate::error::{Error, Result};
use crate::identifiers::{BrowsingContextId, CdpSessionId, PreloadScriptId};
use crate::protocol::{AddPreloadScriptParams, RemovePreloadScriptParams};

// ============================================================================
// PreloadScript
// ============================================================================

/// One preload script registration.
struct PreloadScript {
    id: PreloadScriptId,
    /// Scope; `None` applies to every context, present and future.
    context: Option<BrowsingContextId>,
    /// Source evaluated on every new document.
    source: String,
    /// CDP identifiers per session the script was installed on.
    cdp_ids: Vec<(CdpSessionId, String)>,
}

// ============================================================================
// ScriptProcessor
// ============================================================================

/// Preload script registry and `script.*` command handlers.
pub struct ScriptProcessor {
    scripts: Mutex<Vec<PreloadScript>>,
    contexts: Arc<ContextStore>,
    targets: Arc<TargetRegistry>,
}

impl ScriptProcessor {
    /// Creates the processor.
    #[must_use]
    pub fn new(contexts: Arc<ContextStore>, targets: Arc<TargetRegistry>) -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            contexts,
            targets,
        }
    }

    /// `script.addPreloadScript`
    ///
    /// Installs the script on the scoped context's target, or on every
    /// live target for a global registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchContext`] for an unknown scope context.
    pub async fn add_preload_script(&self, params: AddPreloadScriptParams) -> Result<Value> {
        let source = wrap_function(&params.function_declaration);

        let targets: Vec<Arc<CdpTarget>> = match &params.context {
            Some(context_id) => {
                let context = self.contexts.get(context_id)?;
                context.target().into_iter().collect()
            }
            None => self.targets.all(),
        };

        let mut cdp_ids = Vec::with_capacity(targets.len());
        for target in targets {
            let result = target
                .client()
                .send_command(
                    "Page.addScriptToEvaluateOnNewDocument",
                    json!({"source": source}),
                )
                .await?;
            if let Some(identifier) = result.get("identifier").and_then(Value::as_str) {
                cdp_ids.push((target.session_id().clone(), identifier.to_string()));
            }
        }

        let id = PreloadScriptId::generate();
        debug!(script = %id, scoped = params.context.is_some(), "Preload script added");
        self.scripts.lock().push(PreloadScript {
            id: id.clone(),
            context: params.context,
            source,
            cdp_ids,
        });

        Ok(json!({"script": id}))
    }

    /// `script.removePreloadScript`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchScript`] for unknown IDs.
    pub async fn remove_preload_script(&self, params: RemovePreloadScriptParams) -> Result<Value> {
        let script = {
            let mut scripts = self.scripts.lock();
            let index = scripts
                .iter()
                .position(|script| script.id == params.script)
                .ok_or_else(|| Error::no_such_script(params.script.clone()))?;
            scripts.remove(index)
        };

        for (session, identifier) in script.cdp_ids {
            let Some(target) = self.targets.get(&session) else {
                continue;
            };
            let result = target
                .client()
                .send_command(
                    "Page.removeScriptToEvaluateOnNewDocument",
                    json!({"identifier": identifier}),
                )
                .await;
            if let Err(error) = result {
                warn!(%session, %error, "Unregistering preload script failed");
            }
        }

        Ok(Value::Object(Map::new()))
    }

    /// Installs global registrations on a freshly attached target.
    pub async fn install_on_new_target(&self, target: &Arc<CdpTarget>) {
        let global_sources: Vec<(PreloadScriptId, String)> = self
            .scripts
            .lock()
            .iter()
            .filter(|script| script.context.is_none())
            .map(|script| (script.id.clone(), script.source.clone()))
            .collect();

        for (id, source) in global_sources {
            let result = target
                .client()
                .send_command(
                    "Page.addScriptToEvaluateOnNewDocument",
                    json!({"source": source}),
                )
                .await;
            match result {
                Ok(value) => {
                    if let Some(identifier) = value.get("identifier").and_then(Value::as_str) {
                        let mut scripts = self.scripts.lock();
                        if let Some(script) = scripts.iter_mut().find(|script| script.id == id) {
                            script
                                .cdp_ids
                                .push((target.session_id().clone(), identifier.to_string()));
                        }
                    }
                }
                Err(error) => {
                    warn!(target_id = %target.target_id(), %error, "Installing preload script failed");
                }
            }
        }
    }

    /// Disposes registrations scoped to a destroyed context.
    ///
    /// Part of the context-destruction cascade; idempotent.
    pub fn dispose_for_context(&self, context: &BrowsingContextId) {
        self.scripts
            .lock()
            .retain(|script| script.context.as_ref() != Some(context));
    }

    /// Returns the number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scripts.lock().len()
    }

    /// Returns `true` when no registrations exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scripts.lock().is_empty()
    }
}

/// Wraps a function declaration into an immediately-invoked expression.
fn wrap_function(declaration: &str) -> String {
    format!("({declaration})();")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::cdp::{CdpClient, CdpResult};
    use crate::context::BrowsingContext;

    struct ScriptedClient {
        session: CdpSessionId,
        sent: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedClient {
        fn new(session: &str) -> Arc<Self> {
            Arc::new(Self {
                session: CdpSessionId::new(session),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CdpClient for ScriptedClient {
        async fn send_command(&self, method: &str, params: Value) -> CdpResult<Value> {
            self.sent.lock().push((method.to_string(), params));
            Ok(json!({"identifier": "cdp-script-1"}))
        }

        fn session_id(&self) -> Option<&CdpSessionId> {
            Some(&self.session)
        }
    }

    fn fixture() -> (ScriptProcessor, Arc<ContextStore>, Arc<ScriptedClient>) {
        let contexts = Arc::new(ContextStore::new());
        let targets = Arc::new(TargetRegistry::new());
        let client = ScriptedClient::new("S1");
        let target = CdpTarget::new(
            "T1".into(),
            "S1".into(),
            Arc::clone(&client) as Arc<dyn CdpClient>,
        );
        targets.insert(Arc::clone(&target));
        contexts.insert(BrowsingContext::new(
            BrowsingContextId::new("T1"),
            None,
            Some(target),
            "about:blank",
        ));
        (
            ScriptProcessor::new(Arc::clone(&contexts), targets),
            contexts,
            client,
        )
    }

    #[tokio::test]
    async fn test_add_and_remove_roundtrip() {
        let (processor, _, client) = fixture();

        let added = processor
            .add_preload_script(AddPreloadScriptParams {
                function_declaration: "() => { window.flag = true; }".to_string(),
                context: None,
            })
            .await
            .expect("add");
        let script: PreloadScriptId =
            serde_json::from_value(added["script"].clone()).expect("id");
        assert_eq!(processor.len(), 1);

        processor
            .remove_preload_script(RemovePreloadScriptParams { script })
            .await
            .expect("remove");
        assert!(processor.is_empty());

        let sent = client.sent.lock().clone();
        assert_eq!(sent[0].0, "Page.addScriptToEvaluateOnNewDocument");
        assert_eq!(sent[1].0, "Page.removeScriptToEvaluateOnNewDocument");
        assert_eq!(sent[1].1["identifier"], "cdp-script-1");
    }

    #[tokio::test]
    async fn test_scoped_script_requires_known_context() {
        let (processor, _, _) = fixture();
        let err = processor
            .add_preload_script(AddPreloadScriptParams {
                function_declaration: "() => {}".to_string(),
                context: Some(BrowsingContextId::new("ghost")),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchContext { .. }));
    }

    #[tokio::test]
    async fn test_context_destruction_cascade() {
        let (processor, _, _) = fixture();
        processor
            .add_preload_script(AddPreloadScriptParams {
                function_declaration: "() => {}".to_string(),
                context: Some(BrowsingContextId::new("T1")),
            })
            .await
            .expect("add");
        processor
            .add_preload_script(AddPreloadScriptParams {
                function_declaration: "() => {}".to_string(),
                context: None,
            })
            .await
            .expect("add");

        processor.dispose_for_context(&BrowsingContextId::new("T1"));
        // Only the scoped registration is gone.
        assert_eq!(processor.len(), 1);
        // Idempotent.
        processor.dispose_for_context(&BrowsingContextId::new("T1"));
        assert_eq!(processor.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_script() {
        let (processor, _, _) = fixture();
        let err = processor
            .remove_preload_script(RemovePreloadScriptParams {
                script: PreloadScriptId::new("ghost"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchScript { .. }));
    }
}
