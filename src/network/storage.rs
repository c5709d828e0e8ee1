//! Intercept registrations and blocked-request bookkeeping.
//!
//! Registrations are deduplicated by structural equality of their
//! (patterns, phases) configuration — deliberately order-sensitive over
//! both lists, so the same patterns in a different order register a second
//! intercept. Blocked requests are keyed by the BiDi network ID and hold
//! everything needed to resume the paused fetch job later.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use url::Url;

use crate::cdp::CdpClient;
use crate::error::{Error, Result};
use crate::identifiers::{FetchId, InterceptId, NetworkId};
use crate::protocol::{InterceptPhase, UrlPattern};

// ============================================================================
// Types
// ============================================================================

/// One intercept registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptRegistration {
    /// URL patterns; empty matches every URL.
    pub patterns: Vec<UrlPattern>,
    /// Phases the registration applies to.
    pub phases: Vec<InterceptPhase>,
}

/// A network request paused at an interception phase.
pub struct BlockedRequest {
    /// Paused fetch job.
    pub fetch_id: FetchId,
    /// Phase the request is paused at.
    pub phase: InterceptPhase,
    /// Response metadata snapshot for resumption.
    pub response: Value,
    /// Client of the session the job is paused on.
    pub client: Arc<dyn CdpClient>,
}

impl std::fmt::Debug for BlockedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockedRequest")
            .field("fetch_id", &self.fetch_id)
            .field("phase", &self.phase)
            .field("response", &self.response)
            .field("client", &"<dyn CdpClient>")
            .finish()
    }
}

/// URL schemes with a default port.
///
/// See <https://url.spec.whatwg.org/#special-scheme>.
const SPECIAL_SCHEMES: &[&str] = &["ftp", "file", "http", "https", "ws", "wss"];

// ============================================================================
// NetworkStorage
// ============================================================================

/// Intercept and blocked-request maps, one instance per mapper.
#[derive(Default)]
pub struct NetworkStorage {
    /// Registrations in insertion order; scanned for dedupe.
    intercepts: Mutex<Vec<(InterceptId, InterceptRegistration)>>,
    /// Blocked requests by network ID.
    blocked: Mutex<FxHashMap<NetworkId, BlockedRequest>>,
}

impl NetworkStorage {
    /// Creates empty storage.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Intercepts
    // ========================================================================

    /// Adds an intercept registration, deduplicating by structural
    /// equality: an equivalent existing registration's ID is returned
    /// instead of allocating a new one.
    pub fn add_intercept(&self, registration: InterceptRegistration) -> InterceptId {
        let mut intercepts = self.intercepts.lock();
        for (id, existing) in intercepts.iter() {
            if *existing == registration {
                return id.clone();
            }
        }

        let id = InterceptId::generate();
        intercepts.push((id.clone(), registration));
        id
    }

    /// Removes an intercept registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchIntercept`] for unknown IDs.
    pub fn remove_intercept(&self, intercept: &InterceptId) -> Result<()> {
        let mut intercepts = self.intercepts.lock();
        let before = intercepts.len();
        intercepts.retain(|(id, _)| id != intercept);
        if intercepts.len() == before {
            return Err(Error::no_such_intercept(intercept.clone()));
        }
        Ok(())
    }

    /// Returns `true` if at least one intercept is registered.
    #[must_use]
    pub fn has_intercepts(&self) -> bool {
        !self.intercepts.lock().is_empty()
    }

    /// Returns the IDs of registrations matching a URL at a phase.
    ///
    /// A registration matches when its phase list contains `phase` and its
    /// pattern list is empty (match-all) or contains a matching pattern.
    #[must_use]
    pub fn matching_intercepts(&self, url: &str, phase: InterceptPhase) -> Vec<InterceptId> {
        self.intercepts
            .lock()
            .iter()
            .filter(|(_, registration)| {
                registration.phases.contains(&phase)
                    && (registration.patterns.is_empty()
                        || registration
                            .patterns
                            .iter()
                            .any(|pattern| Self::match_url_pattern(pattern, url)))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Builds `Fetch.enable` parameters covering every registration.
    ///
    /// One `{urlPattern, requestStage}` entry per phase × pattern; an
    /// empty pattern list contributes the wildcard. `handleAuthRequests`
    /// is set when any registration covers the auth-required phase.
    #[must_use]
    pub fn fetch_enable_params(&self) -> Value {
        let intercepts = self.intercepts.lock();

        let mut patterns = Vec::new();
        for (_, registration) in intercepts.iter() {
            for phase in &registration.phases {
                let stage = Self::request_stage_from_phase(*phase);
                if registration.patterns.is_empty() {
                    patterns.push(json!({"urlPattern": "*", "requestStage": stage}));
                    continue;
                }
                for pattern in &registration.patterns {
                    patterns.push(json!({
                        "urlPattern": Self::canonical_pattern(pattern),
                        "requestStage": stage,
                    }));
                }
            }
        }

        let handle_auth = intercepts.iter().any(|(_, registration)| {
            registration.phases.contains(&InterceptPhase::AuthRequired)
        });

        json!({"patterns": patterns, "handleAuthRequests": handle_auth})
    }

    // ========================================================================
    // Blocked Requests
    // ========================================================================

    /// Stores a blocked request under its network ID.
    pub fn add_blocked_request(&self, request: NetworkId, blocked: BlockedRequest) {
        self.blocked.lock().insert(request, blocked);
    }

    /// Removes and returns a blocked request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchRequest`] when nothing is blocked under the
    /// given ID.
    pub fn take_blocked_request(&self, request: &NetworkId) -> Result<BlockedRequest> {
        self.blocked
            .lock()
            .remove(request)
            .ok_or_else(|| Error::no_such_request(request.clone()))
    }

    /// Returns `true` if at least one request is blocked.
    #[must_use]
    pub fn has_blocked_requests(&self) -> bool {
        !self.blocked.lock().is_empty()
    }

    // ========================================================================
    // URL Patterns
    // ========================================================================

    /// Serializes a pattern into its canonical URL-pattern string.
    #[must_use]
    pub fn canonical_pattern(pattern: &UrlPattern) -> String {
        match pattern {
            UrlPattern::String { pattern } => pattern.clone(),
            UrlPattern::Pattern {
                protocol,
                hostname,
                port,
                pathname,
                search,
            } => Self::build_url_pattern_string(
                protocol.as_deref(),
                hostname.as_deref(),
                port.as_deref(),
                pathname.as_deref(),
                search.as_deref(),
            ),
        }
    }

    /// Composes pattern fields into one canonical string.
    ///
    /// An entirely empty pattern canonicalizes to the match-all `"*"`.
    #[must_use]
    pub fn build_url_pattern_string(
        protocol: Option<&str>,
        hostname: Option<&str>,
        port: Option<&str>,
        pathname: Option<&str>,
        search: Option<&str>,
    ) -> String {
        if protocol.is_none()
            && hostname.is_none()
            && port.is_none()
            && pathname.is_none()
            && search.is_none()
        {
            return "*".to_string();
        }

        let mut url = String::new();

        if let Some(protocol) = protocol {
            url.push_str(protocol);
            if !protocol.ends_with(':') {
                url.push(':');
            }
            if Self::is_special_scheme(protocol) {
                url.push_str("//");
            }
        }

        if let Some(hostname) = hostname {
            url.push_str(hostname);
        }

        if let Some(port) = port {
            url.push(':');
            url.push_str(port);
        }

        if let Some(pathname) = pathname {
            if !pathname.starts_with('/') {
                url.push('/');
            }
            url.push_str(pathname);
        }

        if let Some(search) = search {
            if !search.starts_with('?') {
                url.push('?');
            }
            url.push_str(search);
        }

        url
    }

    /// Returns `true` for schemes that carry a default port.
    #[must_use]
    pub fn is_special_scheme(protocol: &str) -> bool {
        SPECIAL_SCHEMES.contains(&protocol.trim_end_matches(':'))
    }

    /// Maps an interception phase to the CDP fetch request stage.
    ///
    /// Auth-required has no stage of its own; it is detected via
    /// `Fetch.authRequired` at the response stage.
    #[must_use]
    pub fn request_stage_from_phase(phase: InterceptPhase) -> &'static str {
        match phase {
            InterceptPhase::BeforeRequestSent => "Request",
            InterceptPhase::ResponseStarted | InterceptPhase::AuthRequired => "Response",
        }
    }

    /// Matches a pattern against a URL.
    ///
    /// String patterns compare for exact equality. Structured patterns
    /// compare per field, absent fields acting as wildcards.
    #[must_use]
    pub fn match_url_pattern(pattern: &UrlPattern, url: &str) -> bool {
        match pattern {
            UrlPattern::String { pattern } => pattern == url,
            UrlPattern::Pattern {
                protocol,
                hostname,
                port,
                pathname,
                search,
            } => {
                let Ok(parsed) = Url::parse(url) else {
                    return false;
                };

                if let Some(protocol) = protocol
                    && protocol.trim_end_matches(':') != parsed.scheme()
                {
                    return false;
                }
                if let Some(hostname) = hostname
                    && parsed.host_str() != Some(hostname.as_str())
                {
                    return false;
                }
                if let Some(port) = port {
                    let actual = parsed
                        .port_or_known_default()
                        .map(|p| p.to_string())
                        .unwrap_or_default();
                    if *port != actual {
                        return false;
                    }
                }
                if let Some(pathname) = pathname {
                    let wanted = if pathname.starts_with('/') {
                        pathname.clone()
                    } else {
                        format!("/{pathname}")
                    };
                    if parsed.path() != wanted {
                        return false;
                    }
                }
                if let Some(search) = search
                    && search.trim_start_matches('?') != parsed.query().unwrap_or_default()
                {
                    return false;
                }
                true
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
