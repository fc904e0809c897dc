use std::collections::HashMap;
use std::env;
use std::sync::OnceLock;

use serde::Deserialize;

use crate::dialer::check_targets::{CheckTargetSet, MAX_CHECK_TARGETS};

/// Configuration for a single chained (upstream) proxy server
///
/// Immutable after a dialer is built, except for the embedded check-target
/// set which is populated by successful dials and consumed by health checks.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// host:port of the upstream proxy server
    pub addr: String,

    /// Optional certificate for the server. If specified, the server is
    /// dialed over a secured path; otherwise over a plain one. For some
    /// pluggable transports this is a transport-specific certificate blob
    /// rather than PEM. Consumed by transport implementations.
    #[serde(default)]
    pub cert: Option<String>,

    /// Auth token to present to the upstream server
    #[serde(default)]
    pub auth_token: String,

    /// Whether this server can be trusted with plain HTTP traffic
    #[serde(default)]
    pub trusted: bool,

    /// Pluggable transport name; empty selects the default direct transport
    #[serde(default)]
    pub pluggable_transport: String,

    /// Transport-specific settings
    #[serde(default)]
    pub pluggable_transport_settings: HashMap<String, String>,

    // Recently dialed plain-HTTP destinations used as health-check targets.
    // Initialized exactly once, safe for concurrent use afterwards.
    #[serde(skip)]
    check_targets: OnceLock<CheckTargetSet>,
}

impl ServerConfig {
    /// Create a configuration for a server with no credentials or transport
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            cert: None,
            auth_token: String::new(),
            trusted: false,
            pluggable_transport: String::new(),
            pluggable_transport_settings: HashMap::new(),
            check_targets: OnceLock::new(),
        }
    }

    /// Get the check-target set, initializing it on first use
    pub fn check_targets(&self) -> &CheckTargetSet {
        self.check_targets
            .get_or_init(|| CheckTargetSet::new(MAX_CHECK_TARGETS))
    }

    /// The address to dial, taking the forced proxy address into account
    pub fn effective_addr<'a>(&'a self, overrides: &'a Overrides) -> &'a str {
        if overrides.force_proxy_addr.is_empty() {
            &self.addr
        } else {
            &overrides.force_proxy_addr
        }
    }
}

/// Process-wide overrides, expected to be set once at startup and threaded
/// into every dialer built afterwards
///
/// Empty strings mean unset.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// If specified, all proxying goes through this address
    pub force_proxy_addr: String,
    /// If specified, the auth token is forced to this value
    pub force_auth_token: String,
}

impl Overrides {
    /// Load overrides from environment variables
    pub fn from_env() -> Self {
        Self {
            force_proxy_addr: get_env_or("FORCE_CHAINED_PROXY_ADDR", ""),
            force_auth_token: get_env_or("FORCE_AUTH_TOKEN", ""),
        }
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
