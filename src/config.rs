//! Client configuration for reaching the token-issuing endpoint.

use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:6006";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the token endpoint.
    pub endpoint: String,
    /// Per-request transport timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self { Self { endpoint: DEFAULT_ENDPOINT.to_string(), timeout_ms: DEFAULT_TIMEOUT_MS } }
}

impl SessionConfig {
    pub fn new<S: Into<String>>(endpoint: S) -> Self { Self { endpoint: endpoint.into(), ..Self::default() } }

    /// Read `THREADGATE_ENDPOINT` and `THREADGATE_TIMEOUT_MS`, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub(crate) fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = get("THREADGATE_ENDPOINT").filter(|v| !v.trim().is_empty()) {
            cfg.endpoint = v.trim().to_string();
        }
        if let Some(ms) = get("THREADGATE_TIMEOUT_MS").and_then(|v| v.trim().parse::<u64>().ok()) {
            cfg.timeout_ms = ms;
        }
        cfg
    }

    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
}
