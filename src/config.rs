//! Connection settings for the agent.

use crate::request::ValidationError;
use serde::{Deserialize, Serialize};

/// Where the agent listens and how to reach it.
///
/// Deserializable, so a host service can embed it in its own configuration:
///
/// ```
/// use netagent_client::Config;
///
/// let config: Config = serde_json::from_str(r#"{"host":"168.63.129.16","port":80}"#).unwrap();
/// assert!(!config.use_tls);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Connect with `https` instead of `http`.
    #[serde(default)]
    pub use_tls: bool,

    /// Reach the agent through the wireserver proxy, which tunnels every
    /// request through a single plugin endpoint.
    #[serde(default)]
    pub wireserver: bool,
}

impl Config {
    /// Creates a plain-`http`, direct configuration.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls: false,
            wireserver: false,
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_wireserver(mut self, wireserver: bool) -> Self {
        self.wireserver = wireserver;
        self
    }

    /// Checks that both a host and a non-zero port are set.
    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check([
            ("host", !self.host.trim().is_empty()),
            ("port", self.port != 0),
        ])
    }

    /// `https` when TLS is enabled, `http` otherwise.
    pub fn scheme(&self) -> &'static str {
        if self.use_tls {
            "https"
        } else {
            "http"
        }
    }

    /// `host:port`, with IPv6 literals in brackets.
    pub fn host_port(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
