//! HTTP transport configuration.
//!
//! Deserialized from the `[transport]` table of the messaging settings. Direct messages
//! go to endpoints named by peers, so the transport bounds what a response may cost.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProtocolError, Result};

/// Largest response body read from a direct-message peer.
pub const DEFAULT_MAXIMUM_RESPONSE_BYTES: usize = 1024 * 1024;

/// Redirects followed before a direct request is abandoned.
pub const DEFAULT_MAXIMUM_REDIRECTS: usize = 10;

/// Settings for [`HttpTransport`](super::HttpTransport).
///
/// # Examples
///
/// ```toml
/// [transport]
/// timeout_secs = 15
/// require_https = true
/// maximum_response_bytes = 65536
/// http_version = "http2"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HttpConfig {
    /// Idle connections kept per peer.
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    /// Deadline for a whole exchange, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Refuse plain `http` endpoints.
    #[serde(default)]
    pub require_https: bool,

    /// Responses longer than this fail with a communication error.
    #[serde(default = "default_maximum_response_bytes")]
    pub maximum_response_bytes: usize,

    /// Redirects to follow; 0 disables following.
    #[serde(default = "default_maximum_redirects")]
    pub maximum_redirects: usize,

    /// `User-Agent` sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP version preference.
    #[serde(default)]
    pub http_version: HttpVersion,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: default_pool_max_idle(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            require_https: false,
            maximum_response_bytes: default_maximum_response_bytes(),
            maximum_redirects: default_maximum_redirects(),
            user_agent: default_user_agent(),
            http_version: HttpVersion::default(),
        }
    }
}

impl HttpConfig {
    /// Checks the bounds of each setting.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidConfiguration`] when:
    /// - `timeout_secs` is outside 1-300
    /// - `connect_timeout_secs` is outside 1-60 or longer than `timeout_secs`
    /// - `maximum_response_bytes` is 0
    /// - `user_agent` is empty or holds control characters
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Err(ProtocolError::InvalidConfiguration(reason.to_owned()));
        if !(1..=300).contains(&self.timeout_secs) {
            return invalid("timeout_secs must be between 1 and 300");
        }
        if !(1..=60).contains(&self.connect_timeout_secs) {
            return invalid("connect_timeout_secs must be between 1 and 60");
        }
        if self.connect_timeout_secs > self.timeout_secs {
            return invalid("connect_timeout_secs must not exceed timeout_secs");
        }
        if self.maximum_response_bytes == 0 {
            return invalid("maximum_response_bytes must be positive");
        }
        if self.user_agent.is_empty() || self.user_agent.contains(['\r', '\n', '\0']) {
            return invalid("user_agent must be a non-empty header value");
        }
        Ok(())
    }

    /// Exchange deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Connect deadline.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// HTTP version preference.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HttpVersion {
    /// HTTP/1.1 only.
    Http1,
    /// HTTP/2 with prior knowledge.
    Http2,
    /// Negotiated.
    #[default]
    Auto,
}

fn default_pool_max_idle() -> usize {
    16
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_maximum_response_bytes() -> usize {
    DEFAULT_MAXIMUM_RESPONSE_BYTES
}

fn default_maximum_redirects() -> usize {
    DEFAULT_MAXIMUM_REDIRECTS
}

fn default_user_agent() -> String {
    concat!("authwire/", env!("CARGO_PKG_VERSION")).to_owned()
}
