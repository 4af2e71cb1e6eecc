//! Messaging settings, loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration.
//!
//! ```toml
//! maximum_message_lifetime_secs = 180
//! maximum_clock_skew_secs = 600
//! strict = true
//! nonce_length = 8
//! nonce_store_capacity = 10000
//! maximum_indirect_url_length = 2048
//!
//! [transport]
//! timeout_secs = 15
//! http_version = "http1"
//!
//! [service_provider]
//! maximum_request_token_ttl_secs = 300
//! minimum_consumer_version = "1.0a"
//! verifier_format = "alpha_numeric_no_look_alikes"
//! verifier_length = 8
//! ```

use std::sync::Arc;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::{
    bindings::MemoryNonceStore,
    channel::{ChannelSettings, ResponseEncoding},
    clock::Clock,
    error::{ProtocolError, Result},
    messaging::ProtocolVersion,
    oauth::{ConsumerRecord, V10, VerificationCodeFormat},
    transport::HttpConfig,
};

const MAX_WINDOW_SECS: u64 = 86_400;

/// Channel and binding-element settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MessagingSettings {
    /// How long a message stays acceptable after creation, in seconds.
    #[serde(default = "default_lifetime_secs")]
    pub maximum_message_lifetime_secs: u64,

    /// Tolerated clock difference between peers, in seconds.
    #[serde(default = "default_clock_skew_secs")]
    pub maximum_clock_skew_secs: u64,

    /// Exact constant comparison and strict key-value parsing.
    #[serde(default = "default_true")]
    pub strict: bool,

    /// Random characters in generated nonces.
    #[serde(default = "default_nonce_length")]
    pub nonce_length: usize,

    /// Accept incoming messages with an empty nonce.
    #[serde(default)]
    pub allow_empty_nonce: bool,

    /// Nonces remembered by the in-memory store.
    #[serde(default = "default_nonce_store_capacity")]
    pub nonce_store_capacity: usize,

    /// Longest indirect-message URL sent as a redirect.
    #[serde(default = "default_maximum_indirect_url_length")]
    pub maximum_indirect_url_length: usize,

    /// Direct-message transport.
    #[serde(default)]
    pub transport: HttpConfig,

    /// Service-provider policy.
    #[serde(default)]
    pub service_provider: ServiceProviderSettings,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            maximum_message_lifetime_secs: default_lifetime_secs(),
            maximum_clock_skew_secs: default_clock_skew_secs(),
            strict: true,
            nonce_length: default_nonce_length(),
            allow_empty_nonce: false,
            nonce_store_capacity: default_nonce_store_capacity(),
            maximum_indirect_url_length: default_maximum_indirect_url_length(),
            transport: HttpConfig::default(),
            service_provider: ServiceProviderSettings::default(),
        }
    }
}

impl MessagingSettings {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidConfiguration`] for unparsable TOML or values
    /// outside their bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use authwire::config::MessagingSettings;
    ///
    /// let settings = MessagingSettings::from_toml("maximum_message_lifetime_secs = 60").unwrap();
    /// assert_eq!(settings.maximum_message_age().num_seconds(), 660);
    /// ```
    pub fn from_toml(document: &str) -> Result<Self> {
        let settings: Self = toml::from_str(document)
            .map_err(|e| ProtocolError::InvalidConfiguration(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks value bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidConfiguration`] naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        if self.maximum_message_lifetime_secs == 0 || self.maximum_message_lifetime_secs > MAX_WINDOW_SECS {
            return Err(ProtocolError::InvalidConfiguration(
                "maximum_message_lifetime_secs must be between 1 and 86400".to_owned(),
            ));
        }
        if self.maximum_clock_skew_secs > MAX_WINDOW_SECS {
            return Err(ProtocolError::InvalidConfiguration(
                "maximum_clock_skew_secs must not exceed 86400".to_owned(),
            ));
        }
        if self.nonce_length == 0 && !self.allow_empty_nonce {
            return Err(ProtocolError::InvalidConfiguration(
                "nonce_length must be positive unless allow_empty_nonce is set".to_owned(),
            ));
        }
        if self.nonce_store_capacity == 0 {
            return Err(ProtocolError::InvalidConfiguration(
                "nonce_store_capacity must be positive".to_owned(),
            ));
        }
        if self.maximum_indirect_url_length < 256 {
            return Err(ProtocolError::InvalidConfiguration(
                "maximum_indirect_url_length must be at least 256".to_owned(),
            ));
        }
        self.transport.validate()?;
        self.service_provider.validate()
    }

    /// Message lifetime.
    #[must_use]
    pub fn maximum_message_lifetime(&self) -> TimeDelta {
        seconds(self.maximum_message_lifetime_secs)
    }

    /// Clock skew tolerance.
    #[must_use]
    pub fn maximum_clock_skew(&self) -> TimeDelta {
        seconds(self.maximum_clock_skew_secs)
    }

    /// Oldest acceptable message: lifetime plus skew.
    #[must_use]
    pub fn maximum_message_age(&self) -> TimeDelta {
        self.maximum_message_lifetime() + self.maximum_clock_skew()
    }

    /// Channel settings for these messaging settings.
    #[must_use]
    pub fn channel_settings(&self, response_encoding: ResponseEncoding) -> ChannelSettings {
        ChannelSettings {
            strict: self.strict,
            maximum_indirect_url_length: self.maximum_indirect_url_length,
            direct_timeout: self.transport.timeout(),
            response_encoding,
            realm: None,
        }
    }

    /// An in-memory nonce store retaining nonces for the maximum message age.
    #[must_use]
    pub fn nonce_store(&self, clock: Arc<dyn Clock>) -> MemoryNonceStore {
        MemoryNonceStore::new(self.nonce_store_capacity, self.maximum_message_age(), clock)
    }
}

/// Service-provider policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServiceProviderSettings {
    /// How long an issued request token may wait for its exchange, in seconds.
    #[serde(default = "default_request_token_ttl_secs")]
    pub maximum_request_token_ttl_secs: u64,

    /// Lowest OAuth version accepted on token requests.
    #[serde(default = "default_minimum_consumer_version")]
    pub minimum_consumer_version: ProtocolVersion,

    /// Verifier format for consumers registered through these settings.
    #[serde(default)]
    pub verifier_format: VerificationCodeFormat,

    /// Verifier length for consumers registered through these settings.
    #[serde(default = "default_verifier_length")]
    pub verifier_length: usize,
}

impl Default for ServiceProviderSettings {
    fn default() -> Self {
        Self {
            maximum_request_token_ttl_secs: default_request_token_ttl_secs(),
            minimum_consumer_version: default_minimum_consumer_version(),
            verifier_format: VerificationCodeFormat::default(),
            verifier_length: default_verifier_length(),
        }
    }
}

impl ServiceProviderSettings {
    fn validate(&self) -> Result<()> {
        if self.maximum_request_token_ttl_secs == 0 || self.maximum_request_token_ttl_secs > MAX_WINDOW_SECS {
            return Err(ProtocolError::InvalidConfiguration(
                "maximum_request_token_ttl_secs must be between 1 and 86400".to_owned(),
            ));
        }
        if self.verifier_length == 0 {
            return Err(ProtocolError::InvalidConfiguration(
                "verifier_length must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Request-token lifetime.
    #[must_use]
    pub fn maximum_request_token_ttl(&self) -> TimeDelta {
        seconds(self.maximum_request_token_ttl_secs)
    }

    /// A consumer record using the configured verifier format and length.
    #[must_use]
    pub fn consumer_record(&self, key: &str, secret: &str) -> ConsumerRecord {
        ConsumerRecord::new(key, secret)
            .with_verification_code(self.verifier_format, self.verifier_length)
    }
}

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs).ok().and_then(TimeDelta::try_seconds).unwrap_or(TimeDelta::MAX)
}

const fn default_true() -> bool {
    true
}

const fn default_lifetime_secs() -> u64 {
    180
}

const fn default_clock_skew_secs() -> u64 {
    600
}

const fn default_nonce_length() -> usize {
    8
}

const fn default_nonce_store_capacity() -> usize {
    10_000
}

const fn default_maximum_indirect_url_length() -> usize {
    2048
}

const fn default_request_token_ttl_secs() -> u64 {
    300
}

const fn default_minimum_consumer_version() -> ProtocolVersion {
    V10
}

const fn default_verifier_length() -> usize {
    5
}
