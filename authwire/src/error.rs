//! Error types for authwire.
//!
//! Every fallible operation in the crate returns [`ProtocolError`]. Variants carry
//! enough structured detail (message type, field names, the check that failed) for a
//! host application to render a diagnostic without parsing strings.
//!
//! # Error Categories
//!
//! - **Malformed messages** ([`ProtocolError::RequiredFieldsMissing`],
//!   [`ProtocolError::MalformedField`], ...): the peer sent something that does not match
//!   the declared message shape. See [`ProtocolError::is_malformed`].
//! - **Protection failures** ([`ProtocolError::SignatureInvalid`],
//!   [`ProtocolError::ReplayDetected`], [`ProtocolError::MessageExpired`],
//!   [`ProtocolError::InsufficientMessageProtection`]): a binding element rejected the
//!   message.
//! - **Token failures** ([`ProtocolError::TokenNotFound`], [`ProtocolError::TokenExpired`],
//!   [`ProtocolError::VerifierMismatch`]): the token store disagrees with the message.
//! - **Communication failures** ([`ProtocolError::CommunicationFailure`],
//!   [`ProtocolError::HttpError`]): transport-level problems, including timeouts. See
//!   [`ProtocolError::is_communication_failure`].
//!
//! # Examples
//!
//! ```
//! use authwire::error::{ProtocolError, Result};
//!
//! fn require_https(url: &str) -> Result<()> {
//!     if !url.starts_with("https://") {
//!         return Err(ProtocolError::InvalidInput("endpoint must use HTTPS".to_owned()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_https("http://sp.example.com").is_err());
//! ```

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::messaging::MessageProtections;

/// Result type alias for authwire operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Why a signature check failed.
///
/// A missing certificate and a cryptographic mismatch have very different causes
/// (misconfiguration versus forgery), so they are reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFailure {
    /// The recomputed signature did not match the one on the message.
    Mismatch,
    /// No public key could be located for the claimed signer.
    CertificateNotFound,
    /// The signature value could not be decoded.
    Malformed,
}

impl fmt::Display for SignatureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mismatch => f.write_str("signature mismatch"),
            Self::CertificateNotFound => f.write_str("no certificate for signer"),
            Self::Malformed => f.write_str("malformed signature value"),
        }
    }
}

/// Errors raised while building, transmitting, receiving or validating messages.
///
/// # Error Recovery
///
/// - **Malformed/unrecognized**: reject the request with a 400-class response; do not retry.
/// - **Protection failures**: reject the request; log for security monitoring.
/// - **Token failures**: restart the authorization flow.
/// - **Communication failures**: safe to retry with a *new* message (a retried signed
///   message would reuse its nonce and be rejected as a replay).
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// One or more required fields were absent.
    ///
    /// All missing fields are reported at once so the caller gets a complete diagnostic.
    #[error("{message_type} is missing required fields: {}", .fields.join(", "))]
    RequiredFieldsMissing {
        /// Message type being deserialized.
        message_type: String,
        /// Every missing wire field name.
        fields: Vec<String>,
    },

    /// Fields that must not be empty were present with empty values.
    #[error("{message_type} has empty values for non-empty fields: {}", .fields.join(", "))]
    EmptyFields {
        /// Message type being deserialized.
        message_type: String,
        /// Offending wire field names.
        fields: Vec<String>,
    },

    /// A protocol-constant field carried an unexpected value.
    #[error("{message_type} field {field} must be {expected:?} but was {actual:?}")]
    ConstantMismatch {
        /// Message type being deserialized.
        message_type: String,
        /// Wire field name.
        field: String,
        /// Value fixed by the protocol.
        expected: String,
        /// Value the peer sent.
        actual: String,
    },

    /// A field value could not be decoded into its declared type.
    #[error("{message_type} field {field} is malformed: {reason}")]
    MalformedField {
        /// Message type being deserialized.
        message_type: String,
        /// Wire field name.
        field: String,
        /// Decoder diagnostic.
        reason: String,
    },

    /// The wire payload itself could not be parsed.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// No registered message type matches the received fields.
    ///
    /// Returned where a message was mandatory (for example, the response to a direct
    /// request). Where absence is legitimate the channel returns `Ok(None)` instead.
    #[error("unrecognized message: {0}")]
    UnrecognizedMessage(String),

    /// Binding elements did not collectively apply the protection the message requires.
    ///
    /// # Recovery
    ///
    /// On send this is a configuration error: the channel lacks a binding element for the
    /// required protection or signature algorithm. Nothing was transmitted.
    #[error("{message_type} requires {required} protection but only {applied} was applied")]
    InsufficientMessageProtection {
        /// Message type.
        message_type: String,
        /// Protection the message demands.
        required: MessageProtections,
        /// Protection the pipeline actually applied.
        applied: MessageProtections,
    },

    /// Signature verification failed.
    #[error("{message_type} signature invalid: {failure}")]
    SignatureInvalid {
        /// Message type.
        message_type: String,
        /// Which check failed.
        failure: SignatureFailure,
    },

    /// The nonce was already used by this sender within the retention window.
    #[error("replay detected for nonce {nonce:?} from {context:?}")]
    ReplayDetected {
        /// Sender identity the nonce is scoped to.
        context: String,
        /// Replayed nonce.
        nonce: String,
    },

    /// The message is older than the maximum message age.
    #[error("{message_type} expired: created {created}, expired at {expired_at}")]
    MessageExpired {
        /// Message type.
        message_type: String,
        /// Creation timestamp carried by the message.
        created: DateTime<Utc>,
        /// Instant after which the message stopped being acceptable.
        expired_at: DateTime<Utc>,
    },

    /// The message claims to have been created further in the future than clock skew allows.
    #[error("{message_type} timestamp {created} is in the future (now {now})")]
    MessageTimestampInFuture {
        /// Message type.
        message_type: String,
        /// Creation timestamp carried by the message.
        created: DateTime<Utc>,
        /// Local time at validation.
        now: DateTime<Utc>,
    },

    /// A token referenced by the message is unknown to the token store.
    #[error("{kind} not found: {token}")]
    TokenNotFound {
        /// Token category that was looked up.
        kind: String,
        /// Redacted token value.
        token: String,
    },

    /// A token referenced by the message has expired.
    #[error("token {token} expired at {expired_at}")]
    TokenExpired {
        /// Redacted token value.
        token: String,
        /// Expiration instant.
        expired_at: DateTime<Utc>,
    },

    /// A request token was presented for exchange before the user authorized it.
    #[error("request token {token} has not been authorized")]
    TokenNotAuthorized {
        /// Redacted token value.
        token: String,
    },

    /// The consumer key is unknown.
    #[error("consumer not found: {consumer_key}")]
    ConsumerNotFound {
        /// Consumer key from the message.
        consumer_key: String,
    },

    /// The verifier on a token exchange does not match the one issued at authorization.
    #[error("verifier mismatch for request token {token}")]
    VerifierMismatch {
        /// Redacted token value.
        token: String,
    },

    /// Transport-level failure, including timeouts.
    ///
    /// # Recovery
    ///
    /// Build a fresh message and retry; the original nonce is spent.
    #[error("communication failure: {0}")]
    CommunicationFailure(String),

    /// HTTP client error.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Two binding elements on an outgoing pipeline claim the same protection.
    #[error("more than one binding element applied {0} protection")]
    BindingConflict(MessageProtections),

    /// A protection binding element is registered without the protection it builds on.
    #[error("{protection} protection requires {requires} protection to also be configured")]
    MissingProtectionDependency {
        /// Protection that was configured.
        protection: MessageProtections,
        /// Protection that is missing.
        requires: MessageProtections,
    },

    /// An alias or extension type URI is already mapped.
    #[error("alias conflict: {alias:?} / {type_uri:?} already assigned")]
    AliasConflict {
        /// Alias being assigned.
        alias: String,
        /// Type URI being assigned.
        type_uri: String,
    },

    /// An alias on the wire has no namespace declaration.
    #[error("alias {0:?} is not declared")]
    UnknownAlias(String),

    /// An extension was added to an outgoing message twice.
    #[error("extension {0} already has arguments on this message")]
    DuplicateExtension(String),

    /// The peer speaks a protocol version below what this endpoint accepts.
    #[error("protocol version {actual} is below the minimum {minimum}")]
    UnsupportedVersion {
        /// Minimum accepted version.
        minimum: String,
        /// Version the peer used.
        actual: String,
    },

    /// Settings failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A caller passed an argument the operation cannot accept.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Low-level cryptographic failure (bad key material, encoding).
    #[error("cryptographic operation failed: {0}")]
    CryptoError(String),
}

impl ProtocolError {
    /// True for every variant describing a structurally invalid message.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::RequiredFieldsMissing { .. }
                | Self::EmptyFields { .. }
                | Self::ConstantMismatch { .. }
                | Self::MalformedField { .. }
                | Self::MalformedMessage(_)
                | Self::UnknownAlias(_)
        )
    }

    /// True for transport-level failures, including timeouts.
    #[must_use]
    pub const fn is_communication_failure(&self) -> bool {
        matches!(self, Self::CommunicationFailure(_) | Self::HttpError(_))
    }

    pub(crate) fn timeout(after: Duration) -> Self {
        Self::CommunicationFailure(format!("no response within {}ms", after.as_millis()))
    }
}
