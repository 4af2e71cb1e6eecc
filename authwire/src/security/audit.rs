//! Audit logging for security-relevant protocol events.
//!
//! Events are emitted on the `audit` tracing target so they can be routed to a
//! separate sink. Tokens, verifiers and signatures never appear in clear text.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messaging::Fields;

/// Wire fields whose values are credentials and must not be logged.
const SENSITIVE_FIELDS: &[&str] =
    &["oauth_signature", "oauth_token_secret", "oauth_verifier", "openid.sig"];

/// Types of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// An outgoing message was signed.
    MessageSigned,
    /// An incoming signature failed verification.
    SignatureRejected,
    /// An incoming nonce had already been used.
    ReplayRejected,
    /// An incoming message was too old or dated in the future.
    MessageExpired,
    /// A request token was issued to a consumer.
    RequestTokenIssued,
    /// A request token was exchanged for an access token.
    AccessTokenIssued,
    /// A token was unknown, expired or not yet authorized.
    TokenRejected,
    /// A verifier did not match the one issued for the token.
    VerifierRejected,
}

/// Contextual details for an audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditDetails {
    /// Message type involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    /// Token involved (redacted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Nonce involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Signature algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_method: Option<String>,
    /// Error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Audit log entry.
///
/// # Examples
///
/// ```
/// use authwire::security::audit::{AuditEvent, AuditEventType};
/// use uuid::Uuid;
///
/// let event = AuditEvent::new(AuditEventType::ReplayRejected, "consumer-1", Uuid::new_v4())
///     .with_message_type("AccessProtectedResourceRequest")
///     .with_nonce("a1b2c3d4");
///
/// authwire::security::audit::audit_log(&event);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred.
    pub timestamp: SystemTime,
    /// What happened.
    pub event_type: AuditEventType,
    /// Consumer key of the party involved.
    pub consumer_key: String,
    /// Correlation ID.
    pub request_id: Uuid,
    /// Event details.
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Creates a new audit event.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn new(
        event_type: AuditEventType,
        consumer_key: impl Into<String>,
        request_id: Uuid,
    ) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            consumer_key: consumer_key.into(),
            request_id,
            details: AuditDetails::default(),
        }
    }

    /// Adds the message type.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.details.message_type = Some(message_type.into());
        self
    }

    /// Adds a token, redacting it.
    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.details.token = Some(redact_token(token));
        self
    }

    /// Adds the nonce.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.details.nonce = Some(nonce.into());
        self
    }

    /// Adds the signature algorithm.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_signature_method(mut self, method: impl Into<String>) -> Self {
        self.details.signature_method = Some(method.into());
        self
    }

    /// Adds an error description.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for builder methods"
    )]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.details.error = Some(error.into());
        self
    }
}

/// Logs an audit event on the `audit` target.
pub fn audit_log(event: &AuditEvent) {
    tracing::info!(
        target: "audit",
        timestamp = ?event.timestamp,
        event_type = ?event.event_type,
        consumer_key = %event.consumer_key,
        request_id = %event.request_id,
        details = ?event.details,
        "AUDIT"
    );
}

/// Redacts a token to its last four characters.
///
/// # Examples
///
/// ```
/// use authwire::security::audit::redact_token;
///
/// assert_eq!(redact_token("d41d8cd98f00b204"), "************b204");
/// assert_eq!(redact_token("abc"), "***");
/// assert_eq!(redact_token(""), "");
/// ```
#[must_use]
pub fn redact_token(token: &str) -> String {
    let count = token.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let visible: String = token.chars().skip(count - 4).collect();
    format!("{}{visible}", "*".repeat(count - 4))
}

/// Copy of `fields` with credential values replaced by `[REDACTED]`.
///
/// # Examples
///
/// ```
/// use authwire::{messaging::Fields, security::audit::redact_fields};
///
/// let mut fields = Fields::new();
/// fields.insert("oauth_token".to_owned(), "rt-1".to_owned());
/// fields.insert("oauth_token_secret".to_owned(), "s3cr3t".to_owned());
/// let redacted = redact_fields(&fields);
/// assert_eq!(redacted["oauth_token"], "rt-1");
/// assert_eq!(redacted["oauth_token_secret"], "[REDACTED]");
/// ```
#[must_use]
pub fn redact_fields(fields: &Fields) -> Fields {
    fields
        .iter()
        .map(|(key, value)| {
            let value = if SENSITIVE_FIELDS.contains(&key.as_str()) {
                "[REDACTED]".to_owned()
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect()
}

/// Creates and logs an audit event in one expression.
///
/// ```
/// use authwire::{audit, security::audit::AuditEventType};
/// use uuid::Uuid;
///
/// audit!(AuditEventType::MessageSigned, "consumer-1", Uuid::new_v4());
/// audit!(
///     AuditEventType::TokenRejected,
///     "consumer-1",
///     Uuid::new_v4(),
///     with_token("rt-123456"),
///     with_error("expired")
/// );
/// ```
#[macro_export]
macro_rules! audit {
    ($event_type:expr, $consumer_key:expr, $request_id:expr) => {
        $crate::security::audit::audit_log(
            &$crate::security::audit::AuditEvent::new($event_type, $consumer_key, $request_id)
        )
    };
    ($event_type:expr, $consumer_key:expr, $request_id:expr, $($method:ident($arg:expr)),+ $(,)?) => {
        $crate::security::audit::audit_log(
            &$crate::security::audit::AuditEvent::new($event_type, $consumer_key, $request_id)
                $(.$method($arg))+
        )
    };
}
