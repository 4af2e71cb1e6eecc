//! Security-event auditing.
//!
//! Signature failures, replays, expirations and token decisions are logged through
//! [`audit::audit_log`] on a dedicated tracing target:
//!
//! ```rust
//! use authwire::{audit, security::audit::AuditEventType};
//! use uuid::Uuid;
//!
//! audit!(
//!     AuditEventType::SignatureRejected,
//!     "consumer-1",
//!     Uuid::new_v4(),
//!     with_message_type("AuthorizedTokenRequest"),
//!     with_signature_method("HMAC-SHA1")
//! );
//! ```
//!
//! # Security Considerations
//!
//! - Audit logs use a separate tracing target for easy filtering
//! - Tokens are redacted to their last four characters
//! - Secrets, verifiers and signatures are never logged
//! - Request correlation IDs tie an audit entry to the surrounding span

pub mod audit;

pub use audit::{
    AuditDetails, AuditEvent, AuditEventType, audit_log, redact_fields, redact_token,
};
