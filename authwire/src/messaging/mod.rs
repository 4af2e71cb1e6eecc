//! Generic message data model.
//!
//! A protocol message is a strongly-typed struct that also knows how to present itself
//! as a flat map of wire field names to string values. The mapping is declared once per
//! type with [`message_parts!`](crate::message_parts) and cached per (type, version) in a
//! [`DescriptionCache`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   describe()   ┌──────────────────────┐
//! │ ProtocolMessage  │───────────────▶│ MessageDescription   │
//! │ (typed struct +  │                │ (MessagePart per     │
//! │  extra data)     │◀───────────────│  wire field)         │
//! └──────────────────┘  get / set     └──────────────────────┘
//!          ▲                                    │
//!          │ MessageDictionary                  │ serialize / deserialize
//!          ▼                                    ▼
//!   ordered wire map (Fields)  ◀──── encoding (query, form, header)
//! ```
//!
//! # Examples
//!
//! ```
//! use authwire::messaging::{MessageProtections, ProtocolVersion};
//!
//! let all = MessageProtections::TAMPER_PROTECTION
//!     | MessageProtections::EXPIRATION
//!     | MessageProtections::REPLAY_PROTECTION;
//! assert_eq!(all, MessageProtections::ALL);
//!
//! let v10a: ProtocolVersion = "1.0a".parse().unwrap();
//! assert!(v10a > ProtocolVersion::new(1, 0, 0));
//! ```

use std::{
    any::Any,
    fmt,
    ops::{BitAnd, BitOr, BitOrAssign},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use url::Url;

use crate::error::{ProtocolError, Result};

pub mod description;
pub mod dictionary;
pub mod encoding;
pub mod part;

#[cfg(test)]
mod tests;

pub use description::{DescriptionCache, MessageDescription};
pub use dictionary::MessageDictionary;
pub use part::{Base64Blob, MessagePart, PartSlot, PartValue, ProtectionLevel, UnixTimestamp, part};

/// Ordered wire representation of a message: field name to string value.
///
/// Insertion order is preserved so extra data round-trips deterministically.
pub type Fields = IndexMap<String, String>;

/// Set of protections a binding element can apply or a message can require.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageProtections(u8);

impl MessageProtections {
    /// No protection.
    pub const NONE: Self = Self(0);
    /// The message cannot be altered without detection.
    pub const TAMPER_PROTECTION: Self = Self(1);
    /// The message carries a creation timestamp and is rejected once stale.
    pub const EXPIRATION: Self = Self(2);
    /// The message carries a single-use nonce.
    pub const REPLAY_PROTECTION: Self = Self(4);
    /// Every protection.
    pub const ALL: Self = Self(7);

    /// Raw bit value. Higher values are applied earlier on outgoing messages.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true when every protection in `other` is also in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true when no protection is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Protections an incoming message has verified before an element applying `self`
    /// runs. Elements without a protection run after every protection.
    #[must_use]
    pub const fn verified_before(self) -> Self {
        if self.0 == 0 {
            return Self::ALL;
        }
        let lowest = self.0 & self.0.wrapping_neg();
        Self((lowest - 1) & Self::ALL.0)
    }
}

impl BitOr for MessageProtections {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MessageProtections {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for MessageProtections {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for MessageProtections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names = [
            (Self::TAMPER_PROTECTION, "tamper"),
            (Self::EXPIRATION, "expiration"),
            (Self::REPLAY_PROTECTION, "replay"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MessageProtections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageProtections({self})")
    }
}

/// HTTP delivery methods a recipient accepts.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HttpDeliveryMethods(u8);

impl HttpDeliveryMethods {
    /// Fields in the query string of a GET request.
    pub const GET: Self = Self(1);
    /// Fields in a form-encoded POST body.
    pub const POST: Self = Self(2);
    /// Protocol fields in the `Authorization` header.
    pub const AUTHORIZATION_HEADER: Self = Self(4);

    /// Returns true when every method in `other` is also in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// HTTP verb implied by these methods: POST when allowed, otherwise GET.
    #[must_use]
    pub const fn http_verb(self) -> &'static str {
        if self.contains(Self::POST) { "POST" } else { "GET" }
    }
}

impl BitOr for HttpDeliveryMethods {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for HttpDeliveryMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Self::AUTHORIZATION_HEADER) {
            parts.push("AUTHORIZATION_HEADER");
        }
        if self.contains(Self::POST) {
            parts.push("POST");
        }
        if self.contains(Self::GET) {
            parts.push("GET");
        }
        write!(f, "HttpDeliveryMethods({})", parts.join("|"))
    }
}

/// How a message travels between the two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTransport {
    /// Back-channel request/response between the two endpoints.
    Direct,
    /// Relayed through the user agent by redirect or auto-posted form.
    Indirect,
}

/// Protocol version, ordered. OAuth 1.0a is `1.0.1`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct ProtocolVersion {
    major: u16,
    minor: u16,
    revision: u16,
}

impl ProtocolVersion {
    /// Creates a version.
    #[must_use]
    pub const fn new(major: u16, minor: u16, revision: u16) -> Self {
        Self { major, minor, revision }
    }

    /// Major component.
    #[must_use]
    pub const fn major(self) -> u16 {
        self.major
    }

    /// Minor component.
    #[must_use]
    pub const fn minor(self) -> u16 {
        self.minor
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.revision == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
        }
    }
}

impl fmt::Debug for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolVersion({self})")
    }
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidInput(format!("invalid protocol version: {s:?}"));
        // "1.0a" is the conventional spelling of 1.0.1
        let (numeric, lettered) = match s.strip_suffix('a') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let mut components = numeric.split('.').map(|c| c.parse::<u16>().map_err(|_| invalid()));
        let major = components.next().ok_or_else(invalid)??;
        let minor = components.next().transpose()?.unwrap_or(0);
        let revision = components.next().transpose()?.unwrap_or(0);
        if components.next().is_some() || (lettered && revision != 0) {
            return Err(invalid());
        }
        Ok(Self::new(major, minor, if lettered { 1 } else { revision }))
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Where a directed message is sent and how it may be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceivingEndpoint {
    /// Endpoint URL.
    pub location: Url,
    /// Accepted delivery methods.
    pub methods: HttpDeliveryMethods,
}

impl MessageReceivingEndpoint {
    /// Creates an endpoint.
    #[must_use]
    pub const fn new(location: Url, methods: HttpDeliveryMethods) -> Self {
        Self { location, methods }
    }

    /// Parses `location` and creates an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidInput`] if `location` is not an absolute URL.
    pub fn parse(location: &str, methods: HttpDeliveryMethods) -> Result<Self> {
        let location = Url::parse(location)
            .map_err(|e| ProtocolError::InvalidInput(format!("invalid endpoint {location}: {e}")))?;
        Ok(Self { location, methods })
    }
}

/// Static field declarations for a message type.
///
/// Implemented by [`message_parts!`](crate::message_parts); the method takes `&self` so
/// it can be called through `dyn ProtocolMessage`.
pub trait DeclaredParts {
    /// Every part this type may carry, across all versions.
    fn message_parts(&self) -> Vec<MessagePart>;
}

/// A typed protocol message.
///
/// Messages are moved into the channel for the duration of a send; once signed they
/// are serialized immediately and the dictionary view refuses further mutation.
pub trait ProtocolMessage: DeclaredParts + Any + Send + Sync + fmt::Debug {
    /// Short type name used in diagnostics.
    fn type_name(&self) -> &'static str;

    /// Protocol version the message is expressed in.
    fn version(&self) -> ProtocolVersion;

    /// Direct or indirect transport.
    fn transport(&self) -> MessageTransport;

    /// Protections the binding elements must collectively apply.
    fn required_protection(&self) -> MessageProtections;

    /// Undeclared fields, in arrival order.
    fn extra_data(&self) -> &Fields;

    /// Mutable access to undeclared fields.
    fn extra_data_mut(&mut self) -> &mut Fields;

    /// Target of a directed message.
    fn recipient(&self) -> Option<&MessageReceivingEndpoint> {
        None
    }

    /// Semantic validation run after deserialization.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message error when fields are individually valid but
    /// inconsistent with each other.
    fn ensure_valid(&self) -> Result<()> {
        Ok(())
    }

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Owned upcast for downcasting to the concrete type.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;

    /// Present when the message carries a creation timestamp.
    fn as_expiring(&self) -> Option<&dyn ExpiringMessage> {
        None
    }

    /// Mutable view of [`as_expiring`](Self::as_expiring).
    fn as_expiring_mut(&mut self) -> Option<&mut dyn ExpiringMessage> {
        None
    }

    /// Present when the message carries a nonce.
    fn as_replay_protected(&self) -> Option<&dyn ReplayProtectedMessage> {
        None
    }

    /// Mutable view of [`as_replay_protected`](Self::as_replay_protected).
    fn as_replay_protected_mut(&mut self) -> Option<&mut dyn ReplayProtectedMessage> {
        None
    }

    /// Present when the message carries a signature.
    fn as_signed(&self) -> Option<&dyn SignedMessage> {
        None
    }

    /// Mutable view of [`as_signed`](Self::as_signed).
    fn as_signed_mut(&mut self) -> Option<&mut dyn SignedMessage> {
        None
    }
}

impl dyn ProtocolMessage {
    /// Returns true if the message is a `T`.
    #[must_use]
    pub fn is<T: ProtocolMessage>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrows the message as a `T`.
    #[must_use]
    pub fn downcast_ref<T: ProtocolMessage>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    /// Mutably borrows the message as a `T`.
    #[must_use]
    pub fn downcast_mut<T: ProtocolMessage>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }

    /// Takes ownership of the message as a `T`.
    ///
    /// Returns `None` (dropping the message) if it is not a `T`; check with
    /// [`is`](Self::is) first to keep it.
    #[must_use]
    pub fn downcast<T: ProtocolMessage>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}

/// A message stamped with its creation time.
pub trait ExpiringMessage {
    /// When the sender created the message, if stamped.
    fn creation_date(&self) -> Option<DateTime<Utc>>;

    /// Stamps the creation time.
    fn set_creation_date(&mut self, created: DateTime<Utc>);
}

/// A message carrying a single-use nonce.
pub trait ReplayProtectedMessage: ExpiringMessage {
    /// Sender identity the nonce is scoped to.
    fn nonce_context(&self) -> &str;

    /// The nonce.
    fn nonce(&self) -> &str;

    /// Sets the nonce.
    fn set_nonce(&mut self, nonce: String);
}

/// A message protected by a signature over its fields.
pub trait SignedMessage: ReplayProtectedMessage {
    /// Signature algorithm name (`HMAC-SHA1`, `RSA-SHA1`, ...). Empty until chosen.
    fn signature_method(&self) -> &str;

    /// Records the signature algorithm.
    fn set_signature_method(&mut self, method: &str);

    /// Signature value. Empty until signed.
    fn signature(&self) -> &str;

    /// Stores the signature value.
    fn set_signature(&mut self, signature: String);

    /// Identity of the signing party.
    fn consumer_key(&self) -> &str;

    /// Token whose secret contributes to the signing key, if any.
    fn token(&self) -> Option<&str>;

    /// HTTP verb the message is (or was) delivered with.
    fn http_method(&self) -> &str;

    /// Records the HTTP verb.
    fn set_http_method(&mut self, method: &str);
}
