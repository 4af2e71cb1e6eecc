//! Declarative field descriptions.
//!
//! A [`MessagePart`] names one wire field of a message type, its constraints, and a
//! type-erased accessor into the struct field that backs it. Parts are declared with the
//! [`message_parts!`](crate::message_parts) macro; no runtime reflection is involved.

use std::{any::Any, fmt, marker::PhantomData, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use url::Url;

use super::ProtocolVersion;

/// Protection a field requires from the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ProtectionLevel {
    /// The field may travel unprotected.
    #[default]
    None,
    /// The field must be covered by the message signature.
    Sign,
    /// The field must be signed and confidential.
    SignAndEncrypt,
}

/// A value type that can appear in a message field.
///
/// Encoding is culture-invariant: booleans are `true`/`false`, timestamps are UTC
/// round-trip dates, byte blobs are base64.
pub trait PartValue: Sized + Send + Sync + 'static {
    /// Encodes the value for the wire.
    fn encode(&self) -> String;

    /// Decodes a wire value.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when `value` is not a valid encoding.
    fn decode(value: &str) -> Result<Self, String>;
}

impl PartValue for String {
    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(value: &str) -> Result<Self, String> {
        Ok(value.to_owned())
    }
}

impl PartValue for bool {
    fn encode(&self) -> String {
        if *self { "true".to_owned() } else { "false".to_owned() }
    }

    fn decode(value: &str) -> Result<Self, String> {
        if value.eq_ignore_ascii_case("true") {
            Ok(true)
        } else if value.eq_ignore_ascii_case("false") {
            Ok(false)
        } else {
            Err(format!("expected true or false, got {value:?}"))
        }
    }
}

macro_rules! integer_part_value {
    ($($ty:ty),*) => {$(
        impl PartValue for $ty {
            fn encode(&self) -> String {
                self.to_string()
            }

            fn decode(value: &str) -> Result<Self, String> {
                value.parse().map_err(|e| format!("invalid integer {value:?}: {e}"))
            }
        }
    )*};
}

integer_part_value!(u32, u64, i64);

impl PartValue for Url {
    fn encode(&self) -> String {
        self.as_str().to_owned()
    }

    fn decode(value: &str) -> Result<Self, String> {
        Url::parse(value).map_err(|e| format!("invalid absolute URL {value:?}: {e}"))
    }
}

impl PartValue for DateTime<Utc> {
    fn encode(&self) -> String {
        self.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    fn decode(value: &str) -> Result<Self, String> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("invalid UTC timestamp {value:?}: {e}"))
    }
}

/// Latest accepted wire timestamp: 9999-12-31T23:59:59Z.
pub const MAXIMUM_UNIX_TIMESTAMP: i64 = 253_402_300_799;

/// Timestamp carried as whole seconds since the Unix epoch, from 1970 to year 9999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(pub DateTime<Utc>);

impl PartValue for UnixTimestamp {
    fn encode(&self) -> String {
        self.0.timestamp().to_string()
    }

    fn decode(value: &str) -> Result<Self, String> {
        let seconds: i64 = value.parse().map_err(|e| format!("invalid timestamp {value:?}: {e}"))?;
        if !(0..=MAXIMUM_UNIX_TIMESTAMP).contains(&seconds) {
            return Err(format!("timestamp {seconds} out of range"));
        }
        Utc.timestamp_opt(seconds, 0)
            .single()
            .map(Self)
            .ok_or_else(|| format!("timestamp {seconds} out of range"))
    }
}

/// Opaque bytes carried as standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Base64Blob(pub Vec<u8>);

impl PartValue for Base64Blob {
    fn encode(&self) -> String {
        STANDARD.encode(&self.0)
    }

    fn decode(value: &str) -> Result<Self, String> {
        STANDARD.decode(value).map(Self).map_err(|e| format!("invalid base64: {e}"))
    }
}

/// Storage for a part inside a message struct.
///
/// `Option<T>` is nullable: `None` means absent. `String` treats the empty string as
/// absent. Plain scalars (`bool`, integers) cannot represent absence and therefore may
/// only back required parts.
pub trait PartSlot: Send + Sync + 'static {
    /// Whether the slot can represent an absent value.
    const NULLABLE: bool;

    /// Encoded wire value, or `None` when absent.
    fn read(&self) -> Option<String>;

    /// True when the slot holds something other than its default.
    fn is_nondefault(&self) -> bool;

    /// Decodes `value` into the slot; `None` resets to the default.
    ///
    /// # Errors
    ///
    /// Returns the decoder's reason on invalid input.
    fn write(&mut self, value: Option<&str>) -> Result<(), String>;
}

impl<T: PartValue> PartSlot for Option<T> {
    const NULLABLE: bool = true;

    fn read(&self) -> Option<String> {
        self.as_ref().map(PartValue::encode)
    }

    fn is_nondefault(&self) -> bool {
        self.is_some()
    }

    fn write(&mut self, value: Option<&str>) -> Result<(), String> {
        *self = value.map(T::decode).transpose()?;
        Ok(())
    }
}

impl PartSlot for String {
    const NULLABLE: bool = true;

    fn read(&self) -> Option<String> {
        (!self.is_empty()).then(|| self.clone())
    }

    fn is_nondefault(&self) -> bool {
        !self.is_empty()
    }

    fn write(&mut self, value: Option<&str>) -> Result<(), String> {
        value.unwrap_or_default().clone_into(self);
        Ok(())
    }
}

macro_rules! scalar_part_slot {
    ($($ty:ty),*) => {$(
        impl PartSlot for $ty {
            const NULLABLE: bool = false;

            fn read(&self) -> Option<String> {
                Some(PartValue::encode(self))
            }

            fn is_nondefault(&self) -> bool {
                *self != <$ty>::default()
            }

            fn write(&mut self, value: Option<&str>) -> Result<(), String> {
                *self = match value {
                    Some(value) => <$ty as PartValue>::decode(value)?,
                    None => <$ty>::default(),
                };
                Ok(())
            }
        }
    )*};
}

scalar_part_slot!(bool, u32, u64, i64);

/// Type-erased access to the struct field behind a part.
trait PartAccessor: Send + Sync {
    fn read(&self, message: &dyn Any) -> Option<String>;
    fn is_nondefault(&self, message: &dyn Any) -> bool;
    fn write(&self, message: &mut dyn Any, value: Option<&str>) -> Result<(), String>;
    fn nullable(&self) -> bool;
}

struct FieldAccessor<M, S> {
    get: fn(&M) -> &S,
    get_mut: fn(&mut M) -> &mut S,
    _marker: PhantomData<fn(M) -> S>,
}

impl<M: 'static, S: PartSlot> PartAccessor for FieldAccessor<M, S> {
    fn read(&self, message: &dyn Any) -> Option<String> {
        message.downcast_ref::<M>().and_then(|m| (self.get)(m).read())
    }

    fn is_nondefault(&self, message: &dyn Any) -> bool {
        message.downcast_ref::<M>().is_some_and(|m| (self.get)(m).is_nondefault())
    }

    fn write(&self, message: &mut dyn Any, value: Option<&str>) -> Result<(), String> {
        let message = message
            .downcast_mut::<M>()
            .ok_or_else(|| "part applied to a message of the wrong type".to_owned())?;
        (self.get_mut)(message).write(value)
    }

    fn nullable(&self) -> bool {
        S::NULLABLE
    }
}

/// One declared wire field of a message type.
#[derive(Clone)]
pub struct MessagePart {
    name: &'static str,
    required: bool,
    allow_empty: bool,
    constant: Option<&'static str>,
    protection: ProtectionLevel,
    min_version: Option<ProtocolVersion>,
    max_version: Option<ProtocolVersion>,
    accessor: Option<Arc<dyn PartAccessor>>,
}

/// Starts a part declaration for wire field `name`.
#[must_use]
pub const fn part(name: &'static str) -> MessagePart {
    MessagePart {
        name,
        required: false,
        allow_empty: false,
        constant: None,
        protection: ProtectionLevel::None,
        min_version: None,
        max_version: None,
        accessor: None,
    }
}

impl MessagePart {
    /// Marks the part required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Allows a present-but-empty value.
    #[must_use]
    pub const fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    /// Fixes the part's value; peers may only echo it.
    #[must_use]
    pub const fn constant(mut self, value: &'static str) -> Self {
        self.constant = Some(value);
        self
    }

    /// Sets the protection the part requires.
    #[must_use]
    pub const fn protection(mut self, level: ProtectionLevel) -> Self {
        self.protection = level;
        self
    }

    /// The part exists from `version` onwards.
    #[must_use]
    pub const fn since(mut self, version: ProtocolVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// The part exists up to and including `version`.
    #[must_use]
    pub const fn until(mut self, version: ProtocolVersion) -> Self {
        self.max_version = Some(version);
        self
    }

    /// Binds the part to a struct field through accessor functions.
    #[must_use]
    pub fn bind<M: 'static, S: PartSlot>(
        mut self,
        get: fn(&M) -> &S,
        get_mut: fn(&mut M) -> &mut S,
    ) -> Self {
        self.accessor = Some(Arc::new(FieldAccessor { get, get_mut, _marker: PhantomData }));
        self
    }

    /// Wire field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the part must be present.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Whether an empty value is acceptable.
    #[must_use]
    pub const fn allows_empty(&self) -> bool {
        self.allow_empty
    }

    /// Fixed value, for constant parts.
    #[must_use]
    pub const fn constant_value(&self) -> Option<&'static str> {
        self.constant
    }

    /// Required protection level.
    #[must_use]
    pub const fn protection_level(&self) -> ProtectionLevel {
        self.protection
    }

    /// Whether the part exists in messages of `version`.
    #[must_use]
    pub fn applies_to(&self, version: ProtocolVersion) -> bool {
        self.min_version.is_none_or(|min| version >= min)
            && self.max_version.is_none_or(|max| version <= max)
    }

    /// Whether the backing slot can represent absence. Constants are never absent.
    pub(crate) fn is_nullable(&self) -> bool {
        self.accessor.as_ref().is_none_or(|a| a.nullable())
    }

    pub(crate) const fn is_bound(&self) -> bool {
        self.accessor.is_some()
    }

    /// Encoded value currently held by `message`.
    pub(crate) fn value(&self, message: &dyn Any) -> Option<String> {
        match (&self.accessor, self.constant) {
            (Some(accessor), _) => accessor.read(message),
            (None, Some(constant)) => Some(constant.to_owned()),
            (None, None) => None,
        }
    }

    /// True when `message` holds a non-default value for this part.
    pub(crate) fn is_nondefault(&self, message: &dyn Any) -> bool {
        match &self.accessor {
            Some(accessor) => accessor.is_nondefault(message),
            None => self.constant.is_some(),
        }
    }

    /// Checks `value` against the constant, ordinal in strict mode.
    pub(crate) fn constant_matches(&self, value: &str, strict: bool) -> bool {
        self.constant.is_none_or(|expected| {
            if strict { value == expected } else { value.eq_ignore_ascii_case(expected) }
        })
    }

    /// Stores `value` into `message`. Constant parts only verify the value.
    pub(crate) fn set_value(
        &self,
        message: &mut dyn Any,
        value: Option<&str>,
        strict: bool,
    ) -> Result<(), String> {
        if let Some(expected) = self.constant {
            return match value {
                Some(value) if self.constant_matches(value, strict) => Ok(()),
                Some(value) => Err(format!("constant must be {expected:?}, got {value:?}")),
                None => Err("constant parts cannot be cleared".to_owned()),
            };
        }
        match &self.accessor {
            Some(accessor) => accessor.write(message, value),
            None => Err("part has no backing field".to_owned()),
        }
    }
}

impl fmt::Debug for MessagePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePart")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("allow_empty", &self.allow_empty)
            .field("constant", &self.constant)
            .field("protection", &self.protection)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .finish_non_exhaustive()
    }
}

/// Declares the wire parts of a message type and implements
/// [`DeclaredParts`](crate::messaging::DeclaredParts) for it.
///
/// Each entry binds a (possibly nested) struct field to a part builder. Constant parts,
/// which have no backing field, go in an optional `constants` block.
///
/// ```
/// use authwire::{message_parts, messaging::{part, DeclaredParts}};
///
/// #[derive(Debug, Default)]
/// struct Ping {
///     token: String,
///     attempt: Option<u32>,
/// }
///
/// message_parts!(Ping {
///     token => part("token").required(),
///     attempt => part("attempt"),
/// } constants {
///     part("mode").required().constant("ping"),
/// });
///
/// let parts = Ping::default().message_parts();
/// assert_eq!(parts.len(), 3);
/// ```
#[macro_export]
macro_rules! message_parts {
    ($ty:ty {
        $($first:ident $(. $rest:ident)* => $decl:expr),* $(,)?
    } $(constants { $($constant:expr),* $(,)? })?) => {
        impl $crate::messaging::DeclaredParts for $ty {
            fn message_parts(&self) -> ::std::vec::Vec<$crate::messaging::MessagePart> {
                ::std::vec![
                    $($decl.bind(
                        |m: &$ty| &m.$first $(.$rest)*,
                        |m: &mut $ty| &mut m.$first $(.$rest)*,
                    ),)*
                    $($($constant,)*)?
                ]
            }
        }
    };
}
