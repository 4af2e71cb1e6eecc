//! Per-type message descriptions and their cache.

use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use indexmap::IndexMap;
use tracing::debug;

use super::{Fields, MessagePart, ProtocolMessage, ProtocolVersion};
use crate::error::{ProtocolError, Result};

/// The parts of one message type at one protocol version.
#[derive(Debug)]
pub struct MessageDescription {
    type_name: &'static str,
    version: ProtocolVersion,
    parts: IndexMap<&'static str, MessagePart>,
}

impl MessageDescription {
    /// Builds a description from declared parts, keeping those that apply to `version`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidInput`] if two parts share a wire name or an
    /// optional part is backed by a slot that cannot represent absence.
    pub fn new(
        type_name: &'static str,
        version: ProtocolVersion,
        declared: Vec<MessagePart>,
    ) -> Result<Self> {
        let mut parts = IndexMap::with_capacity(declared.len());
        for part in declared.into_iter().filter(|p| p.applies_to(version)) {
            if !part.is_required() && !part.is_nullable() {
                return Err(ProtocolError::InvalidInput(format!(
                    "{type_name}.{} is optional but its type cannot represent absence",
                    part.name()
                )));
            }
            if !part.is_bound() && part.constant_value().is_none() {
                return Err(ProtocolError::InvalidInput(format!(
                    "{type_name}.{} has neither a backing field nor a constant value",
                    part.name()
                )));
            }
            if parts.insert(part.name(), part).is_some() {
                return Err(ProtocolError::InvalidInput(format!(
                    "{type_name} declares a wire field twice"
                )));
            }
        }
        Ok(Self { type_name, version, parts })
    }

    /// Message type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Protocol version this description applies to.
    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Looks up a part by wire name.
    #[must_use]
    pub fn part(&self, name: &str) -> Option<&MessagePart> {
        self.parts.get(name)
    }

    /// All parts in declaration order.
    pub fn parts(&self) -> impl Iterator<Item = &MessagePart> {
        self.parts.values()
    }

    /// Checks presence, non-emptiness and constant values of `fields`.
    ///
    /// Every missing required field is reported together; emptiness and constant
    /// checks only run once all required fields are present.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RequiredFieldsMissing`], [`ProtocolError::EmptyFields`] or
    /// [`ProtocolError::ConstantMismatch`].
    pub fn ensure_parts_pass_basic_validation(&self, fields: &Fields, strict: bool) -> Result<()> {
        let missing: Vec<String> = self
            .parts()
            .filter(|p| p.is_required() && !fields.contains_key(p.name()))
            .map(|p| p.name().to_owned())
            .collect();
        if !missing.is_empty() {
            return Err(ProtocolError::RequiredFieldsMissing {
                message_type: self.type_name.to_owned(),
                fields: missing,
            });
        }

        let empty: Vec<String> = self
            .parts()
            .filter(|p| p.is_required() && !p.allows_empty())
            .filter(|p| fields.get(p.name()).is_some_and(String::is_empty))
            .map(|p| p.name().to_owned())
            .collect();
        if !empty.is_empty() {
            return Err(ProtocolError::EmptyFields {
                message_type: self.type_name.to_owned(),
                fields: empty,
            });
        }

        for part in self.parts() {
            if let (Some(expected), Some(actual)) = (part.constant_value(), fields.get(part.name()))
                && !part.constant_matches(actual, strict)
            {
                return Err(ProtocolError::ConstantMismatch {
                    message_type: self.type_name.to_owned(),
                    field: part.name().to_owned(),
                    expected: expected.to_owned(),
                    actual: actual.clone(),
                });
            }
        }
        Ok(())
    }

    /// Produces the wire map for `message`.
    ///
    /// Declared parts are included when required or set to a non-default value, in
    /// declaration order, followed by every extra-data entry.
    #[must_use]
    pub fn serialize(&self, message: &dyn ProtocolMessage) -> Fields {
        let any = message.as_any();
        let mut fields = Fields::with_capacity(self.parts.len() + message.extra_data().len());
        for part in self.parts() {
            if (part.is_required() || part.is_nondefault(any))
                && let Some(value) = part.value(any)
            {
                fields.insert(part.name().to_owned(), value);
            }
        }
        for (key, value) in message.extra_data() {
            fields.entry(key.clone()).or_insert_with(|| value.clone());
        }
        fields
    }

    /// Populates `message` from `fields` after basic validation.
    ///
    /// Unknown keys land in the message's extra data.
    ///
    /// # Errors
    ///
    /// Any basic-validation error, [`ProtocolError::MalformedField`] when a value
    /// cannot be decoded, or whatever the message's own `ensure_valid` reports.
    pub fn deserialize(
        &self,
        message: &mut dyn ProtocolMessage,
        fields: &Fields,
        strict: bool,
    ) -> Result<()> {
        self.ensure_parts_pass_basic_validation(fields, strict)?;
        for (key, value) in fields {
            match self.parts.get(key.as_str()) {
                Some(part) => part.set_value(message.as_any_mut(), Some(value), strict).map_err(
                    |reason| ProtocolError::MalformedField {
                        message_type: self.type_name.to_owned(),
                        field: key.clone(),
                        reason,
                    },
                )?,
                None => {
                    message.extra_data_mut().insert(key.clone(), value.clone());
                }
            }
        }
        message.ensure_valid()
    }
}

type DescriptionKey = (TypeId, ProtocolVersion);

/// Cache of [`MessageDescription`]s keyed by (message type, version).
///
/// Read-mostly and shared across channels. A miss takes the write lock and checks
/// again before building, so concurrent first use registers each description once.
#[derive(Debug, Clone, Default)]
pub struct DescriptionCache {
    inner: Arc<RwLock<HashMap<DescriptionKey, Arc<MessageDescription>>>>,
}

impl DescriptionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the description for `message`'s type and version.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidInput`] if the type's part declarations are
    /// inconsistent.
    pub fn describe(&self, message: &dyn ProtocolMessage) -> Result<Arc<MessageDescription>> {
        let key = (message.as_any().type_id(), message.version());
        if let Some(found) = self.inner.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return Ok(Arc::clone(found));
        }

        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(found) = map.get(&key) {
            return Ok(Arc::clone(found));
        }
        debug!(message_type = message.type_name(), version = %message.version(), "describing message type");
        let description = Arc::new(MessageDescription::new(
            message.type_name(),
            message.version(),
            message.message_parts(),
        )?);
        map.insert(key, Arc::clone(&description));
        Ok(description)
    }

    /// Number of cached descriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when nothing has been described yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
