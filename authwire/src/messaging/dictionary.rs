//! Dictionary view over a message.

use std::sync::Arc;

use super::{DescriptionCache, Fields, MessageDescription, ProtocolMessage};
use crate::error::{ProtocolError, Result};

/// A message presented as an ordered map of wire field names to string values.
///
/// Keys matching a declared part route to the typed field; every other key lives in
/// the message's extra data. Mutation is refused once the message carries a
/// signature, since changing any field afterwards would invalidate it.
///
/// # Examples
///
/// ```
/// use authwire::{
///     messaging::{DescriptionCache, HttpDeliveryMethods, MessageDictionary, MessageReceivingEndpoint},
///     oauth::{UserAuthorizationRequest, V10A},
/// };
///
/// let endpoint = MessageReceivingEndpoint::parse(
///     "https://sp.example.com/authorize",
///     HttpDeliveryMethods::GET,
/// )?;
/// let mut request = UserAuthorizationRequest::new(endpoint, V10A);
/// let cache = DescriptionCache::new();
/// let mut dictionary = MessageDictionary::new(&mut request, &cache)?;
///
/// dictionary.set("oauth_token", Some("rt-1"))?;
/// dictionary.set("display", Some("popup"))?;
/// assert_eq!(dictionary.get("oauth_token").as_deref(), Some("rt-1"));
/// assert_eq!(dictionary.additional_keys(), vec!["display".to_owned()]);
/// # Ok::<(), authwire::ProtocolError>(())
/// ```
#[derive(Debug)]
pub struct MessageDictionary<'a> {
    message: &'a mut dyn ProtocolMessage,
    description: Arc<MessageDescription>,
    strict: bool,
}

impl<'a> MessageDictionary<'a> {
    /// Wraps `message`, describing its type through `cache`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message type's declarations are inconsistent.
    pub fn new(message: &'a mut dyn ProtocolMessage, cache: &DescriptionCache) -> Result<Self> {
        let description = cache.describe(&*message)?;
        Ok(Self { message, description, strict: true })
    }

    /// Compares constants case-insensitively instead of ordinally.
    #[must_use]
    pub const fn loose(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Description backing this view.
    #[must_use]
    pub fn description(&self) -> &MessageDescription {
        &self.description
    }

    /// Current value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        match self.description.part(key) {
            Some(part) => part.value(self.message.as_any()),
            None => self.message.extra_data().get(key).cloned(),
        }
    }

    /// Returns true if `key` currently has a value.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets or clears `key`. Clearing extra data removes the key entirely.
    ///
    /// # Errors
    ///
    /// Fails if the message is signed or the value cannot be decoded.
    pub fn set(&mut self, key: &str, value: Option<&str>) -> Result<()> {
        self.ensure_mutable()?;
        match self.description.part(key) {
            Some(part) => part
                .set_value(self.message.as_any_mut(), value, self.strict)
                .map_err(|reason| self.malformed(key, reason)),
            None => {
                match value {
                    Some(value) => {
                        self.message.extra_data_mut().insert(key.to_owned(), value.to_owned());
                    }
                    None => {
                        self.message.extra_data_mut().shift_remove(key);
                    }
                }
                Ok(())
            }
        }
    }

    /// Adds `key`, refusing to overwrite an existing value.
    ///
    /// # Errors
    ///
    /// Fails with [`ProtocolError::InvalidInput`] if the key already holds a
    /// non-default value, or for any reason [`set`](Self::set) fails.
    pub fn add(&mut self, key: &str, value: &str) -> Result<()> {
        let occupied = match self.description.part(key) {
            Some(part) => part.is_nondefault(self.message.as_any()),
            None => self.message.extra_data().contains_key(key),
        };
        if occupied {
            return Err(ProtocolError::InvalidInput(format!(
                "{} already has a value for {key}",
                self.description.type_name()
            )));
        }
        self.set(key, Some(value))
    }

    /// Removes `key`, returning whether it had a value.
    ///
    /// # Errors
    ///
    /// Fails if the message is signed or `key` is a constant part.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        self.ensure_mutable()?;
        match self.description.part(key) {
            Some(part) => {
                let had_value = part.is_nondefault(self.message.as_any());
                if had_value {
                    part.set_value(self.message.as_any_mut(), None, self.strict)
                        .map_err(|reason| self.malformed(key, reason))?;
                }
                Ok(had_value)
            }
            None => Ok(self.message.extra_data_mut().shift_remove(key).is_some()),
        }
    }

    /// Declared wire names that currently carry a value.
    #[must_use]
    pub fn declared_keys(&self) -> Vec<String> {
        let any = self.message.as_any();
        self.description
            .parts()
            .filter(|p| p.value(any).is_some())
            .map(|p| p.name().to_owned())
            .collect()
    }

    /// Extra-data keys in insertion order.
    #[must_use]
    pub fn additional_keys(&self) -> Vec<String> {
        self.message.extra_data().keys().cloned().collect()
    }

    /// Every key with a value: declared first, then extra data.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.declared_keys();
        keys.extend(self.additional_keys());
        keys
    }

    /// Number of keys with a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns true when no key has a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes the message to its wire map.
    #[must_use]
    pub fn to_map(&self) -> Fields {
        self.description.serialize(&*self.message)
    }

    /// Populates the message from a wire map.
    ///
    /// # Errors
    ///
    /// See [`MessageDescription::deserialize`].
    pub fn from_map(&mut self, fields: &Fields) -> Result<()> {
        self.description.deserialize(self.message, fields, self.strict)
    }

    fn ensure_mutable(&self) -> Result<()> {
        match self.message.as_signed() {
            Some(signed) if !signed.signature().is_empty() => Err(ProtocolError::InvalidInput(
                format!("{} is signed and can no longer be modified", self.description.type_name()),
            )),
            _ => Ok(()),
        }
    }

    fn malformed(&self, key: &str, reason: String) -> ProtocolError {
        ProtocolError::MalformedField {
            message_type: self.description.type_name().to_owned(),
            field: key.to_owned(),
            reason,
        }
    }
}
