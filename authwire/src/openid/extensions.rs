//! Extension arguments, split from or flattened onto one message.
//!
//! A manager is either reading an incoming message or writing an outgoing one; the mode
//! is a type parameter, so write operations on a reading manager do not compile.

use std::marker::PhantomData;

use indexmap::IndexMap;
use tracing::{debug, instrument};

use super::{ALIAS_DECLARATION_PREFIX, AliasAffinity, AliasManager, PREFIX, detect_version};
use crate::{
    error::{ProtocolError, Result},
    messaging::{Fields, ProtocolVersion},
};

/// Read mode: arguments parsed from an incoming message.
#[derive(Debug, Clone, Copy)]
pub struct Reading;

/// Write mode: arguments queued for an outgoing message.
#[derive(Debug, Clone, Copy)]
pub struct Writing;

/// Groups extension arguments by type URI.
#[derive(Debug, Clone)]
pub struct ExtensionArgumentsManager<Mode> {
    version: ProtocolVersion,
    aliases: AliasManager,
    extensions: IndexMap<String, Fields>,
    preferred: AliasAffinity,
    _mode: PhantomData<Mode>,
}

impl<Mode> ExtensionArgumentsManager<Mode> {
    /// OpenID version of the message.
    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Alias mappings in effect.
    #[must_use]
    pub const fn aliases(&self) -> &AliasManager {
        &self.aliases
    }
}

impl ExtensionArgumentsManager<Reading> {
    /// Parses the extensions in `fields` using the default [`AliasAffinity`].
    ///
    /// # Errors
    ///
    /// See [`from_incoming_with`](Self::from_incoming_with).
    pub fn from_incoming(fields: &Fields) -> Result<Self> {
        Self::from_incoming_with(fields, &AliasAffinity::default())
    }

    /// Parses the extensions in `fields`.
    ///
    /// Declared aliases are read first. OpenID 1.x messages then gain the aliases in
    /// `affinity` that the peer left unclaimed. Finally each `openid.<alias>[.<key>]`
    /// field with a known alias is filed under its extension; a bare `openid.<alias>`
    /// field lands under the empty key. Fields without a known alias are ignored.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MalformedField`] for an unknown `openid.ns`
    /// - [`ProtocolError::MalformedMessage`] for an empty alias or type URI declaration, or
    ///   an extension argument given twice
    /// - [`ProtocolError::AliasConflict`] when two aliases declare the same type URI
    #[instrument(skip_all, fields(fields = fields.len()))]
    pub fn from_incoming_with(fields: &Fields, affinity: &AliasAffinity) -> Result<Self> {
        let version = detect_version(fields)?;
        let mut aliases = AliasManager::new();
        for (key, type_uri) in fields {
            let Some(alias) = key.strip_prefix(ALIAS_DECLARATION_PREFIX) else {
                continue;
            };
            if alias.is_empty() || type_uri.is_empty() {
                return Err(ProtocolError::MalformedMessage(format!(
                    "empty extension declaration {key}={type_uri:?}"
                )));
            }
            aliases.set_alias(alias, type_uri)?;
        }
        if version.major() < 2 {
            aliases.set_preferred_aliases_where_not_set(affinity);
        }

        let mut extensions: IndexMap<String, Fields> = IndexMap::new();
        for (key, value) in fields {
            if key.starts_with(ALIAS_DECLARATION_PREFIX) {
                continue;
            }
            let Some(rest) = key.strip_prefix(PREFIX) else {
                continue;
            };
            let (alias, sub_key) = rest.split_once('.').unwrap_or((rest, ""));
            if let Some(type_uri) = aliases.try_resolve_alias(alias) {
                let arguments = extensions.entry(type_uri.to_owned()).or_default();
                if arguments.insert(sub_key.to_owned(), value.clone()).is_some() {
                    return Err(ProtocolError::MalformedMessage(format!(
                        "extension argument {sub_key:?} of {type_uri} given more than once"
                    )));
                }
            }
        }
        debug!(%version, aliases = aliases.len(), extensions = extensions.len(), "extensions read");

        Ok(Self {
            version,
            aliases,
            extensions,
            preferred: affinity.clone(),
            _mode: PhantomData,
        })
    }

    /// Whether the message carries arguments for `type_uri`.
    ///
    /// A declared alias without arguments does not count.
    #[must_use]
    pub fn contains_extension(&self, type_uri: &str) -> bool {
        self.extensions.contains_key(type_uri)
    }

    /// Arguments of `type_uri`, keyed without the alias prefix.
    #[must_use]
    pub fn extension_arguments(&self, type_uri: &str) -> Option<&Fields> {
        self.extensions.get(type_uri)
    }

    /// Type URIs with arguments, in message order.
    pub fn extension_type_uris(&self) -> impl Iterator<Item = &str> {
        self.extensions.keys().map(String::as_str)
    }
}

impl ExtensionArgumentsManager<Writing> {
    /// A writer for an OpenID `version` message using the default [`AliasAffinity`].
    #[must_use]
    pub fn for_outgoing(version: ProtocolVersion) -> Self {
        Self::for_outgoing_with(version, AliasAffinity::default())
    }

    /// A writer offering `preferred` aliases before numbering the rest.
    #[must_use]
    pub fn for_outgoing_with(version: ProtocolVersion, preferred: AliasAffinity) -> Self {
        Self {
            version,
            aliases: AliasManager::new(),
            extensions: IndexMap::new(),
            preferred,
            _mode: PhantomData,
        }
    }

    /// Queues `arguments` for the extension `type_uri`.
    ///
    /// Empty `arguments` are ignored.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::DuplicateExtension`] if `type_uri` already has arguments
    /// - [`ProtocolError::InvalidInput`] for an empty type URI
    pub fn add_extension_arguments(&mut self, type_uri: &str, arguments: Fields) -> Result<()> {
        if type_uri.is_empty() {
            return Err(ProtocolError::InvalidInput("extension type URI must not be empty".to_owned()));
        }
        if arguments.is_empty() {
            return Ok(());
        }
        let queued = self.extensions.entry(type_uri.to_owned()).or_default();
        if !queued.is_empty() {
            return Err(ProtocolError::DuplicateExtension(type_uri.to_owned()));
        }
        *queued = arguments;
        Ok(())
    }

    /// Flattens the queued extensions.
    ///
    /// Per extension: the `ns.<alias>` declaration, then `<alias>.<key>` for each argument
    /// (bare `<alias>` for an empty key). With `include_prefix` every key gains `openid.`,
    /// as in indirect messages; direct responses omit it.
    ///
    /// # Errors
    ///
    /// Alias assignment errors.
    ///
    /// # Examples
    ///
    /// ```
    /// use authwire::{messaging::Fields, openid::{ExtensionArgumentsManager, V20}};
    ///
    /// let mut manager = ExtensionArgumentsManager::for_outgoing(V20);
    /// let mut arguments = Fields::new();
    /// arguments.insert("mode".to_owned(), "fetch".to_owned());
    /// manager.add_extension_arguments("urn:ext:ax", arguments).unwrap();
    ///
    /// let sent = manager.arguments_to_send(false).unwrap();
    /// assert_eq!(sent.get("ns.alias1").map(String::as_str), Some("urn:ext:ax"));
    /// assert_eq!(sent.get("alias1.mode").map(String::as_str), Some("fetch"));
    /// ```
    pub fn arguments_to_send(&mut self, include_prefix: bool) -> Result<Fields> {
        let pending: Vec<String> = self
            .extensions
            .iter()
            .filter(|(_, arguments)| !arguments.is_empty())
            .map(|(type_uri, _)| type_uri.clone())
            .collect();
        self.aliases.assign_aliases(&pending, &self.preferred)?;

        let prefix = if include_prefix { PREFIX } else { "" };
        let mut sent = Fields::new();
        for (type_uri, arguments) in self.extensions.iter().filter(|(_, a)| !a.is_empty()) {
            let alias = self.aliases.get_or_assign_alias(type_uri)?;
            sent.insert(format!("{prefix}ns.{alias}"), type_uri.clone());
            for (key, value) in arguments {
                let wire_key = if key.is_empty() {
                    format!("{prefix}{alias}")
                } else {
                    format!("{prefix}{alias}.{key}")
                };
                sent.insert(wire_key, value.clone());
            }
        }
        debug!(extensions = pending.len(), fields = sent.len(), "extensions written");
        Ok(sent)
    }
}
