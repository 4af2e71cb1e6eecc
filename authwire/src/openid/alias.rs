//! Alias/type-URI bijection for one message.

use indexmap::IndexMap;
use tracing::debug;

use super::AliasAffinity;
use crate::error::{ProtocolError, Result};

/// Bidirectional map between extension type URIs and their wire aliases.
///
/// Both directions are updated together; once assigned, neither an alias nor a type URI
/// is reassigned for the lifetime of the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasManager {
    type_uri_to_alias: IndexMap<String, String>,
    alias_to_type_uri: IndexMap<String, String>,
}

impl AliasManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias of `type_uri`, assigning the next `aliasN` if it has none.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidInput`] for an empty type URI.
    ///
    /// # Examples
    ///
    /// ```
    /// use authwire::openid::AliasManager;
    ///
    /// let mut aliases = AliasManager::new();
    /// assert_eq!(aliases.get_or_assign_alias("urn:ext:a").unwrap(), "alias1");
    /// assert_eq!(aliases.get_or_assign_alias("urn:ext:b").unwrap(), "alias2");
    /// assert_eq!(aliases.get_or_assign_alias("urn:ext:a").unwrap(), "alias1");
    /// ```
    pub fn get_or_assign_alias(&mut self, type_uri: &str) -> Result<String> {
        non_empty("type URI", type_uri)?;
        if let Some(alias) = self.type_uri_to_alias.get(type_uri) {
            return Ok(alias.clone());
        }
        Ok(self.assign_new_alias(type_uri))
    }

    /// Maps `alias` to `type_uri`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::AliasConflict`] if either side is already mapped
    /// - [`ProtocolError::InvalidInput`] if either side is empty
    pub fn set_alias(&mut self, alias: &str, type_uri: &str) -> Result<()> {
        non_empty("alias", alias)?;
        non_empty("type URI", type_uri)?;
        if self.alias_to_type_uri.contains_key(alias) || self.type_uri_to_alias.contains_key(type_uri) {
            return Err(ProtocolError::AliasConflict {
                alias: alias.to_owned(),
                type_uri: type_uri.to_owned(),
            });
        }
        self.insert(alias, type_uri);
        Ok(())
    }

    /// Assigns aliases to every type URI that has none.
    ///
    /// The first pass gives each type URI its preferred alias from `preferred` unless that
    /// alias is already taken; the second pass numbers whatever is left.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidInput`] for an empty type URI.
    pub fn assign_aliases<S: AsRef<str>>(&mut self, type_uris: &[S], preferred: &AliasAffinity) -> Result<()> {
        for type_uri in type_uris.iter().map(AsRef::as_ref) {
            non_empty("type URI", type_uri)?;
            if self.is_alias_assigned_to(type_uri) {
                continue;
            }
            if let Some(alias) = preferred.preferred_alias(type_uri)
                && !self.is_alias_used(alias)
            {
                self.insert(alias, type_uri);
            }
        }
        for type_uri in type_uris.iter().map(AsRef::as_ref) {
            if !self.is_alias_assigned_to(type_uri) {
                self.assign_new_alias(type_uri);
            }
        }
        Ok(())
    }

    /// Maps each registry entry whose type URI and alias are both still free.
    pub fn set_preferred_aliases_where_not_set(&mut self, preferred: &AliasAffinity) {
        for (type_uri, alias) in preferred.iter() {
            if !self.is_alias_assigned_to(type_uri) && !self.is_alias_used(alias) {
                self.insert(alias, type_uri);
            }
        }
    }

    /// Type URI behind `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownAlias`] if `alias` is not mapped.
    pub fn resolve_alias(&self, alias: &str) -> Result<&str> {
        self.try_resolve_alias(alias)
            .ok_or_else(|| ProtocolError::UnknownAlias(alias.to_owned()))
    }

    /// Type URI behind `alias`, if mapped.
    #[must_use]
    pub fn try_resolve_alias(&self, alias: &str) -> Option<&str> {
        self.alias_to_type_uri.get(alias).map(String::as_str)
    }

    /// Alias of `type_uri`, if assigned.
    #[must_use]
    pub fn alias_of(&self, type_uri: &str) -> Option<&str> {
        self.type_uri_to_alias.get(type_uri).map(String::as_str)
    }

    /// Whether `alias` is mapped.
    #[must_use]
    pub fn is_alias_used(&self, alias: &str) -> bool {
        self.alias_to_type_uri.contains_key(alias)
    }

    /// Whether `type_uri` has an alias.
    #[must_use]
    pub fn is_alias_assigned_to(&self, type_uri: &str) -> bool {
        self.type_uri_to_alias.contains_key(type_uri)
    }

    /// Assigned aliases in assignment order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.alias_to_type_uri.keys().map(String::as_str)
    }

    /// `(alias, type URI)` pairs in assignment order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.alias_to_type_uri.iter().map(|(alias, uri)| (alias.as_str(), uri.as_str()))
    }

    /// Number of mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alias_to_type_uri.len()
    }

    /// True when nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alias_to_type_uri.is_empty()
    }

    // numbering follows the mapping count; names a peer already claimed are skipped
    fn assign_new_alias(&mut self, type_uri: &str) -> String {
        let mut n = self.type_uri_to_alias.len() + 1;
        let alias = loop {
            let candidate = format!("alias{n}");
            if !self.is_alias_used(&candidate) {
                break candidate;
            }
            n += 1;
        };
        self.insert(&alias, type_uri);
        debug!(alias = %alias, type_uri, "alias assigned");
        alias
    }

    fn insert(&mut self, alias: &str, type_uri: &str) {
        self.alias_to_type_uri.insert(alias.to_owned(), type_uri.to_owned());
        self.type_uri_to_alias.insert(type_uri.to_owned(), alias.to_owned());
    }
}

fn non_empty(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ProtocolError::InvalidInput(format!("{what} must not be empty")));
    }
    Ok(())
}
