//! OpenID extension aliasing.
//!
//! OpenID multiplexes any number of extensions onto the flat `openid.` namespace. An
//! extension is declared as `openid.ns.<alias>=<type URI>` and its arguments follow as
//! `openid.<alias>.<key>`:
//!
//! ```text
//! openid.ns.sreg=http://openid.net/extensions/sreg/1.1
//! openid.sreg.nickname=bob
//! ```
//!
//! [`AliasManager`] keeps the alias/type-URI bijection for one message and
//! [`ExtensionArgumentsManager`] splits or assembles the argument sets. OpenID 1.x peers
//! may omit the declarations for well-known extensions; an [`AliasAffinity`] registry
//! supplies their conventional aliases.

pub mod alias;
pub mod extensions;

#[cfg(test)]
mod tests;

use indexmap::IndexMap;

pub use alias::AliasManager;
pub use extensions::{ExtensionArgumentsManager, Reading, Writing};

use crate::{
    error::{ProtocolError, Result},
    messaging::{Fields, ProtocolVersion},
};

/// Prefix of every OpenID field in a query or form.
pub const PREFIX: &str = "openid.";

/// Field declaring the protocol namespace.
pub const NAMESPACE: &str = "openid.ns";

/// Prefix of extension alias declarations.
pub const ALIAS_DECLARATION_PREFIX: &str = "openid.ns.";

/// OpenID 1.0.
pub const V10: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

/// OpenID 1.1.
pub const V11: ProtocolVersion = ProtocolVersion::new(1, 1, 0);

/// OpenID 2.0.
pub const V20: ProtocolVersion = ProtocolVersion::new(2, 0, 0);

/// `openid.ns` value of OpenID 2.0 messages.
pub const V20_NAMESPACE: &str = "http://specs.openid.net/auth/2.0";

const V11_NAMESPACE: &str = "http://openid.net/signon/1.1";
const V10_NAMESPACE: &str = "http://openid.net/signon/1.0";

/// Simple Registration 1.1.
pub const SREG_TYPE_URI: &str = "http://openid.net/extensions/sreg/1.1";

/// Provider Authentication Policy 1.0.
pub const PAPE_TYPE_URI: &str = "http://specs.openid.net/extensions/pape/1.0";

/// Detects the OpenID version of a message from its `openid.ns` field.
///
/// 1.x messages carry no namespace and are reported as 1.1, the wire-compatible
/// superset of 1.0.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedField`] for an unknown namespace.
///
/// # Examples
///
/// ```
/// use authwire::{messaging::Fields, openid};
///
/// let mut fields = Fields::new();
/// assert_eq!(openid::detect_version(&fields).unwrap(), openid::V11);
///
/// fields.insert("openid.ns".to_owned(), openid::V20_NAMESPACE.to_owned());
/// assert_eq!(openid::detect_version(&fields).unwrap(), openid::V20);
/// ```
pub fn detect_version(fields: &Fields) -> Result<ProtocolVersion> {
    match fields.get(NAMESPACE).map(String::as_str) {
        None | Some(V11_NAMESPACE) => Ok(V11),
        Some(V20_NAMESPACE) => Ok(V20),
        Some(V10_NAMESPACE) => Ok(V10),
        Some(other) => Err(ProtocolError::MalformedField {
            message_type: "OpenID message".to_owned(),
            field: NAMESPACE.to_owned(),
            reason: format!("unknown protocol namespace {other:?}"),
        }),
    }
}

/// Preferred aliases per extension type URI.
///
/// Read mode uses it to resolve undeclared shorthands from 1.x peers; write mode offers
/// the aliases to [`AliasManager::assign_aliases`]. The default registry holds `sreg`
/// and `pape`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasAffinity {
    preferred: IndexMap<String, String>,
}

impl AliasAffinity {
    /// An empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self { preferred: IndexMap::new() }
    }

    /// Adds or replaces the preferred alias of `type_uri`.
    #[must_use]
    pub fn with(mut self, type_uri: &str, alias: &str) -> Self {
        self.preferred.insert(type_uri.to_owned(), alias.to_owned());
        self
    }

    /// Preferred alias of `type_uri`.
    #[must_use]
    pub fn preferred_alias(&self, type_uri: &str) -> Option<&str> {
        self.preferred.get(type_uri).map(String::as_str)
    }

    /// `(type URI, alias)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.preferred.iter().map(|(uri, alias)| (uri.as_str(), alias.as_str()))
    }
}

impl Default for AliasAffinity {
    fn default() -> Self {
        Self::empty().with(SREG_TYPE_URI, "sreg").with(PAPE_TYPE_URI, "pape")
    }
}
