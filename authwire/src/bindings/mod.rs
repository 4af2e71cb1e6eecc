//! Binding elements: pluggable transforms applied to every message on a channel.
//!
//! Outgoing messages pass through the elements in order; incoming messages pass
//! through them in reverse. Each element reports the protection it applied, and the
//! channel checks the union against what the message requires.
//!
//! # Ordering
//!
//! [`order_binding_elements`] puts elements without a protection first, keeping their
//! registration order, then the protection elements from the highest protection bit to
//! the lowest: replay, expiration, tamper. On the way out the nonce and timestamp are
//! therefore in place before the signature is computed; on the way in the signature is
//! checked before the nonce is recorded.

use std::fmt;

use tracing::debug;

use crate::{
    error::{ProtocolError, Result},
    messaging::{MessageProtections, ProtocolMessage},
};

pub mod expiration;
pub mod replay;
pub mod signing;
pub mod token;

#[cfg(test)]
mod tests;

pub use expiration::StandardExpirationBindingElement;
pub use replay::{MemoryNonceStore, NonceStore, StandardReplayProtectionBindingElement};
pub use signing::{
    SignatureAlgorithm, SignatureSecrets, SigningBindingElement, SigningBindingElementChain,
    compute_signature, signature_base_string,
};
pub use token::TokenHandlingBindingElement;

/// A transform applied to messages entering or leaving a channel.
///
/// Elements receive their collaborators (clock, nonce store, token manager, secrets)
/// at construction; they never hold a reference back to the channel.
pub trait BindingElement: Send + Sync + fmt::Debug {
    /// Protection this element provides, or [`MessageProtections::NONE`].
    fn protection(&self) -> MessageProtections;

    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Prepares an outgoing message.
    ///
    /// Returns the protection applied, or `None` if the element did not apply to this
    /// message.
    ///
    /// # Errors
    ///
    /// Any error aborts the send; nothing is transmitted.
    fn prepare_outgoing(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>>;

    /// Validates an incoming message.
    ///
    /// Returns the protection verified, or `None` if the element did not apply to this
    /// message.
    ///
    /// # Errors
    ///
    /// A protocol error describing the failed check.
    fn process_incoming(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>>;
}

/// Protections that must be present before the keyed one may be configured.
const PROTECTION_DEPENDENCIES: [(MessageProtections, MessageProtections); 2] = [
    (MessageProtections::EXPIRATION, MessageProtections::TAMPER_PROTECTION),
    (MessageProtections::REPLAY_PROTECTION, MessageProtections::EXPIRATION),
];

/// Orders binding elements for an outgoing pipeline.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingProtectionDependency`] when expiration is configured
/// without tamper protection, or replay protection without expiration. An unsigned
/// timestamp or nonce can be rewritten by anyone.
pub fn order_binding_elements(
    elements: Vec<Box<dyn BindingElement>>,
) -> Result<Vec<Box<dyn BindingElement>>> {
    let configured = elements
        .iter()
        .fold(MessageProtections::NONE, |acc, element| acc | element.protection());
    for (protection, requires) in PROTECTION_DEPENDENCIES {
        if configured.contains(protection) && !configured.contains(requires) {
            return Err(ProtocolError::MissingProtectionDependency { protection, requires });
        }
    }

    let (mut ordered, mut protecting): (Vec<_>, Vec<_>) =
        elements.into_iter().partition(|element| element.protection().is_empty());
    protecting.sort_by_key(|element| std::cmp::Reverse(element.protection().bits()));
    ordered.append(&mut protecting);

    debug!(
        order = ?ordered.iter().map(|e| e.name()).collect::<Vec<_>>(),
        "binding elements ordered"
    );
    Ok(ordered)
}
