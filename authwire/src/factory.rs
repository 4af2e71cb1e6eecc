//! Message-type dispatch for incoming field sets.
//!
//! The wire formats modeled here carry no type tag, so a factory decides which
//! concrete message a field set represents by looking at which fields are present
//! (and, where that is not enough, at stored state such as a token's recorded kind).

use std::fmt;

use crate::{
    error::Result,
    messaging::{Fields, MessageReceivingEndpoint, ProtocolMessage},
};

/// Creates empty message instances for incoming field sets.
///
/// Factories only pick and construct the type; the channel deserializes the fields into
/// it afterwards.
pub trait MessageFactory: Send + Sync + fmt::Debug {
    /// Picks the request type for `fields` received at `recipient`.
    ///
    /// Returns `Ok(None)` when the fields do not look like any known message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TokenNotFound`](crate::ProtocolError::TokenNotFound)
    /// when dispatch depends on a token the store does not know. That is distinct from
    /// "no message" and must not be swallowed.
    fn create_request(
        &self,
        fields: &Fields,
        recipient: &MessageReceivingEndpoint,
    ) -> Result<Option<Box<dyn ProtocolMessage>>>;

    /// Picks the response type for `fields` received in reply to `request`.
    ///
    /// Returns `Ok(None)` when the fields do not look like any response to `request`.
    ///
    /// # Errors
    ///
    /// Implementation-specific lookup failures.
    fn create_response(
        &self,
        request: &dyn ProtocolMessage,
        fields: &Fields,
    ) -> Result<Option<Box<dyn ProtocolMessage>>>;
}
