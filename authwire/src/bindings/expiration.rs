//! Freshness timestamps.

use std::sync::Arc;

use chrono::Duration;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::BindingElement;
use crate::{
    audit,
    clock::Clock,
    error::{ProtocolError, Result},
    messaging::{MessageProtections, ProtocolMessage},
    security::audit::AuditEventType,
};

/// Default time a message stays acceptable after creation.
pub const DEFAULT_MAXIMUM_MESSAGE_LIFETIME: Duration = Duration::seconds(180);

/// Default tolerance for clock differences between peers.
pub const DEFAULT_MAXIMUM_CLOCK_SKEW: Duration = Duration::seconds(600);

/// Stamps outgoing messages and rejects stale incoming ones.
///
/// A message is accepted while `created + lifetime + skew >= now` and
/// `created <= now + skew`.
#[derive(Debug, Clone)]
pub struct StandardExpirationBindingElement {
    clock: Arc<dyn Clock>,
    maximum_lifetime: Duration,
    maximum_clock_skew: Duration,
}

impl StandardExpirationBindingElement {
    /// Creates an element with the default lifetime and skew.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, DEFAULT_MAXIMUM_MESSAGE_LIFETIME, DEFAULT_MAXIMUM_CLOCK_SKEW)
    }

    /// Creates an element with explicit limits.
    #[must_use]
    pub fn with_limits(
        clock: Arc<dyn Clock>,
        maximum_lifetime: Duration,
        maximum_clock_skew: Duration,
    ) -> Self {
        Self { clock, maximum_lifetime, maximum_clock_skew }
    }

    /// Oldest acceptable message age: lifetime plus skew.
    #[must_use]
    pub fn maximum_message_age(&self) -> Duration {
        self.maximum_lifetime + self.maximum_clock_skew
    }
}

impl BindingElement for StandardExpirationBindingElement {
    fn protection(&self) -> MessageProtections {
        MessageProtections::EXPIRATION
    }

    fn name(&self) -> &'static str {
        "expiration"
    }

    fn prepare_outgoing(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        let Some(expiring) = message.as_expiring_mut() else {
            return Ok(None);
        };
        expiring.set_creation_date(self.clock.now());
        Ok(Some(MessageProtections::EXPIRATION))
    }

    #[instrument(skip(self, message), fields(message_type = message.type_name()))]
    fn process_incoming(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        let message_type = message.type_name();
        let Some(expiring) = message.as_expiring() else {
            return Ok(None);
        };
        let created = expiring.creation_date().ok_or_else(|| {
            ProtocolError::MalformedMessage(format!("{message_type} carries no creation timestamp"))
        })?;

        let now = self.clock.now();
        let expired_at = created.checked_add_signed(self.maximum_message_age()).ok_or_else(|| {
            ProtocolError::MalformedField {
                message_type: message_type.to_owned(),
                field: "timestamp".to_owned(),
                reason: format!("{created} is out of range"),
            }
        })?;
        if expired_at < now {
            warn!(%created, %expired_at, "message expired");
            audit!(
                AuditEventType::MessageExpired,
                consumer_key(message),
                Uuid::new_v4(),
                with_message_type(message_type),
                with_error(format!("expired at {expired_at}"))
            );
            return Err(ProtocolError::MessageExpired {
                message_type: message_type.to_owned(),
                created,
                expired_at,
            });
        }
        if now.checked_add_signed(self.maximum_clock_skew).is_none_or(|latest| created > latest) {
            warn!(%created, %now, "message timestamp in the future");
            audit!(
                AuditEventType::MessageExpired,
                consumer_key(message),
                Uuid::new_v4(),
                with_message_type(message_type),
                with_error(format!("created in the future at {created}"))
            );
            return Err(ProtocolError::MessageTimestampInFuture {
                message_type: message_type.to_owned(),
                created,
                now,
            });
        }
        Ok(Some(MessageProtections::EXPIRATION))
    }
}

fn consumer_key(message: &dyn ProtocolMessage) -> String {
    message.as_signed().map(|m| m.consumer_key().to_owned()).unwrap_or_default()
}
