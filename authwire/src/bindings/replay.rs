//! Nonce-based replay protection.

use std::{
    fmt,
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    BindingElement,
    expiration::{DEFAULT_MAXIMUM_CLOCK_SKEW, DEFAULT_MAXIMUM_MESSAGE_LIFETIME},
};
use crate::{
    audit,
    clock::Clock,
    error::{ProtocolError, Result},
    messaging::{MessageProtections, ProtocolMessage},
    security::audit::AuditEventType,
};

/// Default number of random characters in a generated nonce.
pub const DEFAULT_NONCE_LENGTH: usize = 8;

/// Default number of nonces remembered by [`MemoryNonceStore`].
pub const DEFAULT_NONCE_STORE_CAPACITY: usize = 10_000;

/// Records nonces so each may be used once.
pub trait NonceStore: Send + Sync + fmt::Debug {
    /// Records `nonce` for `context`.
    ///
    /// Returns `false` when the nonce was already used within its retention window, or
    /// when `timestamp` is too old to be checked at all. Two concurrent calls with the
    /// same arguments never both return `true`.
    fn try_store(&self, context: &str, nonce: &str, timestamp: DateTime<Utc>) -> bool;
}

/// In-process nonce store with a fixed capacity.
///
/// Entries live for the maximum message age. A live entry is never evicted: when the
/// store is full, entries past their window are purged, and if none are, the new
/// nonce is refused so the message is rejected as a replay.
#[derive(Debug)]
pub struct MemoryNonceStore {
    entries: Mutex<LruCache<(String, String), DateTime<Utc>>>,
    maximum_age: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryNonceStore {
    /// Creates a store keeping up to `capacity` nonces for `maximum_age` each.
    #[must_use]
    pub fn new(capacity: usize, maximum_age: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)), maximum_age, clock }
    }

    /// Creates a store with the default capacity and the default maximum message age.
    #[must_use]
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::new(
            DEFAULT_NONCE_STORE_CAPACITY,
            DEFAULT_MAXIMUM_MESSAGE_LIFETIME + DEFAULT_MAXIMUM_CLOCK_SKEW,
            clock,
        )
    }

    /// Number of remembered nonces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no nonce is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NonceStore for MemoryNonceStore {
    fn try_store(&self, context: &str, nonce: &str, timestamp: DateTime<Utc>) -> bool {
        let now = self.clock.now();
        let live = |seen: &DateTime<Utc>| seen.checked_add_signed(self.maximum_age).is_none_or(|end| end >= now);
        if !live(&timestamp) {
            debug!(context, "nonce older than retention window");
            return false;
        }

        let key = (context.to_owned(), nonce.to_owned());
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.peek(&key).is_some_and(live) {
            return false;
        }
        if entries.len() >= entries.cap().get() && !entries.contains(&key) {
            let expired: Vec<_> =
                entries.iter().filter(|(_, seen)| !live(*seen)).map(|(key, _)| key.clone()).collect();
            for key in &expired {
                entries.pop(key);
            }
            debug!(purged = expired.len(), "purged expired nonces");
            if entries.len() >= entries.cap().get() {
                warn!(context, capacity = entries.cap().get(), "nonce store full of live entries");
                return false;
            }
        }
        entries.put(key, timestamp);
        true
    }
}

/// Adds a random nonce to outgoing messages and rejects reused ones.
#[derive(Debug, Clone)]
pub struct StandardReplayProtectionBindingElement {
    nonce_store: Arc<dyn NonceStore>,
    nonce_length: usize,
    allow_empty_nonce: bool,
}

impl StandardReplayProtectionBindingElement {
    /// Creates an element generating nonces of the default length.
    #[must_use]
    pub fn new(nonce_store: Arc<dyn NonceStore>) -> Self {
        Self { nonce_store, nonce_length: DEFAULT_NONCE_LENGTH, allow_empty_nonce: false }
    }

    /// Sets the length of generated nonces.
    #[must_use]
    pub const fn with_nonce_length(mut self, length: usize) -> Self {
        self.nonce_length = length;
        self
    }

    /// Accepts incoming messages with an empty nonce.
    #[must_use]
    pub const fn allow_empty_nonce(mut self, allow: bool) -> Self {
        self.allow_empty_nonce = allow;
        self
    }

    fn generate_nonce(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.nonce_length)
            .map(char::from)
            .collect()
    }
}

impl BindingElement for StandardReplayProtectionBindingElement {
    fn protection(&self) -> MessageProtections {
        MessageProtections::REPLAY_PROTECTION
    }

    fn name(&self) -> &'static str {
        "replay-protection"
    }

    fn prepare_outgoing(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        let Some(protected) = message.as_replay_protected_mut() else {
            return Ok(None);
        };
        protected.set_nonce(self.generate_nonce());
        Ok(Some(MessageProtections::REPLAY_PROTECTION))
    }

    #[instrument(skip(self, message), fields(message_type = message.type_name()))]
    fn process_incoming(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        let message_type = message.type_name();
        let Some(protected) = message.as_replay_protected() else {
            return Ok(None);
        };
        let nonce = protected.nonce();
        if nonce.is_empty() && !self.allow_empty_nonce {
            return Err(ProtocolError::MalformedField {
                message_type: message_type.to_owned(),
                field: "nonce".to_owned(),
                reason: "nonce must not be empty".to_owned(),
            });
        }
        let created = protected.creation_date().ok_or_else(|| {
            ProtocolError::MalformedMessage(format!("{message_type} carries no creation timestamp"))
        })?;

        let context = protected.nonce_context();
        if !self.nonce_store.try_store(context, nonce, created) {
            warn!(context, nonce, "replayed nonce rejected");
            audit!(
                AuditEventType::ReplayRejected,
                context,
                Uuid::new_v4(),
                with_message_type(message_type),
                with_nonce(nonce)
            );
            return Err(ProtocolError::ReplayDetected {
                context: context.to_owned(),
                nonce: nonce.to_owned(),
            });
        }
        Ok(Some(MessageProtections::REPLAY_PROTECTION))
    }
}
