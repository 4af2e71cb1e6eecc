//! Token and consumer storage for the service provider.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use rsa::{RsaPublicKey, pkcs8::DecodePublicKey};
use thiserror::Error;
use url::Url;

use super::{Callback, service_provider::VerificationCodeFormat};
use crate::{
    bindings::SignatureSecrets,
    error::{ProtocolError, Result},
    messaging::ProtocolVersion,
    security::audit::redact_token,
};

/// What kind of key a lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// A consumer key.
    Consumer,
    /// A request token.
    RequestToken,
    /// An access token.
    AccessToken,
    /// A token of either kind.
    Token,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Consumer => "consumer",
            Self::RequestToken => "request token",
            Self::AccessToken => "access token",
            Self::Token => "token",
        })
    }
}

/// A storage lookup miss.
#[derive(Debug, Clone, Error)]
#[error("{kind} not found")]
pub struct KeyNotFound {
    /// Kind of key looked up.
    pub kind: KeyKind,
    /// The key.
    pub key: String,
}

impl KeyNotFound {
    /// Creates a miss for `key`.
    #[must_use]
    pub fn new(kind: KeyKind, key: &str) -> Self {
        Self { kind, key: key.to_owned() }
    }
}

impl From<KeyNotFound> for ProtocolError {
    fn from(error: KeyNotFound) -> Self {
        match error.kind {
            KeyKind::Consumer => Self::ConsumerNotFound { consumer_key: error.key },
            kind => Self::TokenNotFound { kind: kind.to_string(), token: redact_token(&error.key) },
        }
    }
}

/// Kind of a stored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// Unauthorized or authorized request token.
    Request,
    /// Access token.
    Access,
    /// Unknown or expired.
    Invalid,
}

/// A registered consumer.
#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    /// Consumer key.
    pub key: String,
    /// Shared secret.
    pub secret: String,
    /// Public key for RSA-SHA1 signatures.
    pub public_key: Option<RsaPublicKey>,
    /// Pre-registered callback.
    pub callback: Option<Url>,
    /// Verifier format to issue.
    pub verification_code_format: VerificationCodeFormat,
    /// Verifier length to issue.
    pub verification_code_length: usize,
}

impl ConsumerRecord {
    /// Creates a record with the default verifier settings.
    #[must_use]
    pub fn new(key: &str, secret: &str) -> Self {
        Self {
            key: key.to_owned(),
            secret: secret.to_owned(),
            public_key: None,
            callback: None,
            verification_code_format: VerificationCodeFormat::IncludedInCallback,
            verification_code_length: super::service_provider::DEFAULT_VERIFIER_LENGTH,
        }
    }

    /// Registers a callback.
    #[must_use]
    pub fn with_callback(mut self, callback: Url) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Registers an RSA public key from SPKI PEM.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CryptoError`] if the PEM cannot be parsed.
    pub fn with_public_key_pem(mut self, pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| ProtocolError::CryptoError(format!("invalid RSA public key: {e}")))?;
        self.public_key = Some(key);
        Ok(self)
    }

    /// Chooses the verifier format and length.
    #[must_use]
    pub const fn with_verification_code(mut self, format: VerificationCodeFormat, length: usize) -> Self {
        self.verification_code_format = format;
        self.verification_code_length = length;
        self
    }
}

/// An issued request token.
#[derive(Debug, Clone)]
pub struct RequestTokenRecord {
    /// Token.
    pub token: String,
    /// Token secret.
    pub secret: String,
    /// Consumer it was issued to.
    pub consumer_key: String,
    /// Protocol version the consumer used to obtain it.
    pub consumer_version: ProtocolVersion,
    /// Callback supplied with the token request.
    pub callback: Option<Callback>,
    /// Issue time.
    pub created_on: DateTime<Utc>,
    /// Verifier issued when the user authorized the token.
    pub verifier: Option<String>,
    /// User who authorized the token.
    pub authorized_by: Option<String>,
}

/// An issued access token.
#[derive(Debug, Clone)]
pub struct AccessTokenRecord {
    /// Token.
    pub token: String,
    /// Token secret.
    pub secret: String,
    /// Consumer it was issued to.
    pub consumer_key: String,
    /// User who authorized access.
    pub username: Option<String>,
    /// Granted roles.
    pub roles: Vec<String>,
    /// Issue time.
    pub created_on: DateTime<Utc>,
    /// Expiration, if the token expires.
    pub expiration_date: Option<DateTime<Utc>>,
}

/// Service-provider token store.
///
/// Lookups return [`KeyNotFound`] on a miss; the pipeline converts it to a protocol
/// error at the boundary.
pub trait TokenManager: Send + Sync + fmt::Debug {
    /// Looks up a consumer.
    ///
    /// # Errors
    ///
    /// [`KeyNotFound`] for an unknown consumer key.
    fn get_consumer(&self, consumer_key: &str) -> std::result::Result<ConsumerRecord, KeyNotFound>;

    /// Looks up a request token.
    ///
    /// # Errors
    ///
    /// [`KeyNotFound`] for an unknown token.
    fn get_request_token(&self, token: &str)
    -> std::result::Result<RequestTokenRecord, KeyNotFound>;

    /// Looks up an access token.
    ///
    /// # Errors
    ///
    /// [`KeyNotFound`] for an unknown token.
    fn get_access_token(&self, token: &str) -> std::result::Result<AccessTokenRecord, KeyNotFound>;

    /// Secret of a request or access token.
    ///
    /// # Errors
    ///
    /// [`KeyNotFound`] for an unknown token.
    fn get_token_secret(&self, token: &str) -> std::result::Result<String, KeyNotFound>;

    /// Classifies a token.
    fn get_token_type(&self, token: &str) -> TokenType;

    /// Stores a newly issued request token.
    fn store_new_request_token(&self, record: RequestTokenRecord);

    /// Replaces a stored request token record.
    ///
    /// # Errors
    ///
    /// [`KeyNotFound`] if the token was never stored.
    fn update_token(&self, record: RequestTokenRecord) -> std::result::Result<(), KeyNotFound>;

    /// Whether a user has authorized the request token.
    fn is_request_token_authorized(&self, token: &str) -> bool;

    /// Removes `request_token` and stores `access_token` in one atomic step.
    ///
    /// No concurrent reader may observe a state where neither token exists.
    ///
    /// # Errors
    ///
    /// [`KeyNotFound`] if the request token is unknown or was issued to another consumer.
    fn expire_request_token_and_store_access_token(
        &self,
        consumer_key: &str,
        request_token: &str,
        access_token: AccessTokenRecord,
    ) -> std::result::Result<(), KeyNotFound>;
}

#[derive(Debug, Default)]
struct TokenState {
    consumers: HashMap<String, ConsumerRecord>,
    request_tokens: HashMap<String, RequestTokenRecord>,
    access_tokens: HashMap<String, AccessTokenRecord>,
}

/// In-memory [`TokenManager`]. All state sits behind one lock.
#[derive(Debug, Default)]
pub struct InMemoryTokenManager {
    state: Mutex<TokenState>,
}

impl InMemoryTokenManager {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a consumer, replacing any previous registration.
    pub fn add_consumer(&self, consumer: ConsumerRecord) {
        self.state().consumers.insert(consumer.key.clone(), consumer);
    }

    /// Records that `username` authorized `token`.
    ///
    /// # Errors
    ///
    /// [`KeyNotFound`] for an unknown request token.
    pub fn authorize_request_token(
        &self,
        token: &str,
        username: &str,
    ) -> std::result::Result<(), KeyNotFound> {
        let mut state = self.state();
        let record = state
            .request_tokens
            .get_mut(token)
            .ok_or_else(|| KeyNotFound::new(KeyKind::RequestToken, token))?;
        record.authorized_by = Some(username.to_owned());
        Ok(())
    }
}

impl TokenManager for InMemoryTokenManager {
    fn get_consumer(&self, consumer_key: &str) -> std::result::Result<ConsumerRecord, KeyNotFound> {
        self.state()
            .consumers
            .get(consumer_key)
            .cloned()
            .ok_or_else(|| KeyNotFound::new(KeyKind::Consumer, consumer_key))
    }

    fn get_request_token(
        &self,
        token: &str,
    ) -> std::result::Result<RequestTokenRecord, KeyNotFound> {
        self.state()
            .request_tokens
            .get(token)
            .cloned()
            .ok_or_else(|| KeyNotFound::new(KeyKind::RequestToken, token))
    }

    fn get_access_token(&self, token: &str) -> std::result::Result<AccessTokenRecord, KeyNotFound> {
        self.state()
            .access_tokens
            .get(token)
            .cloned()
            .ok_or_else(|| KeyNotFound::new(KeyKind::AccessToken, token))
    }

    fn get_token_secret(&self, token: &str) -> std::result::Result<String, KeyNotFound> {
        let state = self.state();
        state
            .request_tokens
            .get(token)
            .map(|r| r.secret.clone())
            .or_else(|| state.access_tokens.get(token).map(|a| a.secret.clone()))
            .ok_or_else(|| KeyNotFound::new(KeyKind::Token, token))
    }

    fn get_token_type(&self, token: &str) -> TokenType {
        let state = self.state();
        if state.request_tokens.contains_key(token) {
            TokenType::Request
        } else if state.access_tokens.contains_key(token) {
            TokenType::Access
        } else {
            TokenType::Invalid
        }
    }

    fn store_new_request_token(&self, record: RequestTokenRecord) {
        self.state().request_tokens.insert(record.token.clone(), record);
    }

    fn update_token(&self, record: RequestTokenRecord) -> std::result::Result<(), KeyNotFound> {
        let mut state = self.state();
        match state.request_tokens.get_mut(&record.token) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(KeyNotFound::new(KeyKind::RequestToken, &record.token)),
        }
    }

    fn is_request_token_authorized(&self, token: &str) -> bool {
        self.state().request_tokens.get(token).is_some_and(|r| r.authorized_by.is_some())
    }

    fn expire_request_token_and_store_access_token(
        &self,
        consumer_key: &str,
        request_token: &str,
        access_token: AccessTokenRecord,
    ) -> std::result::Result<(), KeyNotFound> {
        let mut state = self.state();
        let issued_to_consumer = state
            .request_tokens
            .get(request_token)
            .is_some_and(|r| r.consumer_key == consumer_key);
        if !issued_to_consumer {
            return Err(KeyNotFound::new(KeyKind::RequestToken, request_token));
        }
        state.request_tokens.remove(request_token);
        state.access_tokens.insert(access_token.token.clone(), access_token);
        Ok(())
    }
}

/// Serves signing secrets from a [`TokenManager`].
#[derive(Debug, Clone)]
pub struct TokenManagerSecrets {
    token_manager: Arc<dyn TokenManager>,
}

impl TokenManagerSecrets {
    /// Wraps `token_manager`.
    #[must_use]
    pub fn new(token_manager: Arc<dyn TokenManager>) -> Self {
        Self { token_manager }
    }
}

impl SignatureSecrets for TokenManagerSecrets {
    fn consumer_secret(&self, consumer_key: &str) -> Result<String> {
        Ok(self.token_manager.get_consumer(consumer_key)?.secret)
    }

    fn token_secret(&self, token: &str) -> Result<String> {
        Ok(self.token_manager.get_token_secret(token)?)
    }

    fn consumer_public_key(&self, consumer_key: &str) -> Result<Option<RsaPublicKey>> {
        Ok(self.token_manager.get_consumer(consumer_key)?.public_key)
    }
}
