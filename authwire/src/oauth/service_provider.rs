//! Service-provider role: issuing request tokens, authorizing them, and exchanging them
//! for access tokens.
//!
//! The [`ServiceProvider`] reads requests through its channel, which has already
//! verified signatures, nonces, timestamps and verifiers by the time a typed message is
//! returned. What remains here is policy: which callback to use, which verifier to
//! issue, and whether a token may be exchanged.

use std::{fmt, sync::Arc};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, RngCore};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::{
    AccessProtectedResourceRequest, AccessTokenRecord, AuthorizedTokenRequest,
    AuthorizedTokenResponse, Callback, RequestTokenRecord, TokenManager, TokenType,
    UnauthorizedTokenRequest, UnauthorizedTokenResponse, UserAuthorizationRequest,
    UserAuthorizationResponse, V10, V10A, channel::service_provider_channel,
};
use crate::{
    audit,
    bindings::NonceStore,
    channel::{Channel, IndirectMessage},
    clock::Clock,
    config::MessagingSettings,
    error::{ProtocolError, Result},
    messaging::{HttpDeliveryMethods, MessageReceivingEndpoint, ProtocolMessage, ProtocolVersion},
    security::audit::{AuditEventType, redact_token},
    transport::{HttpRequest, HttpResponse},
};

/// Default verifier length.
pub const DEFAULT_VERIFIER_LENGTH: usize = 5;

const NO_LOOK_ALIKES: &[u8] = b"23456789abcdefghjkmnpqrstwxyzABCDEFGHJKMNPQRSTWXYZ";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";

/// Shape of the verifier issued when a user authorizes a request token.
///
/// Verifiers the user has to type benefit from a restricted alphabet; verifiers carried
/// in the callback URL can be opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationCodeFormat {
    /// Random bytes, base64url encoded. `length` counts bytes.
    #[default]
    IncludedInCallback,
    /// Letters and digits without `0`/`O`, `1`/`l`/`I` and similar pairs.
    AlphaNumericNoLookAlikes,
    /// Uppercase letters.
    AlphaUpper,
    /// Lowercase letters.
    AlphaLower,
    /// Digits.
    Numeric,
}

/// Creates a random verifier.
///
/// # Examples
///
/// ```
/// use authwire::oauth::{VerificationCodeFormat, create_verification_code};
///
/// let code = create_verification_code(VerificationCodeFormat::Numeric, 6);
/// assert_eq!(code.len(), 6);
/// assert!(code.chars().all(|c| c.is_ascii_digit()));
/// ```
#[must_use]
pub fn create_verification_code(format: VerificationCodeFormat, length: usize) -> String {
    let mut rng = rand::thread_rng();
    let alphabet = match format {
        VerificationCodeFormat::IncludedInCallback => {
            let mut bytes = vec![0_u8; length];
            rng.fill_bytes(&mut bytes);
            return URL_SAFE_NO_PAD.encode(bytes);
        }
        VerificationCodeFormat::AlphaNumericNoLookAlikes => NO_LOOK_ALIKES,
        VerificationCodeFormat::AlphaUpper => UPPER,
        VerificationCodeFormat::AlphaLower => LOWER,
        VerificationCodeFormat::Numeric => DIGITS,
    };
    (0..length).map(|_| char::from(alphabet[rng.gen_range(0..alphabet.len())])).collect()
}

/// Mints token and secret strings.
pub trait TokenGenerator: Send + Sync + fmt::Debug {
    /// New request token for `consumer_key`.
    fn generate_request_token(&self, consumer_key: &str) -> String;

    /// New access token for `consumer_key`.
    fn generate_access_token(&self, consumer_key: &str) -> String;

    /// New token secret.
    fn generate_secret(&self) -> String;
}

/// Random UUID tokens and 16-byte base64url secrets.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardTokenGenerator;

impl TokenGenerator for StandardTokenGenerator {
    fn generate_request_token(&self, _consumer_key: &str) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn generate_access_token(&self, _consumer_key: &str) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn generate_secret(&self) -> String {
        let mut bytes = [0_u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Drives the service-provider side of the three-legged flow.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use authwire::{
///     bindings::MemoryNonceStore,
///     clock::SystemClock,
///     config::MessagingSettings,
///     oauth::{ConsumerRecord, InMemoryTokenManager, ServiceProvider},
/// };
///
/// # fn main() -> authwire::Result<()> {
/// let clock = Arc::new(SystemClock);
/// let tokens = Arc::new(InMemoryTokenManager::new());
/// tokens.add_consumer(ConsumerRecord::new("ck1", "consumer-secret"));
/// let nonces = Arc::new(MemoryNonceStore::with_defaults(clock.clone()));
///
/// let provider =
///     ServiceProvider::from_settings(tokens, nonces, clock, &MessagingSettings::default())?;
/// assert_eq!(provider.minimum_consumer_version().to_string(), "1.0");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ServiceProvider {
    channel: Channel,
    token_manager: Arc<dyn TokenManager>,
    token_generator: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
    minimum_consumer_version: ProtocolVersion,
}

impl ServiceProvider {
    /// Creates a provider over an assembled channel.
    #[must_use]
    pub fn new(channel: Channel, token_manager: Arc<dyn TokenManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            channel,
            token_manager,
            token_generator: Arc::new(StandardTokenGenerator),
            clock,
            minimum_consumer_version: V10,
        }
    }

    /// Assembles the service-provider channel from `settings` and creates a provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidConfiguration`] for invalid settings.
    pub fn from_settings(
        token_manager: Arc<dyn TokenManager>,
        nonce_store: Arc<dyn NonceStore>,
        clock: Arc<dyn Clock>,
        settings: &MessagingSettings,
    ) -> Result<Self> {
        let channel =
            service_provider_channel(token_manager.clone(), nonce_store, clock.clone(), settings)?;
        Ok(Self::new(channel, token_manager, clock)
            .with_minimum_consumer_version(settings.service_provider.minimum_consumer_version))
    }

    /// Replaces the token generator.
    #[must_use]
    pub fn with_token_generator(mut self, generator: Arc<dyn TokenGenerator>) -> Self {
        self.token_generator = generator;
        self
    }

    /// Rejects token requests below `version`.
    #[must_use]
    pub const fn with_minimum_consumer_version(mut self, version: ProtocolVersion) -> Self {
        self.minimum_consumer_version = version;
        self
    }

    /// Channel used for every message.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Token store.
    #[must_use]
    pub fn token_manager(&self) -> &dyn TokenManager {
        self.token_manager.as_ref()
    }

    /// Lowest protocol version accepted on token requests.
    #[must_use]
    pub const fn minimum_consumer_version(&self) -> ProtocolVersion {
        self.minimum_consumer_version
    }

    /// Reads a request-token request.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnrecognizedMessage`] when the request carries another message
    ///   or none
    /// - [`ProtocolError::UnsupportedVersion`] below the minimum consumer version
    /// - Any incoming pipeline error
    #[instrument(skip_all)]
    pub fn read_token_request(&self, request: &HttpRequest) -> Result<UnauthorizedTokenRequest> {
        let message = self
            .channel
            .read_request::<UnauthorizedTokenRequest>(request)?
            .ok_or_else(|| ProtocolError::UnrecognizedMessage("no request token request".to_owned()))?;
        if message.version() < self.minimum_consumer_version {
            warn!(version = %message.version(), minimum = %self.minimum_consumer_version, "consumer version rejected");
            return Err(ProtocolError::UnsupportedVersion {
                minimum: self.minimum_consumer_version.to_string(),
                actual: message.version().to_string(),
            });
        }
        Ok(message)
    }

    /// Builds the response granting a fresh request token.
    ///
    /// The token is stored when the response passes through the channel.
    #[must_use]
    pub fn prepare_unauthorized_token_message(
        &self,
        request: &UnauthorizedTokenRequest,
    ) -> UnauthorizedTokenResponse {
        let token = self.token_generator.generate_request_token(&request.signed.consumer_key);
        let secret = self.token_generator.generate_secret();
        UnauthorizedTokenResponse::for_request(request, token, secret)
    }

    /// Encodes a response to a direct request.
    ///
    /// # Errors
    ///
    /// Outgoing pipeline errors.
    pub fn respond(&self, message: &mut dyn ProtocolMessage) -> Result<HttpResponse> {
        self.channel.prepare_direct_response(message)
    }

    /// Reads a user-authorization request, if the request carries one.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TokenNotFound`] or [`ProtocolError::TokenExpired`] for a bad
    /// token, or [`ProtocolError::UnrecognizedMessage`] for another message type.
    pub fn read_authorization_request(
        &self,
        request: &HttpRequest,
    ) -> Result<Option<UserAuthorizationRequest>> {
        self.channel.read_request(request)
    }

    /// Builds the redirect back to the consumer once the user has authorized the token.
    ///
    /// Returns `None` when no callback is known; show the user a verifier from
    /// [`issue_out_of_band_verifier`](Self::issue_out_of_band_verifier) instead.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TokenNotFound`] or [`ProtocolError::ConsumerNotFound`].
    #[instrument(skip_all, fields(token = %redact_token(&request.request_token)))]
    pub fn prepare_authorization_response(
        &self,
        request: &UserAuthorizationRequest,
    ) -> Result<Option<UserAuthorizationResponse>> {
        let record = self.token_manager.get_request_token(&request.request_token)?;
        let Some(callback) = self.callback_for(request, &record)? else {
            debug!("no callback, verifier must be shown out of band");
            return Ok(None);
        };

        let recipient = MessageReceivingEndpoint::new(
            callback,
            HttpDeliveryMethods::GET | HttpDeliveryMethods::POST,
        );
        let mut response = UserAuthorizationResponse::new(recipient, record.consumer_version);
        response.request_token.clone_from(&record.token);
        if record.consumer_version >= V10A {
            let consumer = self.token_manager.get_consumer(&record.consumer_key)?;
            response.verifier = create_verification_code(
                consumer.verification_code_format,
                consumer.verification_code_length,
            );
        }
        Ok(Some(response))
    }

    /// Prepares the authorization response for the user agent.
    ///
    /// # Errors
    ///
    /// Outgoing pipeline errors.
    pub fn send_authorization_response(
        &self,
        response: &mut UserAuthorizationResponse,
    ) -> Result<IndirectMessage> {
        self.channel.send_indirect(response)
    }

    /// Issues and records a verifier for display to the user.
    ///
    /// Returns `None` for 1.0 tokens, which carry no verifier.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TokenNotFound`] or [`ProtocolError::ConsumerNotFound`].
    pub fn issue_out_of_band_verifier(&self, request_token: &str) -> Result<Option<String>> {
        let mut record = self.token_manager.get_request_token(request_token)?;
        if record.consumer_version < V10A {
            return Ok(None);
        }
        let consumer = self.token_manager.get_consumer(&record.consumer_key)?;
        let verifier = create_verification_code(
            consumer.verification_code_format,
            consumer.verification_code_length,
        );
        record.verifier = Some(verifier.clone());
        self.token_manager.update_token(record)?;
        Ok(Some(verifier))
    }

    /// Reads an access-token request.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnrecognizedMessage`] when the request carries another message or
    /// none; any incoming pipeline error, notably [`ProtocolError::VerifierMismatch`].
    pub fn read_access_token_request(&self, request: &HttpRequest) -> Result<AuthorizedTokenRequest> {
        self.channel.read_request::<AuthorizedTokenRequest>(request)?.ok_or_else(|| {
            ProtocolError::UnrecognizedMessage("no access token request".to_owned())
        })
    }

    /// Exchanges an authorized request token for an access token.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::TokenNotAuthorized`] if no user authorized the token
    /// - [`ProtocolError::TokenNotFound`] if the token vanished or belongs to another
    ///   consumer
    #[instrument(skip_all, fields(token = %redact_token(&request.request_token)))]
    pub fn prepare_access_token_message(
        &self,
        request: &AuthorizedTokenRequest,
    ) -> Result<AuthorizedTokenResponse> {
        let consumer_key = request.signed.consumer_key.as_str();
        if !self.token_manager.is_request_token_authorized(&request.request_token) {
            warn!("request token not authorized");
            audit!(
                AuditEventType::TokenRejected,
                consumer_key,
                Uuid::new_v4(),
                with_token(&request.request_token),
                with_error("request token not authorized")
            );
            return Err(ProtocolError::TokenNotAuthorized {
                token: redact_token(&request.request_token),
            });
        }

        let record = self.token_manager.get_request_token(&request.request_token)?;
        let access_token = AccessTokenRecord {
            token: self.token_generator.generate_access_token(consumer_key),
            secret: self.token_generator.generate_secret(),
            consumer_key: consumer_key.to_owned(),
            username: record.authorized_by,
            roles: Vec::new(),
            created_on: self.clock.now(),
            expiration_date: None,
        };
        let mut response = AuthorizedTokenResponse::new(request.version());
        response.access_token.clone_from(&access_token.token);
        response.token_secret.clone_from(&access_token.secret);

        self.token_manager.expire_request_token_and_store_access_token(
            consumer_key,
            &request.request_token,
            access_token,
        )?;
        audit!(
            AuditEventType::AccessTokenIssued,
            consumer_key,
            Uuid::new_v4(),
            with_token(&response.access_token)
        );
        Ok(response)
    }

    /// Reads a protected-resource request, if the request carries one.
    ///
    /// # Errors
    ///
    /// Any incoming pipeline error; [`ProtocolError::TokenNotFound`] when the token is
    /// not an access token.
    pub fn read_protected_resource_authorization(
        &self,
        request: &HttpRequest,
    ) -> Result<Option<AccessProtectedResourceRequest>> {
        let Some(message) = self.channel.read_request::<AccessProtectedResourceRequest>(request)?
        else {
            return Ok(None);
        };
        if self.token_manager.get_token_type(&message.access_token) != TokenType::Access {
            return Err(ProtocolError::TokenNotFound {
                kind: "access token".to_owned(),
                token: redact_token(&message.access_token),
            });
        }
        Ok(Some(message))
    }

    /// Record of the access token a resource request was made with.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TokenNotFound`] for an unknown token.
    pub fn access_token_record(
        &self,
        request: &AccessProtectedResourceRequest,
    ) -> Result<AccessTokenRecord> {
        Ok(self.token_manager.get_access_token(&request.access_token)?)
    }

    /// 1.0a: the callback sent with the token request, else the registered one.
    /// 1.0: the registered callback, else the one on the authorization request.
    fn callback_for(
        &self,
        request: &UserAuthorizationRequest,
        record: &RequestTokenRecord,
    ) -> Result<Option<Url>> {
        let consumer = self.token_manager.get_consumer(&record.consumer_key)?;
        Ok(if record.consumer_version >= V10A {
            record.callback.as_ref().and_then(Callback::url).cloned().or(consumer.callback)
        } else {
            consumer.callback.or_else(|| request.callback.clone())
        })
    }
}
