//! Consumer role: obtaining tokens from a service provider and signing resource
//! requests with them.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::{debug, info, instrument, warn};
use url::Url;
use zeroize::Zeroizing;

use super::{
    AccessProtectedResourceRequest, AuthorizedTokenRequest, AuthorizedTokenResponse, Callback,
    UnauthorizedTokenRequest, UnauthorizedTokenResponse, UserAuthorizationRequest,
    UserAuthorizationResponse, V10, V10A, channel::consumer_channel,
};
use crate::{
    bindings::{SignatureAlgorithm, SignatureSecrets, SigningBindingElement},
    channel::{Channel, IndirectMessage},
    clock::Clock,
    config::MessagingSettings,
    error::{ProtocolError, Result},
    messaging::{
        DescriptionCache, Fields, HttpDeliveryMethods, MessageReceivingEndpoint, ProtocolMessage,
        ProtocolVersion,
    },
    security::audit::redact_token,
    transport::{DirectTransport, HttpRequest},
};

/// The consumer's key, secret and the secrets of the tokens it holds.
pub struct ConsumerCredentials {
    consumer_key: String,
    consumer_secret: Zeroizing<String>,
    token_secrets: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl ConsumerCredentials {
    /// Creates credentials holding no tokens.
    #[must_use]
    pub fn new(consumer_key: &str, consumer_secret: &str) -> Self {
        Self {
            consumer_key: consumer_key.to_owned(),
            consumer_secret: Zeroizing::new(consumer_secret.to_owned()),
            token_secrets: RwLock::new(HashMap::new()),
        }
    }

    /// Consumer key.
    #[must_use]
    pub fn consumer_key(&self) -> &str {
        &self.consumer_key
    }

    /// Remembers the secret of a token.
    pub fn store_token_secret(&self, token: &str, secret: &str) {
        self.token_secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_owned(), Zeroizing::new(secret.to_owned()));
    }

    /// Forgets a token. Returns whether it was known.
    pub fn remove_token(&self, token: &str) -> bool {
        self.token_secrets.write().unwrap_or_else(PoisonError::into_inner).remove(token).is_some()
    }

    /// Whether the secret of `token` is known.
    #[must_use]
    pub fn has_token(&self, token: &str) -> bool {
        self.token_secrets.read().unwrap_or_else(PoisonError::into_inner).contains_key(token)
    }
}

impl fmt::Debug for ConsumerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens = self.token_secrets.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("ConsumerCredentials")
            .field("consumer_key", &self.consumer_key)
            .field("tokens", &tokens)
            .finish_non_exhaustive()
    }
}

impl SignatureSecrets for ConsumerCredentials {
    fn consumer_secret(&self, consumer_key: &str) -> Result<String> {
        if consumer_key != self.consumer_key {
            return Err(ProtocolError::ConsumerNotFound { consumer_key: consumer_key.to_owned() });
        }
        Ok(self.consumer_secret.as_str().to_owned())
    }

    fn token_secret(&self, token: &str) -> Result<String> {
        self.token_secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .map(|secret| secret.as_str().to_owned())
            .ok_or_else(|| ProtocolError::TokenNotFound {
                kind: "token".to_owned(),
                token: redact_token(token),
            })
    }
}

/// Where a service provider receives each message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProviderEndpoints {
    /// Request-token endpoint.
    pub request_token: MessageReceivingEndpoint,
    /// User-authorization endpoint, reached through the user agent.
    pub user_authorization: MessageReceivingEndpoint,
    /// Access-token endpoint.
    pub access_token: MessageReceivingEndpoint,
    /// Protocol version to speak.
    pub version: ProtocolVersion,
}

impl ServiceProviderEndpoints {
    /// Endpoints speaking 1.0a: token endpoints take a POST with an `Authorization`
    /// header, user authorization takes a GET.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidInput`] for an unparsable URL.
    pub fn new(request_token: &str, user_authorization: &str, access_token: &str) -> Result<Self> {
        let direct = HttpDeliveryMethods::POST | HttpDeliveryMethods::AUTHORIZATION_HEADER;
        Ok(Self {
            request_token: MessageReceivingEndpoint::parse(request_token, direct)?,
            user_authorization: MessageReceivingEndpoint::parse(
                user_authorization,
                HttpDeliveryMethods::GET,
            )?,
            access_token: MessageReceivingEndpoint::parse(access_token, direct)?,
            version: V10A,
        })
    }

    /// Speaks `version` instead of 1.0a.
    #[must_use]
    pub const fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }
}

/// Drives the consumer side of the three-legged flow.
#[derive(Debug)]
pub struct Consumer {
    channel: Channel,
    credentials: Arc<ConsumerCredentials>,
    endpoints: ServiceProviderEndpoints,
}

impl Consumer {
    /// Creates a consumer signing with HMAC-SHA1.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidConfiguration`] for invalid settings.
    pub fn new(
        endpoints: ServiceProviderEndpoints,
        credentials: Arc<ConsumerCredentials>,
        clock: Arc<dyn Clock>,
        settings: &MessagingSettings,
    ) -> Result<Self> {
        let descriptions = DescriptionCache::new();
        let signing = SigningBindingElement::new(
            SignatureAlgorithm::HmacSha1,
            credentials.clone(),
            descriptions.clone(),
        );
        let nonce_store = Arc::new(settings.nonce_store(clock.clone()));
        let channel = consumer_channel(Box::new(signing), descriptions, nonce_store, clock, settings)?;
        Ok(Self::with_channel(endpoints, credentials, channel))
    }

    /// Creates a consumer over an assembled channel, for other signature methods.
    #[must_use]
    pub const fn with_channel(
        endpoints: ServiceProviderEndpoints,
        credentials: Arc<ConsumerCredentials>,
        channel: Channel,
    ) -> Self {
        Self { channel, credentials, endpoints }
    }

    /// Channel used for every message.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Credentials, including the secrets of obtained tokens.
    #[must_use]
    pub fn credentials(&self) -> &ConsumerCredentials {
        &self.credentials
    }

    /// Service-provider endpoints.
    #[must_use]
    pub const fn endpoints(&self) -> &ServiceProviderEndpoints {
        &self.endpoints
    }

    /// Obtains an unauthorized request token and remembers its secret.
    ///
    /// Since 1.0a the callback travels with this request; `None` asks for an
    /// out-of-band verifier.
    ///
    /// # Errors
    ///
    /// Any channel error, for instance [`ProtocolError::CommunicationFailure`].
    #[instrument(skip_all, fields(consumer_key = %self.credentials.consumer_key))]
    pub async fn obtain_request_token<T: DirectTransport>(
        &self,
        transport: &T,
        callback: Option<&Url>,
        extra_data: &Fields,
    ) -> Result<UnauthorizedTokenResponse> {
        let version = self.endpoints.version;
        let mut request = UnauthorizedTokenRequest::new(
            self.endpoints.request_token.clone(),
            version,
            &self.credentials.consumer_key,
        );
        if version >= V10A {
            request.callback = Some(callback.cloned().map_or(Callback::OutOfBand, Callback::Url));
        }
        request.extra_data.clone_from(extra_data);

        let response: UnauthorizedTokenResponse =
            self.channel.send_expecting(transport, &mut request).await?;
        if response.version() < version {
            warn!(requested = %version, granted = %response.version(), "service provider did not confirm the callback");
        }
        self.credentials.store_token_secret(&response.request_token, &response.token_secret);
        debug!(token = %redact_token(&response.request_token), "request token obtained");
        Ok(response)
    }

    /// Builds the user-authorization request for an obtained request token.
    ///
    /// The callback only rides along here when speaking 1.0.
    #[must_use]
    pub fn prepare_user_authorization(
        &self,
        token: &UnauthorizedTokenResponse,
        callback: Option<&Url>,
    ) -> UserAuthorizationRequest {
        let mut request =
            UserAuthorizationRequest::new(self.endpoints.user_authorization.clone(), token.version());
        request.request_token.clone_from(&token.request_token);
        if token.version() < V10A {
            request.callback = callback.cloned();
        }
        request
    }

    /// Obtains a request token and prepares the user-agent redirect to authorize it.
    ///
    /// Returns the redirect and the request token.
    ///
    /// # Errors
    ///
    /// Any channel error.
    pub async fn request_user_authorization<T: DirectTransport>(
        &self,
        transport: &T,
        callback: Option<&Url>,
    ) -> Result<(IndirectMessage, String)> {
        let token = self.obtain_request_token(transport, callback, &Fields::new()).await?;
        let mut request = self.prepare_user_authorization(&token, callback);
        let redirect = self.channel.send_indirect(&mut request)?;
        Ok((redirect, token.request_token))
    }

    /// Reads the service provider's redirect back to the callback, if this request is
    /// one.
    ///
    /// # Errors
    ///
    /// Any incoming pipeline error.
    pub fn process_user_authorization(
        &self,
        request: &HttpRequest,
    ) -> Result<Option<UserAuthorizationResponse>> {
        let Some(response) = self.channel.read_request::<UserAuthorizationResponse>(request)? else {
            return Ok(None);
        };
        if !self.credentials.has_token(&response.request_token) {
            warn!(token = %redact_token(&response.request_token), "callback for a token this consumer never requested");
            return Err(ProtocolError::TokenNotFound {
                kind: "request token".to_owned(),
                token: redact_token(&response.request_token),
            });
        }
        Ok(Some(response))
    }

    /// Exchanges an authorized request token for an access token.
    ///
    /// A verifier makes this a 1.0a exchange. The access token's secret replaces the
    /// request token's.
    ///
    /// # Errors
    ///
    /// Any channel error.
    #[instrument(skip_all, fields(token = %redact_token(request_token)))]
    pub async fn exchange_for_access_token<T: DirectTransport>(
        &self,
        transport: &T,
        request_token: &str,
        verifier: Option<&str>,
    ) -> Result<AuthorizedTokenResponse> {
        let version = if verifier.is_some() { V10A } else { V10 };
        let mut request = AuthorizedTokenRequest::new(
            self.endpoints.access_token.clone(),
            version,
            &self.credentials.consumer_key,
            request_token,
        );
        if let Some(verifier) = verifier {
            verifier.clone_into(&mut request.verifier);
        }

        let response: AuthorizedTokenResponse =
            self.channel.send_expecting(transport, &mut request).await?;
        self.credentials.remove_token(request_token);
        self.credentials.store_token_secret(&response.access_token, &response.token_secret);
        info!(token = %redact_token(&response.access_token), "access token obtained");
        Ok(response)
    }

    /// Prepares a signed request for a protected resource.
    ///
    /// `endpoint`'s query string and `extra_data` are both covered by the signature.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TokenNotFound`] if the access token's secret is unknown;
    /// outgoing pipeline errors.
    pub fn prepare_authorized_request(
        &self,
        endpoint: MessageReceivingEndpoint,
        access_token: &str,
        extra_data: &Fields,
    ) -> Result<HttpRequest> {
        let mut request = AccessProtectedResourceRequest::new(endpoint, self.endpoints.version);
        self.credentials.consumer_key.clone_into(&mut request.signed.consumer_key);
        access_token.clone_into(&mut request.access_token);
        request.extra_data.clone_from(extra_data);
        self.channel.prepare_direct_request(&mut request)
    }
}
