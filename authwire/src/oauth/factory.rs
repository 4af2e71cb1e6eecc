//! OAuth message dispatch for both roles.
//!
//! Service provider, in order:
//!
//! 1. consumer key, no token: request-token request (1.0a if `oauth_callback` is
//!    present, else 1.0)
//! 2. consumer key and token: by the token's stored kind, an access-token exchange in
//!    the version the request token was issued for, or a protected-resource request;
//!    an unknown token is [`ProtocolError::TokenNotFound`]
//! 3. token only: user authorization, in the token's recorded version
//! 4. any other `oauth_` field: user authorization (some providers let the user type the
//!    token in); otherwise no message
//!
//! Consumer: callbacks carrying `oauth_token` are authorization responses (1.0a with
//! `oauth_verifier`); direct responses are typed by the request they answer.

use std::sync::Arc;

use tracing::debug;

use super::{
    AccessProtectedResourceRequest, AuthorizedTokenRequest, AuthorizedTokenResponse, CALLBACK,
    CALLBACK_CONFIRMED, CONSUMER_KEY, PARAMETER_PREFIX, TOKEN, TokenManager, TokenType,
    UnauthorizedTokenRequest, UnauthorizedTokenResponse, UserAuthorizationRequest,
    UserAuthorizationResponse, V10, V10A, VERIFIER,
};
use crate::{
    error::{ProtocolError, Result},
    factory::MessageFactory,
    messaging::{Fields, MessageReceivingEndpoint, ProtocolMessage},
    security::audit::redact_token,
};

/// Dispatches requests arriving at a service provider.
#[derive(Debug, Clone)]
pub struct ServiceProviderMessageFactory {
    token_manager: Arc<dyn TokenManager>,
}

impl ServiceProviderMessageFactory {
    /// Creates a factory consulting `token_manager` for token kinds.
    #[must_use]
    pub fn new(token_manager: Arc<dyn TokenManager>) -> Self {
        Self { token_manager }
    }
}

impl MessageFactory for ServiceProviderMessageFactory {
    fn create_request(
        &self,
        fields: &Fields,
        recipient: &MessageReceivingEndpoint,
    ) -> Result<Option<Box<dyn ProtocolMessage>>> {
        let recipient = recipient.clone();
        let token = fields.get(TOKEN).map(String::as_str);
        let message: Box<dyn ProtocolMessage> = match (fields.contains_key(CONSUMER_KEY), token) {
            (true, None) => {
                let version = if fields.contains_key(CALLBACK) { V10A } else { V10 };
                Box::new(UnauthorizedTokenRequest::new(recipient, version, ""))
            }
            (true, Some(token)) => match self.token_manager.get_token_type(token) {
                TokenType::Request => {
                    let record = self.token_manager.get_request_token(token)?;
                    Box::new(AuthorizedTokenRequest::new(recipient, record.consumer_version, "", token))
                }
                TokenType::Access => Box::new(AccessProtectedResourceRequest::new(recipient, V10)),
                TokenType::Invalid => {
                    debug!(token = %redact_token(token), "token of unknown kind");
                    return Err(ProtocolError::TokenNotFound {
                        kind: "token".to_owned(),
                        token: redact_token(token),
                    });
                }
            },
            (false, Some(token)) => {
                let version = self
                    .token_manager
                    .get_request_token(token)
                    .map_or(V10, |record| record.consumer_version);
                Box::new(UserAuthorizationRequest::new(recipient, version))
            }
            (false, None) if fields.keys().any(|key| key.starts_with(PARAMETER_PREFIX)) => {
                Box::new(UserAuthorizationRequest::new(recipient, V10))
            }
            (false, None) => return Ok(None),
        };
        debug!(message_type = message.type_name(), version = %message.version(), "request dispatched");
        Ok(Some(message))
    }

    fn create_response(
        &self,
        _request: &dyn ProtocolMessage,
        _fields: &Fields,
    ) -> Result<Option<Box<dyn ProtocolMessage>>> {
        Ok(None)
    }
}

/// Dispatches messages arriving at a consumer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumerMessageFactory;

impl ConsumerMessageFactory {
    /// Creates a factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MessageFactory for ConsumerMessageFactory {
    fn create_request(
        &self,
        fields: &Fields,
        recipient: &MessageReceivingEndpoint,
    ) -> Result<Option<Box<dyn ProtocolMessage>>> {
        if !fields.contains_key(TOKEN) {
            return Ok(None);
        }
        let version = if fields.contains_key(VERIFIER) { V10A } else { V10 };
        Ok(Some(Box::new(UserAuthorizationResponse::new(recipient.clone(), version))))
    }

    fn create_response(
        &self,
        request: &dyn ProtocolMessage,
        fields: &Fields,
    ) -> Result<Option<Box<dyn ProtocolMessage>>> {
        if request.is::<UnauthorizedTokenRequest>() {
            let version = if fields.contains_key(CALLBACK_CONFIRMED) { V10A } else { V10 };
            return Ok(Some(Box::new(UnauthorizedTokenResponse::new(version))));
        }
        if request.is::<AuthorizedTokenRequest>() {
            return Ok(Some(Box::new(AuthorizedTokenResponse::new(request.version()))));
        }
        Ok(None)
    }
}
