//! OAuth channel assembly.

use std::sync::Arc;

use super::{
    ConsumerMessageFactory, ServiceProviderMessageFactory, TokenManager, TokenManagerSecrets,
};
use crate::{
    bindings::{
        BindingElement, NonceStore, SignatureAlgorithm, SignatureSecrets, SigningBindingElement,
        SigningBindingElementChain, StandardExpirationBindingElement,
        StandardReplayProtectionBindingElement, TokenHandlingBindingElement,
    },
    channel::{Channel, ResponseEncoding},
    clock::Clock,
    config::MessagingSettings,
    error::Result,
    messaging::{DescriptionCache, MessageProtections, ProtocolMessage},
};

/// Records the HTTP verb an outgoing signed message will be sent with.
///
/// The verb is part of the signature base string, so it must be fixed before signing.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpMethodBindingElement;

impl BindingElement for HttpMethodBindingElement {
    fn protection(&self) -> MessageProtections {
        MessageProtections::NONE
    }

    fn name(&self) -> &'static str {
        "http-method"
    }

    fn prepare_outgoing(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        let Some(verb) = message.recipient().map(|r| r.methods.http_verb()) else {
            return Ok(None);
        };
        match message.as_signed_mut() {
            Some(signed) => {
                if signed.http_method().is_empty() {
                    signed.set_http_method(verb);
                }
                Ok(Some(MessageProtections::NONE))
            }
            None => Ok(None),
        }
    }

    fn process_incoming(
        &self,
        _message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        Ok(None)
    }
}

fn expiration(clock: Arc<dyn Clock>, settings: &MessagingSettings) -> StandardExpirationBindingElement {
    StandardExpirationBindingElement::with_limits(
        clock,
        settings.maximum_message_lifetime(),
        settings.maximum_clock_skew(),
    )
}

fn replay(nonce_store: Arc<dyn NonceStore>, settings: &MessagingSettings) -> StandardReplayProtectionBindingElement {
    StandardReplayProtectionBindingElement::new(nonce_store)
        .with_nonce_length(settings.nonce_length)
        .allow_empty_nonce(settings.allow_empty_nonce)
}

/// Builds the service-provider channel.
///
/// Verifies HMAC-SHA1, HMAC-SHA256, RSA-SHA1 (against the consumer's registered public
/// key) and, over HTTPS, PLAINTEXT signatures; enforces nonces, timestamps, token
/// lifetimes and verifiers; and stores issued request tokens.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidConfiguration`](crate::ProtocolError::InvalidConfiguration)
/// for invalid settings.
pub fn service_provider_channel(
    token_manager: Arc<dyn TokenManager>,
    nonce_store: Arc<dyn NonceStore>,
    clock: Arc<dyn Clock>,
    settings: &MessagingSettings,
) -> Result<Channel> {
    settings.validate()?;
    let descriptions = DescriptionCache::new();
    let secrets: Arc<dyn SignatureSecrets> = Arc::new(TokenManagerSecrets::new(token_manager.clone()));
    let signing = SigningBindingElementChain::new(
        [
            SignatureAlgorithm::HmacSha1,
            SignatureAlgorithm::HmacSha256,
            SignatureAlgorithm::RsaSha1,
            SignatureAlgorithm::Plaintext,
        ]
        .into_iter()
        .map(|algorithm| SigningBindingElement::new(algorithm, secrets.clone(), descriptions.clone()))
        .collect(),
    )?;

    Channel::builder(Arc::new(ServiceProviderMessageFactory::new(token_manager.clone())))
        .descriptions(descriptions)
        .settings(settings.channel_settings(ResponseEncoding::Form))
        .binding_element(
            TokenHandlingBindingElement::new(token_manager, clock.clone())
                .with_request_token_ttl(settings.service_provider.maximum_request_token_ttl()),
        )
        .binding_element(replay(nonce_store, settings))
        .binding_element(expiration(clock, settings))
        .binding_element(signing)
        .build()
}

/// Builds a consumer channel signing with `signing`.
///
/// Pass a [`SigningBindingElement`] or a [`SigningBindingElementChain`]; build it with
/// [`DescriptionCache`] `descriptions` so both share one cache.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidConfiguration`](crate::ProtocolError::InvalidConfiguration)
/// for invalid settings.
pub fn consumer_channel(
    signing: Box<dyn BindingElement>,
    descriptions: DescriptionCache,
    nonce_store: Arc<dyn NonceStore>,
    clock: Arc<dyn Clock>,
    settings: &MessagingSettings,
) -> Result<Channel> {
    settings.validate()?;
    Channel::builder(Arc::new(ConsumerMessageFactory::new()))
        .descriptions(descriptions)
        .settings(settings.channel_settings(ResponseEncoding::Form))
        .binding_element(HttpMethodBindingElement)
        .binding_element(replay(nonce_store, settings))
        .binding_element(expiration(clock, settings))
        .boxed_binding_element(signing)
        .build()
}
