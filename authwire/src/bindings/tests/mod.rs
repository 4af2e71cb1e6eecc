//! Pipeline ordering and signing tests.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use super::*;
use crate::{
    clock::ManualClock,
    error::SignatureFailure,
    messaging::{
        DescriptionCache, HttpDeliveryMethods, MessageReceivingEndpoint, SignedMessage,
    },
    oauth::{AccessProtectedResourceRequest, InMemoryTokenManager, V10A},
};


/// Fixed secrets for a single consumer and token.
#[derive(Debug)]
pub(super) struct StaticSecrets;

impl SignatureSecrets for StaticSecrets {
    fn consumer_secret(&self, consumer_key: &str) -> Result<String> {
        match consumer_key {
            "ck1" => Ok("consumer-secret".to_owned()),
            other => Err(ProtocolError::ConsumerNotFound { consumer_key: other.to_owned() }),
        }
    }

    fn token_secret(&self, token: &str) -> Result<String> {
        match token {
            "at1" => Ok("token-secret".to_owned()),
            other => Err(ProtocolError::TokenNotFound {
                kind: "token".to_owned(),
                token: other.to_owned(),
            }),
        }
    }
}

pub(super) fn resource_request(url: &str) -> AccessProtectedResourceRequest {
    let endpoint = MessageReceivingEndpoint::parse(url, HttpDeliveryMethods::GET).unwrap();
    let mut request = AccessProtectedResourceRequest::new(endpoint, V10A);
    request.signed.consumer_key = "ck1".to_owned();
    request.access_token = "at1".to_owned();
    request.set_http_method("GET");
    request
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()))
}

fn hmac(algorithm: SignatureAlgorithm) -> SigningBindingElement {
    SigningBindingElement::new(algorithm, Arc::new(StaticSecrets), DescriptionCache::new())
}

fn names(elements: &[Box<dyn BindingElement>]) -> Vec<&'static str> {
    elements.iter().map(|e| e.name()).collect()
}

#[test]
fn test_ordering_puts_unprotected_first_then_descending_protection() {
    let clock = clock();
    let store: Arc<dyn NonceStore> = Arc::new(MemoryNonceStore::with_defaults(clock.clone()));
    let elements: Vec<Box<dyn BindingElement>> = vec![
        Box::new(hmac(SignatureAlgorithm::HmacSha1)),
        Box::new(StandardExpirationBindingElement::new(clock.clone())),
        Box::new(TokenHandlingBindingElement::new(Arc::new(InMemoryTokenManager::new()), clock.clone())),
        Box::new(StandardReplayProtectionBindingElement::new(store)),
    ];
    let ordered = order_binding_elements(elements).unwrap();
    assert_eq!(
        names(&ordered),
        vec!["token-handling", "replay-protection", "expiration", "HMAC-SHA1"]
    );
}

#[test]
fn test_replay_without_expiration_is_rejected() {
    let clock = clock();
    let store: Arc<dyn NonceStore> = Arc::new(MemoryNonceStore::with_defaults(clock));
    let elements: Vec<Box<dyn BindingElement>> = vec![
        Box::new(hmac(SignatureAlgorithm::HmacSha1)),
        Box::new(StandardReplayProtectionBindingElement::new(store)),
    ];
    let error = order_binding_elements(elements).unwrap_err();
    assert!(matches!(
        error,
        ProtocolError::MissingProtectionDependency { protection, .. }
            if protection == MessageProtections::REPLAY_PROTECTION
    ));
}

#[test]
fn test_expiration_without_signing_is_rejected() {
    let elements: Vec<Box<dyn BindingElement>> =
        vec![Box::new(StandardExpirationBindingElement::new(clock()))];
    assert!(order_binding_elements(elements).is_err());
}

#[test]
fn test_hmac_sign_then_verify() {
    let element = hmac(SignatureAlgorithm::HmacSha256);
    let mut request = resource_request("https://sp.example.com/photos?size=original");
    assert_eq!(
        element.prepare_outgoing(&mut request).unwrap(),
        Some(MessageProtections::TAMPER_PROTECTION)
    );
    assert_eq!(request.signature_method(), "HMAC-SHA256");
    assert!(!request.signature().is_empty());
    assert_eq!(
        element.process_incoming(&mut request).unwrap(),
        Some(MessageProtections::TAMPER_PROTECTION)
    );
}

#[test]
fn test_tampered_token_fails_verification() {
    let element = hmac(SignatureAlgorithm::HmacSha1);
    let mut request = resource_request("https://sp.example.com/photos");
    element.prepare_outgoing(&mut request).unwrap();
    request.extra_data.insert("injected".to_owned(), "1".to_owned());
    let error = element.process_incoming(&mut request).unwrap_err();
    assert!(matches!(
        error,
        ProtocolError::SignatureInvalid { failure: SignatureFailure::Mismatch, .. }
    ));
}

#[test]
fn test_changed_http_method_fails_verification() {
    let element = hmac(SignatureAlgorithm::HmacSha1);
    let mut request = resource_request("https://sp.example.com/photos");
    element.prepare_outgoing(&mut request).unwrap();
    request.set_http_method("POST");
    assert!(element.process_incoming(&mut request).is_err());
}

#[test]
fn test_plaintext_refused_over_http() {
    let element = hmac(SignatureAlgorithm::Plaintext);
    let mut insecure = resource_request("http://sp.example.com/photos");
    assert_eq!(element.prepare_outgoing(&mut insecure).unwrap(), None);

    let mut secure = resource_request("https://sp.example.com/photos");
    element.prepare_outgoing(&mut secure).unwrap();
    assert_eq!(secure.signature(), "consumer-secret&token-secret");
}

#[test]
fn test_chain_verifies_with_matching_algorithm() {
    let chain = SigningBindingElementChain::new(vec![
        hmac(SignatureAlgorithm::HmacSha1),
        hmac(SignatureAlgorithm::HmacSha256),
    ])
    .unwrap();
    let mut request = resource_request("https://sp.example.com/photos");
    hmac(SignatureAlgorithm::HmacSha256).prepare_outgoing(&mut request).unwrap();
    assert!(chain.process_incoming(&mut request).unwrap().is_some());

    let mut unknown = resource_request("https://sp.example.com/photos");
    unknown.set_signature_method("HMAC-MD5");
    unknown.set_signature("x".to_owned());
    assert_eq!(chain.process_incoming(&mut unknown).unwrap(), None);
}

#[test]
fn test_chain_signs_with_first_applicable() {
    let chain = SigningBindingElementChain::new(vec![
        hmac(SignatureAlgorithm::Plaintext),
        hmac(SignatureAlgorithm::HmacSha1),
    ])
    .unwrap();
    let mut request = resource_request("http://sp.example.com/photos");
    chain.prepare_outgoing(&mut request).unwrap();
    assert_eq!(request.signature_method(), "HMAC-SHA1");
    assert!(SigningBindingElementChain::new(Vec::new()).is_err());
}

#[test]
fn test_unknown_consumer_propagates() {
    let element = hmac(SignatureAlgorithm::HmacSha1);
    let mut request = resource_request("https://sp.example.com/photos");
    request.signed.consumer_key = "stranger".to_owned();
    assert!(matches!(
        element.prepare_outgoing(&mut request),
        Err(ProtocolError::ConsumerNotFound { .. })
    ));
}

#[test]
fn test_rsa_sha1_sign_and_verify() {
    use rsa::{RsaPrivateKey, RsaPublicKey};

    #[derive(Debug)]
    struct RsaSecrets(Option<RsaPublicKey>);

    impl SignatureSecrets for RsaSecrets {
        fn consumer_secret(&self, _: &str) -> Result<String> {
            Ok(String::new())
        }

        fn token_secret(&self, _: &str) -> Result<String> {
            Ok(String::new())
        }

        fn consumer_public_key(&self, _: &str) -> Result<Option<RsaPublicKey>> {
            Ok(self.0.clone())
        }
    }

    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public_key = RsaPublicKey::from(&private_key);
    let cache = DescriptionCache::new();
    let signer = SigningBindingElement::rsa_sha1(
        private_key,
        Arc::new(RsaSecrets(Some(public_key))),
        cache.clone(),
    );
    let verifier_without_key = SigningBindingElement::new(
        SignatureAlgorithm::RsaSha1,
        Arc::new(RsaSecrets(None)),
        cache,
    );

    let mut request = resource_request("https://sp.example.com/photos");
    signer.prepare_outgoing(&mut request).unwrap();
    assert_eq!(request.signature_method(), "RSA-SHA1");
    assert!(signer.process_incoming(&mut request).is_ok());

    let error = verifier_without_key.process_incoming(&mut request).unwrap_err();
    assert!(matches!(
        error,
        ProtocolError::SignatureInvalid { failure: SignatureFailure::CertificateNotFound, .. }
    ));

    request.set_signature("%%%".to_owned());
    let error = signer.process_incoming(&mut request).unwrap_err();
    assert!(matches!(
        error,
        ProtocolError::SignatureInvalid { failure: SignatureFailure::Malformed, .. }
    ));
}
