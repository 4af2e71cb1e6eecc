//! Message signing: HMAC-SHA1, HMAC-SHA256, RSA-SHA1 and PLAINTEXT.
//!
//! # Signature base string
//!
//! ```text
//! METHOD & escape(normalized URL) & escape(sorted, escaped "k=v" pairs joined by "&")
//! ```
//!
//! The normalized URL drops the query and fragment; its query parameters join the
//! message fields instead. `oauth_signature` and `realm` never take part.
//!
//! # Keys
//!
//! HMAC and PLAINTEXT use `escape(consumer secret) & escape(token secret)`, with an
//! empty token secret before a token exists. RSA-SHA1 signs with a configured private
//! key and verifies with the consumer's registered public key.

use std::{fmt, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac, digest::KeyInit};
use rsa::{RsaPrivateKey, RsaPublicKey, pkcs1v15};
use sha1::Sha1;
use sha2::Sha256;
use signature::{SignatureEncoding, Signer, Verifier};
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::BindingElement;
use crate::{
    audit,
    error::{ProtocolError, Result, SignatureFailure},
    messaging::{
        DescriptionCache, Fields, MessageProtections, ProtocolMessage,
        encoding::{escape_rfc3986, query_fields},
    },
    security::audit::AuditEventType,
};

/// Wire fields excluded from the signature base string.
const EXCLUDED_FROM_SIGNATURE: [&str; 2] = ["oauth_signature", "realm"];

/// Looks up the secrets a signing element needs.
///
/// Implemented by the token manager adapter on the service-provider side and by the
/// consumer's credential store on the consumer side.
pub trait SignatureSecrets: Send + Sync + fmt::Debug {
    /// Shared secret of `consumer_key`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::ConsumerNotFound`] for an unknown consumer.
    fn consumer_secret(&self, consumer_key: &str) -> Result<String>;

    /// Secret of `token`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::TokenNotFound`] for an unknown token.
    fn token_secret(&self, token: &str) -> Result<String>;

    /// Registered RSA public key of `consumer_key`, if any.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::ConsumerNotFound`] for an unknown consumer.
    fn consumer_public_key(&self, consumer_key: &str) -> Result<Option<RsaPublicKey>> {
        let _ = consumer_key;
        Ok(None)
    }
}

/// Supported signature methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// `HMAC-SHA1`.
    HmacSha1,
    /// `HMAC-SHA256`.
    HmacSha256,
    /// `RSA-SHA1`.
    RsaSha1,
    /// `PLAINTEXT`: the key itself, only over HTTPS.
    Plaintext,
}

impl SignatureAlgorithm {
    /// Wire name of the algorithm.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::HmacSha1 => "HMAC-SHA1",
            Self::HmacSha256 => "HMAC-SHA256",
            Self::RsaSha1 => "RSA-SHA1",
            Self::Plaintext => "PLAINTEXT",
        }
    }

    /// Looks up an algorithm by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::HmacSha1, Self::HmacSha256, Self::RsaSha1, Self::Plaintext]
            .into_iter()
            .find(|algorithm| algorithm.name() == name)
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds the signature base string.
///
/// # Examples
///
/// ```
/// use authwire::{bindings::signature_base_string, messaging::Fields};
/// use url::Url;
///
/// let url = Url::parse("https://sp.example.com/request_token?b=2#frag").unwrap();
/// let mut fields = Fields::new();
/// fields.insert("oauth_consumer_key".to_owned(), "ck1".to_owned());
/// fields.insert("oauth_signature".to_owned(), "ignored".to_owned());
///
/// assert_eq!(
///     signature_base_string("post", &url, &fields),
///     "POST&https%3A%2F%2Fsp.example.com%2Frequest_token&b%3D2%26oauth_consumer_key%3Dck1"
/// );
/// ```
#[must_use]
pub fn signature_base_string(method: &str, recipient: &Url, fields: &Fields) -> String {
    let mut parameters: Vec<(String, String)> = fields
        .iter()
        .filter(|(key, _)| !EXCLUDED_FROM_SIGNATURE.contains(&key.as_str()))
        .map(|(key, value)| (escape_rfc3986(key), escape_rfc3986(value)))
        .collect();
    for (key, value) in query_fields(recipient) {
        if !fields.contains_key(&key) {
            parameters.push((escape_rfc3986(&key), escape_rfc3986(&value)));
        }
    }
    parameters.sort();

    let normalized = parameters
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut url = recipient.clone();
    url.set_query(None);
    url.set_fragment(None);

    format!(
        "{}&{}&{}",
        escape_rfc3986(&method.to_ascii_uppercase()),
        escape_rfc3986(url.as_str()),
        escape_rfc3986(&normalized)
    )
}

/// Secret key for HMAC and PLAINTEXT.
fn signing_key(consumer_secret: &str, token_secret: &str) -> Zeroizing<String> {
    Zeroizing::new(format!("{}&{}", escape_rfc3986(consumer_secret), escape_rfc3986(token_secret)))
}

fn hmac_base64<M: Mac + KeyInit>(key: &[u8], base: &str) -> Result<String> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|e| ProtocolError::CryptoError(format!("invalid HMAC key: {e}")))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Computes a signature over `base`.
///
/// `private_key` is only consulted for RSA-SHA1.
///
/// # Errors
///
/// Returns [`ProtocolError::CryptoError`] if RSA-SHA1 is requested without a private
/// key or signing fails.
pub fn compute_signature(
    algorithm: SignatureAlgorithm,
    base: &str,
    consumer_secret: &str,
    token_secret: &str,
    private_key: Option<&RsaPrivateKey>,
) -> Result<String> {
    match algorithm {
        SignatureAlgorithm::HmacSha1 => {
            hmac_base64::<Hmac<Sha1>>(signing_key(consumer_secret, token_secret).as_bytes(), base)
        }
        SignatureAlgorithm::HmacSha256 => {
            hmac_base64::<Hmac<Sha256>>(signing_key(consumer_secret, token_secret).as_bytes(), base)
        }
        SignatureAlgorithm::Plaintext => {
            Ok(signing_key(consumer_secret, token_secret).as_str().to_owned())
        }
        SignatureAlgorithm::RsaSha1 => {
            let private_key = private_key.ok_or_else(|| {
                ProtocolError::CryptoError("RSA-SHA1 signing requires a private key".to_owned())
            })?;
            let signing_key = pkcs1v15::SigningKey::<Sha1>::new(private_key.clone());
            let signature = signing_key
                .try_sign(base.as_bytes())
                .map_err(|e| ProtocolError::CryptoError(format!("RSA signing failed: {e}")))?;
            Ok(STANDARD.encode(signature.to_bytes()))
        }
    }
}

fn verify_rsa_sha1(
    public_key: &RsaPublicKey,
    base: &str,
    signature: &str,
) -> std::result::Result<(), SignatureFailure> {
    let bytes = STANDARD.decode(signature).map_err(|_| SignatureFailure::Malformed)?;
    let signature =
        pkcs1v15::Signature::try_from(bytes.as_slice()).map_err(|_| SignatureFailure::Malformed)?;
    pkcs1v15::VerifyingKey::<Sha1>::new(public_key.clone())
        .verify(base.as_bytes(), &signature)
        .map_err(|_| SignatureFailure::Mismatch)
}

/// Signs outgoing messages and verifies incoming ones with a single algorithm.
#[derive(Clone)]
pub struct SigningBindingElement {
    algorithm: SignatureAlgorithm,
    secrets: Arc<dyn SignatureSecrets>,
    descriptions: DescriptionCache,
    private_key: Option<Arc<RsaPrivateKey>>,
}

impl SigningBindingElement {
    /// Creates an element for an HMAC or PLAINTEXT algorithm, or for verifying RSA-SHA1.
    #[must_use]
    pub fn new(
        algorithm: SignatureAlgorithm,
        secrets: Arc<dyn SignatureSecrets>,
        descriptions: DescriptionCache,
    ) -> Self {
        Self { algorithm, secrets, descriptions, private_key: None }
    }

    /// Creates an RSA-SHA1 element able to sign with `private_key`.
    #[must_use]
    pub fn rsa_sha1(
        private_key: RsaPrivateKey,
        secrets: Arc<dyn SignatureSecrets>,
        descriptions: DescriptionCache,
    ) -> Self {
        Self {
            algorithm: SignatureAlgorithm::RsaSha1,
            secrets,
            descriptions,
            private_key: Some(Arc::new(private_key)),
        }
    }

    /// Algorithm this element handles.
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// True when this element can sign or verify `message`.
    ///
    /// The message must name this algorithm (or none yet), and PLAINTEXT is refused for
    /// recipients not reached over HTTPS.
    #[must_use]
    pub fn applies_to(&self, message: &dyn ProtocolMessage) -> bool {
        let Some(signed) = message.as_signed() else {
            return false;
        };
        let method = signed.signature_method();
        if !method.is_empty() && method != self.algorithm.name() {
            return false;
        }
        if self.algorithm == SignatureAlgorithm::Plaintext {
            return message.recipient().is_some_and(|r| r.location.scheme() == "https");
        }
        true
    }

    fn base_string(&self, message: &dyn ProtocolMessage) -> Result<String> {
        let recipient = message.recipient().ok_or_else(|| {
            ProtocolError::InvalidInput(format!("{} has no recipient to sign for", message.type_name()))
        })?;
        let description = self.descriptions.describe(message)?;
        let fields = description.serialize(message);
        let method = match message.as_signed().map(|s| s.http_method()) {
            Some(method) if !method.is_empty() => method,
            _ => recipient.methods.http_verb(),
        };
        Ok(signature_base_string(method, &recipient.location, &fields))
    }

    fn secrets_for(&self, message: &dyn ProtocolMessage) -> Result<(String, String)> {
        let Some(signed) = message.as_signed() else {
            return Ok((String::new(), String::new()));
        };
        let consumer_secret = self.secrets.consumer_secret(signed.consumer_key())?;
        let token_secret = match signed.token() {
            Some(token) if !token.is_empty() => self.secrets.token_secret(token)?,
            _ => String::new(),
        };
        Ok((consumer_secret, token_secret))
    }

    fn sign(&self, message: &dyn ProtocolMessage) -> Result<String> {
        let base = self.base_string(message)?;
        debug!(algorithm = %self.algorithm, base_len = base.len(), "signing");
        if self.algorithm == SignatureAlgorithm::RsaSha1 {
            return compute_signature(self.algorithm, &base, "", "", self.private_key.as_deref());
        }
        let (consumer_secret, token_secret) = self.secrets_for(message)?;
        let consumer_secret = Zeroizing::new(consumer_secret);
        let token_secret = Zeroizing::new(token_secret);
        compute_signature(self.algorithm, &base, &consumer_secret, &token_secret, None)
    }

    fn verify(&self, message: &dyn ProtocolMessage) -> Result<()> {
        let type_name = message.type_name();
        let Some(signed) = message.as_signed() else {
            return Ok(());
        };
        let base = self.base_string(message)?;
        let failure = if self.algorithm == SignatureAlgorithm::RsaSha1 {
            match self.secrets.consumer_public_key(signed.consumer_key())? {
                Some(public_key) => verify_rsa_sha1(&public_key, &base, signed.signature()).err(),
                None => Some(SignatureFailure::CertificateNotFound),
            }
        } else {
            let expected = Zeroizing::new(self.sign(message)?);
            let matches: bool = expected.as_bytes().ct_eq(signed.signature().as_bytes()).into();
            (!matches).then_some(SignatureFailure::Mismatch)
        };

        match failure {
            None => Ok(()),
            Some(failure) => {
                warn!(message_type = type_name, algorithm = %self.algorithm, %failure, "signature rejected");
                audit!(
                    AuditEventType::SignatureRejected,
                    signed.consumer_key(),
                    Uuid::new_v4(),
                    with_message_type(type_name),
                    with_signature_method(self.algorithm.name()),
                    with_error(failure.to_string())
                );
                Err(ProtocolError::SignatureInvalid { message_type: type_name.to_owned(), failure })
            }
        }
    }
}

impl fmt::Debug for SigningBindingElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningBindingElement")
            .field("algorithm", &self.algorithm)
            .field("has_private_key", &self.private_key.is_some())
            .finish_non_exhaustive()
    }
}

impl BindingElement for SigningBindingElement {
    fn protection(&self) -> MessageProtections {
        MessageProtections::TAMPER_PROTECTION
    }

    fn name(&self) -> &'static str {
        self.algorithm.name()
    }

    #[instrument(skip(self, message), fields(message_type = message.type_name(), algorithm = %self.algorithm))]
    fn prepare_outgoing(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        if !self.applies_to(message) {
            return Ok(None);
        }
        if let Some(signed) = message.as_signed_mut() {
            signed.set_signature_method(self.algorithm.name());
            signed.set_signature(String::new());
        }
        let signature = self.sign(message)?;
        let consumer_key = message.as_signed().map(|s| s.consumer_key().to_owned()).unwrap_or_default();
        if let Some(signed) = message.as_signed_mut() {
            signed.set_signature(signature);
        }
        audit!(
            AuditEventType::MessageSigned,
            consumer_key,
            Uuid::new_v4(),
            with_message_type(message.type_name()),
            with_signature_method(self.algorithm.name())
        );
        Ok(Some(MessageProtections::TAMPER_PROTECTION))
    }

    #[instrument(skip(self, message), fields(message_type = message.type_name(), algorithm = %self.algorithm))]
    fn process_incoming(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        if !self.applies_to(message) {
            return Ok(None);
        }
        self.verify(message)?;
        Ok(Some(MessageProtections::TAMPER_PROTECTION))
    }
}

/// Tries several signing elements in order.
///
/// Outgoing messages are signed by the first element that applies; incoming messages
/// are verified by the element matching their declared method.
#[derive(Debug, Clone)]
pub struct SigningBindingElementChain {
    elements: Vec<SigningBindingElement>,
}

impl SigningBindingElementChain {
    /// Creates a chain.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidConfiguration`] for an empty chain.
    pub fn new(elements: Vec<SigningBindingElement>) -> Result<Self> {
        if elements.is_empty() {
            return Err(ProtocolError::InvalidConfiguration(
                "a signing chain needs at least one element".to_owned(),
            ));
        }
        Ok(Self { elements })
    }

    /// Algorithms in the chain, in order.
    pub fn algorithms(&self) -> impl Iterator<Item = SignatureAlgorithm> + '_ {
        self.elements.iter().map(SigningBindingElement::algorithm)
    }
}

impl BindingElement for SigningBindingElementChain {
    fn protection(&self) -> MessageProtections {
        MessageProtections::TAMPER_PROTECTION
    }

    fn name(&self) -> &'static str {
        "signing-chain"
    }

    fn prepare_outgoing(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        for element in &self.elements {
            if let Some(applied) = element.prepare_outgoing(message)? {
                return Ok(Some(applied));
            }
        }
        Ok(None)
    }

    fn process_incoming(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        for element in &self.elements {
            if let Some(applied) = element.process_incoming(message)? {
                return Ok(Some(applied));
            }
        }
        if let Some(signed) = message.as_signed() {
            warn!(
                message_type = message.type_name(),
                signature_method = signed.signature_method(),
                "no signing element accepts this signature method"
            );
        }
        Ok(None)
    }
}
