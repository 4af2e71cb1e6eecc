//! OAuth message types.

use std::{any::Any, fmt};

use chrono::{DateTime, SubsecRound, Utc};
use url::Url;

use super::{
    CALLBACK, CALLBACK_CONFIRMED, CONSUMER_KEY, NONCE, OAUTH_VERSION, OUT_OF_BAND, SIGNATURE,
    SIGNATURE_METHOD, TIMESTAMP, TOKEN, TOKEN_SECRET, V10, V10A, VERIFIER, VERSION,
};
use crate::{
    message_parts,
    messaging::{
        ExpiringMessage, Fields, MessageProtections, MessageReceivingEndpoint, MessageTransport,
        PartValue, ProtectionLevel, ProtocolMessage, ProtocolVersion, ReplayProtectedMessage,
        SignedMessage, UnixTimestamp, part,
    },
};

/// Where the service provider sends the user after authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    /// `oob`: no redirect, the verifier is displayed to the user.
    OutOfBand,
    /// Redirect to this URL.
    Url(Url),
}

impl Callback {
    /// The redirect URL, if any.
    #[must_use]
    pub const fn url(&self) -> Option<&Url> {
        match self {
            Self::OutOfBand => None,
            Self::Url(url) => Some(url),
        }
    }
}

impl PartValue for Callback {
    fn encode(&self) -> String {
        match self {
            Self::OutOfBand => OUT_OF_BAND.to_owned(),
            Self::Url(url) => url.as_str().to_owned(),
        }
    }

    fn decode(value: &str) -> Result<Self, String> {
        if value == OUT_OF_BAND {
            return Ok(Self::OutOfBand);
        }
        Url::decode(value).map(Self::Url)
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Fields every signed request carries.
#[derive(Debug, Clone, Default)]
pub struct SignedParts {
    /// `oauth_consumer_key`.
    pub consumer_key: String,
    /// `oauth_signature_method`.
    pub signature_method: String,
    /// `oauth_signature`.
    pub signature: String,
    /// `oauth_timestamp`.
    pub timestamp: Option<UnixTimestamp>,
    /// `oauth_nonce`.
    pub nonce: String,
    /// `oauth_version`.
    pub version: Option<String>,
    /// HTTP verb; part of the signature base string but not a wire field.
    pub http_method: String,
}

impl SignedParts {
    fn new(consumer_key: &str) -> Self {
        Self {
            consumer_key: consumer_key.to_owned(),
            version: Some(OAUTH_VERSION.to_owned()),
            ..Self::default()
        }
    }
}

/// Boilerplate shared by every message type.
macro_rules! message_plumbing {
    () => {
        fn extra_data(&self) -> &Fields {
            &self.extra_data
        }

        fn extra_data_mut(&mut self) -> &mut Fields {
            &mut self.extra_data
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
            self
        }
    };
    (signed) => {
        message_plumbing!();

        fn as_expiring(&self) -> Option<&dyn ExpiringMessage> {
            Some(self)
        }

        fn as_expiring_mut(&mut self) -> Option<&mut dyn ExpiringMessage> {
            Some(self)
        }

        fn as_replay_protected(&self) -> Option<&dyn ReplayProtectedMessage> {
            Some(self)
        }

        fn as_replay_protected_mut(&mut self) -> Option<&mut dyn ReplayProtectedMessage> {
            Some(self)
        }

        fn as_signed(&self) -> Option<&dyn SignedMessage> {
            Some(self)
        }

        fn as_signed_mut(&mut self) -> Option<&mut dyn SignedMessage> {
            Some(self)
        }
    };
}

/// Implements the capability traits over a message's `signed` parts.
macro_rules! signed_message {
    ($ty:ty, token = |$m:ident| $token:expr) => {
        impl ExpiringMessage for $ty {
            fn creation_date(&self) -> Option<DateTime<Utc>> {
                self.signed.timestamp.map(|t| t.0)
            }

            fn set_creation_date(&mut self, created: DateTime<Utc>) {
                self.signed.timestamp = Some(UnixTimestamp(created.trunc_subsecs(0)));
            }
        }

        impl ReplayProtectedMessage for $ty {
            fn nonce_context(&self) -> &str {
                &self.signed.consumer_key
            }

            fn nonce(&self) -> &str {
                &self.signed.nonce
            }

            fn set_nonce(&mut self, nonce: String) {
                self.signed.nonce = nonce;
            }
        }

        impl SignedMessage for $ty {
            fn signature_method(&self) -> &str {
                &self.signed.signature_method
            }

            fn set_signature_method(&mut self, method: &str) {
                method.clone_into(&mut self.signed.signature_method);
            }

            fn signature(&self) -> &str {
                &self.signed.signature
            }

            fn set_signature(&mut self, signature: String) {
                self.signed.signature = signature;
            }

            fn consumer_key(&self) -> &str {
                &self.signed.consumer_key
            }

            fn token(&self) -> Option<&str> {
                let $m = self;
                $token
            }

            fn http_method(&self) -> &str {
                &self.signed.http_method
            }

            fn set_http_method(&mut self, method: &str) {
                method.clone_into(&mut self.signed.http_method);
            }
        }
    };
}

/// Requests an unauthorized request token.
#[derive(Debug, Clone)]
pub struct UnauthorizedTokenRequest {
    recipient: MessageReceivingEndpoint,
    version: ProtocolVersion,
    /// Signed request fields.
    pub signed: SignedParts,
    /// `oauth_callback`, required since 1.0a.
    pub callback: Option<Callback>,
    /// Undeclared fields.
    pub extra_data: Fields,
}

message_parts!(UnauthorizedTokenRequest {
    signed.consumer_key => part(CONSUMER_KEY).required().protection(ProtectionLevel::Sign),
    signed.signature_method => part(SIGNATURE_METHOD).required().protection(ProtectionLevel::Sign),
    signed.signature => part(SIGNATURE).required(),
    signed.timestamp => part(TIMESTAMP).required().protection(ProtectionLevel::Sign),
    signed.nonce => part(NONCE).required().allow_empty().protection(ProtectionLevel::Sign),
    signed.version => part(VERSION).protection(ProtectionLevel::Sign),
    callback => part(CALLBACK).required().since(V10A).protection(ProtectionLevel::Sign),
});

impl UnauthorizedTokenRequest {
    /// Creates a request to `recipient` on behalf of `consumer_key`.
    #[must_use]
    pub fn new(recipient: MessageReceivingEndpoint, version: ProtocolVersion, consumer_key: &str) -> Self {
        Self {
            recipient,
            version,
            signed: SignedParts::new(consumer_key),
            callback: None,
            extra_data: Fields::new(),
        }
    }
}

impl ProtocolMessage for UnauthorizedTokenRequest {
    fn type_name(&self) -> &'static str {
        "UnauthorizedTokenRequest"
    }

    fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn transport(&self) -> MessageTransport {
        MessageTransport::Direct
    }

    fn required_protection(&self) -> MessageProtections {
        MessageProtections::ALL
    }

    fn recipient(&self) -> Option<&MessageReceivingEndpoint> {
        Some(&self.recipient)
    }

    message_plumbing!(signed);
}

signed_message!(UnauthorizedTokenRequest, token = |_m| None);

/// Grants an unauthorized request token.
#[derive(Debug, Clone)]
pub struct UnauthorizedTokenResponse {
    version: ProtocolVersion,
    /// `oauth_token`.
    pub request_token: String,
    /// `oauth_token_secret`.
    pub token_secret: String,
    /// Consumer the token is issued to. Not sent.
    pub consumer_key: String,
    /// Callback from the originating request. Not sent.
    pub callback: Option<Callback>,
    /// Undeclared fields.
    pub extra_data: Fields,
}

message_parts!(UnauthorizedTokenResponse {
    request_token => part(TOKEN).required(),
    token_secret => part(TOKEN_SECRET).required(),
} constants {
    part(CALLBACK_CONFIRMED).required().constant("true").since(V10A),
});

impl UnauthorizedTokenResponse {
    /// Creates an empty response, as the consumer does before deserializing.
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            request_token: String::new(),
            token_secret: String::new(),
            consumer_key: String::new(),
            callback: None,
            extra_data: Fields::new(),
        }
    }

    /// Creates the response to `request`, in the request's version.
    #[must_use]
    pub fn for_request(request: &UnauthorizedTokenRequest, token: String, secret: String) -> Self {
        Self {
            version: request.version,
            request_token: token,
            token_secret: secret,
            consumer_key: request.signed.consumer_key.clone(),
            callback: request.callback.clone(),
            extra_data: Fields::new(),
        }
    }
}

impl ProtocolMessage for UnauthorizedTokenResponse {
    fn type_name(&self) -> &'static str {
        "UnauthorizedTokenResponse"
    }

    fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn transport(&self) -> MessageTransport {
        MessageTransport::Direct
    }

    fn required_protection(&self) -> MessageProtections {
        MessageProtections::NONE
    }

    message_plumbing!();
}

/// Sends the user to the service provider to authorize a request token.
#[derive(Debug, Clone)]
pub struct UserAuthorizationRequest {
    recipient: MessageReceivingEndpoint,
    version: ProtocolVersion,
    /// `oauth_token`. Some providers let the user enter it manually.
    pub request_token: String,
    /// `oauth_callback`, only sent here before 1.0a.
    pub callback: Option<Url>,
    /// Undeclared fields.
    pub extra_data: Fields,
}

message_parts!(UserAuthorizationRequest {
    request_token => part(TOKEN),
    callback => part(CALLBACK).until(V10),
});

impl UserAuthorizationRequest {
    /// Creates a request to the authorization endpoint.
    #[must_use]
    pub fn new(recipient: MessageReceivingEndpoint, version: ProtocolVersion) -> Self {
        Self {
            recipient,
            version,
            request_token: String::new(),
            callback: None,
            extra_data: Fields::new(),
        }
    }
}

impl ProtocolMessage for UserAuthorizationRequest {
    fn type_name(&self) -> &'static str {
        "UserAuthorizationRequest"
    }

    fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn transport(&self) -> MessageTransport {
        MessageTransport::Indirect
    }

    fn required_protection(&self) -> MessageProtections {
        MessageProtections::NONE
    }

    fn recipient(&self) -> Option<&MessageReceivingEndpoint> {
        Some(&self.recipient)
    }

    message_plumbing!();
}

/// Returns the user to the consumer after authorization.
#[derive(Debug, Clone)]
pub struct UserAuthorizationResponse {
    recipient: MessageReceivingEndpoint,
    version: ProtocolVersion,
    /// `oauth_token`.
    pub request_token: String,
    /// `oauth_verifier`, required since 1.0a.
    pub verifier: String,
    /// Undeclared fields.
    pub extra_data: Fields,
}

message_parts!(UserAuthorizationResponse {
    request_token => part(TOKEN).required(),
    verifier => part(VERIFIER).required().since(V10A),
});

impl UserAuthorizationResponse {
    /// Creates a response redirecting to the consumer's callback.
    #[must_use]
    pub fn new(recipient: MessageReceivingEndpoint, version: ProtocolVersion) -> Self {
        Self {
            recipient,
            version,
            request_token: String::new(),
            verifier: String::new(),
            extra_data: Fields::new(),
        }
    }
}

impl ProtocolMessage for UserAuthorizationResponse {
    fn type_name(&self) -> &'static str {
        "UserAuthorizationResponse"
    }

    fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn transport(&self) -> MessageTransport {
        MessageTransport::Indirect
    }

    fn required_protection(&self) -> MessageProtections {
        MessageProtections::NONE
    }

    fn recipient(&self) -> Option<&MessageReceivingEndpoint> {
        Some(&self.recipient)
    }

    message_plumbing!();
}

/// Exchanges an authorized request token for an access token.
#[derive(Debug, Clone)]
pub struct AuthorizedTokenRequest {
    recipient: MessageReceivingEndpoint,
    version: ProtocolVersion,
    /// Signed request fields.
    pub signed: SignedParts,
    /// `oauth_token`.
    pub request_token: String,
    /// `oauth_verifier`, required since 1.0a.
    pub verifier: String,
    /// Undeclared fields.
    pub extra_data: Fields,
}

message_parts!(AuthorizedTokenRequest {
    signed.consumer_key => part(CONSUMER_KEY).required().protection(ProtectionLevel::Sign),
    signed.signature_method => part(SIGNATURE_METHOD).required().protection(ProtectionLevel::Sign),
    signed.signature => part(SIGNATURE).required(),
    signed.timestamp => part(TIMESTAMP).required().protection(ProtectionLevel::Sign),
    signed.nonce => part(NONCE).required().allow_empty().protection(ProtectionLevel::Sign),
    signed.version => part(VERSION).protection(ProtectionLevel::Sign),
    request_token => part(TOKEN).required().protection(ProtectionLevel::Sign),
    verifier => part(VERIFIER).required().since(V10A).protection(ProtectionLevel::Sign),
});

impl AuthorizedTokenRequest {
    /// Creates an exchange request for `request_token`.
    #[must_use]
    pub fn new(
        recipient: MessageReceivingEndpoint,
        version: ProtocolVersion,
        consumer_key: &str,
        request_token: &str,
    ) -> Self {
        Self {
            recipient,
            version,
            signed: SignedParts::new(consumer_key),
            request_token: request_token.to_owned(),
            verifier: String::new(),
            extra_data: Fields::new(),
        }
    }
}

impl ProtocolMessage for AuthorizedTokenRequest {
    fn type_name(&self) -> &'static str {
        "AuthorizedTokenRequest"
    }

    fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn transport(&self) -> MessageTransport {
        MessageTransport::Direct
    }

    fn required_protection(&self) -> MessageProtections {
        MessageProtections::ALL
    }

    fn recipient(&self) -> Option<&MessageReceivingEndpoint> {
        Some(&self.recipient)
    }

    message_plumbing!(signed);
}

signed_message!(AuthorizedTokenRequest, token = |m| Some(m.request_token.as_str()));

/// Grants an access token.
#[derive(Debug, Clone)]
pub struct AuthorizedTokenResponse {
    version: ProtocolVersion,
    /// `oauth_token`.
    pub access_token: String,
    /// `oauth_token_secret`.
    pub token_secret: String,
    /// Undeclared fields.
    pub extra_data: Fields,
}

message_parts!(AuthorizedTokenResponse {
    access_token => part(TOKEN).required(),
    token_secret => part(TOKEN_SECRET).required(),
});

impl AuthorizedTokenResponse {
    /// Creates an empty response.
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            access_token: String::new(),
            token_secret: String::new(),
            extra_data: Fields::new(),
        }
    }
}

impl ProtocolMessage for AuthorizedTokenResponse {
    fn type_name(&self) -> &'static str {
        "AuthorizedTokenResponse"
    }

    fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn transport(&self) -> MessageTransport {
        MessageTransport::Direct
    }

    fn required_protection(&self) -> MessageProtections {
        MessageProtections::NONE
    }

    message_plumbing!();
}

/// A signed request for a protected resource.
#[derive(Debug, Clone)]
pub struct AccessProtectedResourceRequest {
    recipient: MessageReceivingEndpoint,
    version: ProtocolVersion,
    /// Signed request fields.
    pub signed: SignedParts,
    /// `oauth_token`.
    pub access_token: String,
    /// Undeclared fields.
    pub extra_data: Fields,
}

message_parts!(AccessProtectedResourceRequest {
    signed.consumer_key => part(CONSUMER_KEY).required().protection(ProtectionLevel::Sign),
    signed.signature_method => part(SIGNATURE_METHOD).required().protection(ProtectionLevel::Sign),
    signed.signature => part(SIGNATURE).required(),
    signed.timestamp => part(TIMESTAMP).required().protection(ProtectionLevel::Sign),
    signed.nonce => part(NONCE).required().allow_empty().protection(ProtectionLevel::Sign),
    signed.version => part(VERSION).protection(ProtectionLevel::Sign),
    access_token => part(TOKEN).required().protection(ProtectionLevel::Sign),
});

impl AccessProtectedResourceRequest {
    /// Creates a resource request. Consumer key and token are filled in by the caller.
    #[must_use]
    pub fn new(recipient: MessageReceivingEndpoint, version: ProtocolVersion) -> Self {
        Self {
            recipient,
            version,
            signed: SignedParts::new(""),
            access_token: String::new(),
            extra_data: Fields::new(),
        }
    }
}

impl ProtocolMessage for AccessProtectedResourceRequest {
    fn type_name(&self) -> &'static str {
        "AccessProtectedResourceRequest"
    }

    fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn transport(&self) -> MessageTransport {
        MessageTransport::Direct
    }

    fn required_protection(&self) -> MessageProtections {
        MessageProtections::ALL
    }

    fn recipient(&self) -> Option<&MessageReceivingEndpoint> {
        Some(&self.recipient)
    }

    message_plumbing!(signed);
}

signed_message!(AccessProtectedResourceRequest, token = |m| Some(m.access_token.as_str()));
