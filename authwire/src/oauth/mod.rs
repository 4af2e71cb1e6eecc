//! OAuth 1.0 and 1.0a.
//!
//! Message types for the three-legged flow, the token store the service provider
//! consults, message factories for both roles, channel assembly, and the
//! [`ServiceProvider`] and [`Consumer`] helpers that drive the flow.
//!
//! ```text
//! Consumer                               Service Provider
//!    │ UnauthorizedTokenRequest ───────────▶ │  (direct, signed)
//!    │ ◀────────── UnauthorizedTokenResponse │
//!    │ UserAuthorizationRequest ──(browser)─▶ │  (indirect)
//!    │ ◀─(browser)── UserAuthorizationResponse│
//!    │ AuthorizedTokenRequest ─────────────▶ │  (direct, signed, verifier)
//!    │ ◀──────────── AuthorizedTokenResponse │
//!    │ AccessProtectedResourceRequest ─────▶ │  (direct, signed)
//! ```

use crate::messaging::ProtocolVersion;

pub mod channel;
pub mod consumer;
pub mod factory;
pub mod messages;
pub mod service_provider;
pub mod token_manager;

pub use channel::{HttpMethodBindingElement, consumer_channel, service_provider_channel};
pub use consumer::{Consumer, ConsumerCredentials, ServiceProviderEndpoints};
pub use factory::{ConsumerMessageFactory, ServiceProviderMessageFactory};
pub use messages::{
    AccessProtectedResourceRequest, AuthorizedTokenRequest, AuthorizedTokenResponse, Callback,
    SignedParts, UnauthorizedTokenRequest, UnauthorizedTokenResponse, UserAuthorizationRequest,
    UserAuthorizationResponse,
};
pub use service_provider::{
    ServiceProvider, StandardTokenGenerator, TokenGenerator, VerificationCodeFormat,
    create_verification_code,
};
pub use token_manager::{
    AccessTokenRecord, ConsumerRecord, InMemoryTokenManager, KeyKind, KeyNotFound,
    RequestTokenRecord, TokenManager, TokenManagerSecrets, TokenType,
};

/// OAuth 1.0.
pub const V10: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

/// OAuth 1.0a (the revision adding `oauth_callback_confirmed` and `oauth_verifier`).
pub const V10A: ProtocolVersion = ProtocolVersion::new(1, 0, 1);

/// Value of `oauth_version` on the wire for both revisions.
pub const OAUTH_VERSION: &str = "1.0";

/// `oauth_callback` value meaning the verifier is shown to the user instead.
pub const OUT_OF_BAND: &str = "oob";

/// Prefix shared by every protocol parameter.
pub const PARAMETER_PREFIX: &str = "oauth_";

/// `oauth_consumer_key`.
pub const CONSUMER_KEY: &str = "oauth_consumer_key";
/// `oauth_token`.
pub const TOKEN: &str = "oauth_token";
/// `oauth_token_secret`.
pub const TOKEN_SECRET: &str = "oauth_token_secret";
/// `oauth_callback`.
pub const CALLBACK: &str = "oauth_callback";
/// `oauth_callback_confirmed`.
pub const CALLBACK_CONFIRMED: &str = "oauth_callback_confirmed";
/// `oauth_verifier`.
pub const VERIFIER: &str = "oauth_verifier";
/// `oauth_signature_method`.
pub const SIGNATURE_METHOD: &str = "oauth_signature_method";
/// `oauth_signature`.
pub const SIGNATURE: &str = "oauth_signature";
/// `oauth_timestamp`.
pub const TIMESTAMP: &str = "oauth_timestamp";
/// `oauth_nonce`.
pub const NONCE: &str = "oauth_nonce";
/// `oauth_version`.
pub const VERSION: &str = "oauth_version";
