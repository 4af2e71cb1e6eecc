//! authwire: signed, replay-protected OAuth 1.0/1.0a and OpenID messaging
//!
//! A message engine for wire protocols that predate typed envelopes. Messages are typed
//! Rust structs; on the wire they are flat string maps carried in query strings, form
//! bodies or an `Authorization` header.
//!
//! # What does authwire do?
//!
//! - **Message mapping**: declarative part tables map each message type to and from its
//!   wire fields, with required, constant and version-gated parts
//! - **Binding elements**: signing (HMAC-SHA1, HMAC-SHA256, RSA-SHA1, PLAINTEXT), nonce
//!   replay protection, expiration and token lifecycle, run as an ordered pipeline
//! - **Channels**: direct (back-channel HTTP) and indirect (redirect or auto-post) delivery
//! - **Dispatch**: message factories classify incoming field sets by which fields are present
//! - **Extensions**: OpenID alias management and extension argument multiplexing
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │  Consumer            │        │  ServiceProvider     │
//! └──────────┬───────────┘        └──────────▲───────────┘
//!            │ typed messages                │ typed messages
//! ┌──────────▼───────────┐        ┌──────────┴───────────┐
//! │  Channel             │        │  Channel             │
//! │   binding elements   │        │   factory            │
//! │   (sign, nonce,      │        │   binding elements   │
//! │    timestamp)        │        │   (reverse order)    │
//! └──────────┬───────────┘        └──────────▲───────────┘
//!            │ HttpRequest                   │ HttpRequest
//!            └────────── DirectTransport ────┘
//! ```
//!
//! # Quick Start
//!
//! ## 1. Compute a Signature Base String
//!
//! ```rust
//! use authwire::{bindings::signature_base_string, messaging::Fields};
//! use url::Url;
//!
//! let url = Url::parse("https://photos.example.net/photos?size=original").unwrap();
//! let mut fields = Fields::new();
//! fields.insert("oauth_consumer_key".to_owned(), "dpf43f3p2l4k3l03".to_owned());
//!
//! let base = signature_base_string("GET", &url, &fields);
//! assert!(base.starts_with("GET&https%3A%2F%2Fphotos.example.net%2Fphotos&"));
//! ```
//!
//! ## 2. Three-Legged Consumer Flow
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use authwire::{
//!     clock::SystemClock,
//!     config::MessagingSettings,
//!     oauth::{Consumer, ConsumerCredentials, ServiceProviderEndpoints},
//!     transport::HttpTransport,
//! };
//!
//! # async fn example() -> authwire::Result<()> {
//! let endpoints = ServiceProviderEndpoints::new(
//!     "https://sp.example.com/request_token",
//!     "https://sp.example.com/authorize",
//!     "https://sp.example.com/access_token",
//! )?;
//! let credentials = Arc::new(ConsumerCredentials::new("ck1", "consumer-secret"));
//! let consumer = Consumer::new(endpoints, credentials, Arc::new(SystemClock), &MessagingSettings::default())?;
//! let transport = HttpTransport::new()?;
//!
//! // Send the user agent to the authorization page
//! let (redirect, request_token) = consumer.request_user_authorization(&transport, None).await?;
//! println!("visit {}", redirect.url());
//!
//! // The user reads the out-of-band verifier off the provider's page
//! let access = consumer.exchange_for_access_token(&transport, &request_token, Some("verifier")).await?;
//! println!("access token {}", access.access_token);
//! # Ok(())
//! # }
//! ```
//!
//! ## 3. OpenID Extension Arguments
//!
//! ```rust
//! use authwire::{messaging::Fields, openid::{ExtensionArgumentsManager, SREG_TYPE_URI, V20}};
//!
//! let mut manager = ExtensionArgumentsManager::for_outgoing(V20);
//! let mut sreg = Fields::new();
//! sreg.insert("nickname".to_owned(), "bob".to_owned());
//! manager.add_extension_arguments(SREG_TYPE_URI, sreg).unwrap();
//!
//! let sent = manager.arguments_to_send(true).unwrap();
//! assert_eq!(sent.get("openid.sreg.nickname").map(String::as_str), Some("bob"));
//! ```
//!
//! # Module Organization
//!
//! - [`messaging`]: message model, part descriptions, dictionaries and wire encodings
//! - [`bindings`]: binding element pipeline (signing, replay, expiration, token handling)
//! - [`channel`]: outgoing and incoming message processing
//! - [`factory`]: message type dispatch trait
//! - [`oauth`]: OAuth 1.0/1.0a messages, factories, token store and role helpers
//! - [`openid`]: alias management and extension arguments
//! - [`transport`]: direct transport abstraction and the reqwest-backed HTTP transport
//! - [`config`]: TOML settings
//! - [`clock`]: injectable time source
//! - [`error`]: error taxonomy with recovery guidance
//! - [`security`]: structured audit events
//!
//! # Security Considerations
//!
//! - **Insufficient protection is fatal**: a message whose required protection is not
//!   applied is never sent, and is rejected on receipt
//! - **Constant-time comparison**: signatures and verifiers are compared with `subtle`
//! - **Replay window**: nonces are remembered for message lifetime plus clock skew
//!   (13 minutes by default); older messages are rejected without a store lookup
//! - **Secrets stay out of logs**: token values are redacted; secrets are zeroized on drop
//! - **PLAINTEXT only over HTTPS**
//!
//! # Error Handling
//!
//! Every fallible operation returns [`Result`] with a [`ProtocolError`]:
//!
//! ```rust
//! use authwire::{ProtocolError, openid::AliasManager};
//!
//! let mut aliases = AliasManager::new();
//! aliases.set_alias("sreg", "urn:ext:sreg").unwrap();
//! match aliases.set_alias("sreg", "urn:ext:other") {
//!     Err(ProtocolError::AliasConflict { alias, .. }) => assert_eq!(alias, "sreg"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and rsa"
)]

pub mod bindings;
pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod factory;
pub mod messaging;
pub mod oauth;
pub mod openid;
pub mod security;
pub mod transport;

pub use error::{ProtocolError, Result};
