//! authwire-inspect: diagnostics for OAuth 1.0 signatures and OpenID extension fields.
//!
//! Fields are given as repeated `--field key=value` flags or as a raw
//! `--query 'a=1&b=2'` string (or both; flags win on conflict).
//!
//! ```text
//! authwire-inspect base-string --method GET --url https://sp.example.com/photos \
//!     --field oauth_consumer_key=ck1 --field oauth_nonce=n1
//! authwire-inspect sign --algorithm HMAC-SHA1 --consumer-secret cs --url ... --field ...
//! authwire-inspect classify --side provider --request-token rt1 --field oauth_token=rt1
//! authwire-inspect extensions --query 'openid.ns=...&openid.ns.sreg=...&openid.sreg.nickname=bob'
//! ```

#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and rsa"
)]
#![allow(clippy::print_stdout, reason = "command output goes to stdout")]

mod observability;

use std::sync::Arc;

use anyhow::{Context, bail};
use authwire::{
    bindings::{SignatureAlgorithm, compute_signature, signature_base_string},
    factory::MessageFactory,
    messaging::{
        Fields, HttpDeliveryMethods, MessageReceivingEndpoint, ProtocolMessage,
        encoding::parse_query_string,
    },
    oauth::{
        AccessTokenRecord, ConsumerMessageFactory, InMemoryTokenManager, RequestTokenRecord,
        ServiceProviderMessageFactory, TokenManager, V10A,
    },
    openid::ExtensionArgumentsManager,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use url::Url;

use crate::observability::{LogFormat, init_logging};

#[derive(Debug, Parser)]
#[command(name = "authwire-inspect", version, about = "Inspect OAuth 1.0 and OpenID protocol fields")]
struct Cli {
    /// Log format; defaults to `LOG_FORMAT` from the environment.
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Debug-level logs from the protocol engine.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the signature base string for a request.
    BaseString(RequestArgs),
    /// Sign a request with a shared-secret algorithm.
    Sign {
        #[command(flatten)]
        request: RequestArgs,
        /// `HMAC-SHA1`, `HMAC-SHA256` or `PLAINTEXT`.
        #[arg(long, default_value = "HMAC-SHA1", value_parser = parse_algorithm)]
        algorithm: SignatureAlgorithm,
        /// Consumer secret.
        #[arg(long)]
        consumer_secret: String,
        /// Token secret, empty when no token is involved.
        #[arg(long, default_value = "")]
        token_secret: String,
    },
    /// Report which message type a field set dispatches to.
    Classify {
        #[command(flatten)]
        fields: FieldArgs,
        /// Which party receives the fields.
        #[arg(long, value_enum, default_value_t = Side::Provider)]
        side: Side,
        /// Recipient URL.
        #[arg(long, default_value = "https://sp.example.com/oauth")]
        url: Url,
        /// Request tokens the provider should know about.
        #[arg(long = "request-token")]
        request_tokens: Vec<String>,
        /// Access tokens the provider should know about.
        #[arg(long = "access-token")]
        access_tokens: Vec<String>,
    },
    /// Group OpenID extension arguments by type URI.
    Extensions(FieldArgs),
}

#[derive(Debug, Args)]
struct RequestArgs {
    /// HTTP method.
    #[arg(long, default_value = "GET")]
    method: String,
    /// Request URL; its query parameters are part of the base string.
    #[arg(long)]
    url: Url,
    #[command(flatten)]
    fields: FieldArgs,
}

#[derive(Debug, Args)]
struct FieldArgs {
    /// A `key=value` field; repeatable.
    #[arg(short, long = "field", value_parser = parse_field)]
    field: Vec<(String, String)>,
    /// Form-encoded fields.
    #[arg(long)]
    query: Option<String>,
}

impl FieldArgs {
    fn to_fields(&self) -> Fields {
        let mut fields = self.query.as_deref().map(parse_query_string).unwrap_or_default();
        fields.extend(self.field.iter().cloned());
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Side {
    /// Service provider receiving a consumer request.
    Provider,
    /// Consumer receiving a user-agent callback.
    Consumer,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

fn parse_algorithm(raw: &str) -> Result<SignatureAlgorithm, String> {
    SignatureAlgorithm::from_name(&raw.to_uppercase()).ok_or_else(|| format!("unknown signature method `{raw}`"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format.unwrap_or_else(LogFormat::from_env), cli.verbose);

    match cli.command {
        Command::BaseString(request) => {
            let fields = request.fields.to_fields();
            println!("{}", signature_base_string(&request.method.to_uppercase(), &request.url, &fields));
        }
        Command::Sign { request, algorithm, consumer_secret, token_secret } => {
            if algorithm == SignatureAlgorithm::RsaSha1 {
                bail!("RSA-SHA1 needs a private key; only shared-secret methods are supported here");
            }
            let fields = request.fields.to_fields();
            let base = signature_base_string(&request.method.to_uppercase(), &request.url, &fields);
            debug!(base = %base, "computed signature base string");
            let signature = compute_signature(algorithm, &base, &consumer_secret, &token_secret, None)
                .context("signing failed")?;
            println!("oauth_signature_method={algorithm}");
            println!("oauth_signature={signature}");
        }
        Command::Classify { fields, side, url, request_tokens, access_tokens } => {
            let fields = fields.to_fields();
            let recipient = MessageReceivingEndpoint::parse(
                url.as_str(),
                HttpDeliveryMethods::GET | HttpDeliveryMethods::POST | HttpDeliveryMethods::AUTHORIZATION_HEADER,
            )?;
            let factory: Box<dyn MessageFactory> = match side {
                Side::Provider => Box::new(provider_factory(&fields, &request_tokens, &access_tokens)?),
                Side::Consumer => Box::new(ConsumerMessageFactory::new()),
            };
            match factory.create_request(&fields, &recipient)? {
                Some(message) => println!("{} (version {})", message.type_name(), message.version()),
                None => println!("no recognized message"),
            }
        }
        Command::Extensions(fields) => {
            let manager = ExtensionArgumentsManager::from_incoming(&fields.to_fields())?;
            info!(version = %manager.version(), extensions = manager.aliases().len(), "read extension arguments");
            for type_uri in manager.extension_type_uris() {
                let alias = manager.aliases().alias_of(type_uri).unwrap_or("?");
                println!("{type_uri} (alias {alias})");
                for (key, value) in manager.extension_arguments(type_uri).into_iter().flatten() {
                    println!("  {key} = {value}");
                }
            }
        }
    }
    Ok(())
}

/// Builds a provider factory whose store knows the given tokens, all issued to the
/// consumer named in the fields.
fn provider_factory(
    fields: &Fields,
    request_tokens: &[String],
    access_tokens: &[String],
) -> anyhow::Result<ServiceProviderMessageFactory> {
    let consumer_key = fields.get("oauth_consumer_key").map_or("inspect", String::as_str);
    let tokens = Arc::new(InMemoryTokenManager::new());
    for token in request_tokens.iter().chain(access_tokens) {
        tokens.store_new_request_token(RequestTokenRecord {
            token: token.clone(),
            secret: String::new(),
            consumer_key: consumer_key.to_owned(),
            consumer_version: V10A,
            callback: None,
            created_on: Utc::now(),
            verifier: None,
            authorized_by: None,
        });
    }
    for token in access_tokens {
        let record = AccessTokenRecord {
            token: token.clone(),
            secret: String::new(),
            consumer_key: consumer_key.to_owned(),
            username: None,
            roles: Vec::new(),
            created_on: Utc::now(),
            expiration_date: None,
        };
        tokens
            .expire_request_token_and_store_access_token(consumer_key, token, record)
            .with_context(|| format!("cannot seed access token {token}"))?;
    }
    Ok(ServiceProviderMessageFactory::new(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn test_parse_field() {
        assert_eq!(parse_field("a=b=c"), Ok(("a".to_owned(), "b=c".to_owned())));
        assert!(parse_field("novalue").is_err());
    }

    #[test]
    fn test_parse_algorithm_is_case_insensitive() {
        assert_eq!(parse_algorithm("hmac-sha256"), Ok(SignatureAlgorithm::HmacSha256));
        assert!(parse_algorithm("md5").is_err());
    }

    #[test]
    fn test_flags_override_query() {
        let args = FieldArgs {
            field: vec![("a".to_owned(), "flag".to_owned())],
            query: Some("a=query&b=2".to_owned()),
        };
        assert_eq!(args.to_fields(), fields(&[("a", "flag"), ("b", "2")]));
    }

    #[test]
    fn test_provider_factory_knows_seeded_tokens() {
        let request = fields(&[("oauth_consumer_key", "ck1"), ("oauth_token", "at1")]);
        let factory = provider_factory(&request, &["rt1".to_owned()], &["at1".to_owned()]).unwrap();
        let recipient =
            MessageReceivingEndpoint::parse("https://sp.example.com/oauth", HttpDeliveryMethods::POST).unwrap();

        let message: Box<dyn ProtocolMessage> = factory.create_request(&request, &recipient).unwrap().unwrap();
        assert_eq!(message.type_name(), "AccessProtectedResourceRequest");

        let exchange = fields(&[("oauth_consumer_key", "ck1"), ("oauth_token", "rt1")]);
        let message = factory.create_request(&exchange, &recipient).unwrap().unwrap();
        assert_eq!(message.type_name(), "AuthorizedTokenRequest");
    }
}
