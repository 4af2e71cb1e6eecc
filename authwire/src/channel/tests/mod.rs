use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use super::*;
use crate::{
    bindings::{MemoryNonceStore, SignatureAlgorithm, SigningBindingElement},
    clock::{Clock, ManualClock},
    config::MessagingSettings,
    messaging::SignedMessage,
    oauth::{
        AccessProtectedResourceRequest, AccessTokenRecord, AuthorizedTokenResponse, Callback,
        ConsumerCredentials, ConsumerMessageFactory, ConsumerRecord, InMemoryTokenManager,
        RequestTokenRecord, ServiceProviderMessageFactory, TokenManager, UnauthorizedTokenRequest,
        UnauthorizedTokenResponse, UserAuthorizationRequest, V10A, consumer_channel,
        service_provider_channel,
    },
};

#[derive(Debug)]
struct Canned(HttpResponse);

impl DirectTransport for Canned {
    async fn transmit(&self, _request: HttpRequest) -> Result<HttpResponse> {
        Ok(self.0.clone())
    }

    fn protocol_name(&self) -> &'static str {
        "canned"
    }
}

#[derive(Debug)]
struct Stalled;

impl DirectTransport for Stalled {
    async fn transmit(&self, _request: HttpRequest) -> Result<HttpResponse> {
        std::future::pending().await
    }

    fn protocol_name(&self) -> &'static str {
        "stalled"
    }
}

#[derive(Debug)]
struct AlwaysTamper(&'static str);

impl BindingElement for AlwaysTamper {
    fn protection(&self) -> MessageProtections {
        MessageProtections::TAMPER_PROTECTION
    }

    fn name(&self) -> &'static str {
        self.0
    }

    fn prepare_outgoing(&self, _message: &mut dyn ProtocolMessage) -> Result<Option<MessageProtections>> {
        Ok(Some(MessageProtections::TAMPER_PROTECTION))
    }

    fn process_incoming(&self, _message: &mut dyn ProtocolMessage) -> Result<Option<MessageProtections>> {
        Ok(Some(MessageProtections::TAMPER_PROTECTION))
    }
}

struct Fixture {
    clock: Arc<ManualClock>,
    tokens: Arc<InMemoryTokenManager>,
    nonces: Arc<MemoryNonceStore>,
    consumer: Channel,
    provider: Channel,
}

fn fixture_with(settings: &MessagingSettings) -> Fixture {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));

    let credentials = Arc::new(ConsumerCredentials::new("ck1", "consumer-secret"));
    credentials.store_token_secret("at1", "token-secret");
    let descriptions = DescriptionCache::new();
    let signing =
        SigningBindingElement::new(SignatureAlgorithm::HmacSha1, credentials, descriptions.clone());
    let consumer = consumer_channel(
        Box::new(signing),
        descriptions,
        Arc::new(MemoryNonceStore::with_defaults(clock.clone())),
        clock.clone(),
        settings,
    )
    .unwrap();

    let tokens = Arc::new(InMemoryTokenManager::new());
    tokens.add_consumer(ConsumerRecord::new("ck1", "consumer-secret"));
    for token in ["rt1", "rt-exchanged"] {
        tokens.store_new_request_token(RequestTokenRecord {
            token: token.to_owned(),
            secret: "request-secret".to_owned(),
            consumer_key: "ck1".to_owned(),
            consumer_version: V10A,
            callback: Some(Callback::OutOfBand),
            created_on: clock.now(),
            verifier: None,
            authorized_by: None,
        });
    }
    tokens
        .expire_request_token_and_store_access_token(
            "ck1",
            "rt-exchanged",
            AccessTokenRecord {
                token: "at1".to_owned(),
                secret: "token-secret".to_owned(),
                consumer_key: "ck1".to_owned(),
                username: Some("alice".to_owned()),
                roles: Vec::new(),
                created_on: clock.now(),
                expiration_date: None,
            },
        )
        .unwrap();
    let nonces = Arc::new(MemoryNonceStore::with_defaults(clock.clone()));
    let provider = service_provider_channel(
        tokens.clone(),
        nonces.clone(),
        clock.clone(),
        settings,
    )
    .unwrap();

    Fixture { clock, tokens, nonces, consumer, provider }
}

fn fixture() -> Fixture {
    fixture_with(&MessagingSettings::default())
}

fn resource_request(url: &str, methods: HttpDeliveryMethods) -> AccessProtectedResourceRequest {
    let mut request =
        AccessProtectedResourceRequest::new(MessageReceivingEndpoint::parse(url, methods).unwrap(), V10A);
    request.signed.consumer_key = "ck1".to_owned();
    request.access_token = "at1".to_owned();
    request
}

fn read_resource(fixture: &Fixture, request: &HttpRequest) -> Result<AccessProtectedResourceRequest> {
    fixture
        .provider
        .read_request::<AccessProtectedResourceRequest>(request)?
        .ok_or_else(|| ProtocolError::UnrecognizedMessage("none".to_owned()))
}

#[test]
fn test_signed_request_in_authorization_header() {
    let fixture = fixture();
    let mut message = resource_request(
        "https://sp.example.com/photos?size=original",
        HttpDeliveryMethods::GET | HttpDeliveryMethods::AUTHORIZATION_HEADER,
    );
    let request = fixture.consumer.prepare_direct_request(&mut message).unwrap();
    assert!(request.header("Authorization").is_some());
    assert_eq!(request.url.query(), Some("size=original"));

    let received = read_resource(&fixture, &request).unwrap();
    assert_eq!(received.access_token, "at1");
    assert_eq!(received.extra_data.get("size").map(String::as_str), Some("original"));
    assert_eq!(received.http_method(), "GET");
}

#[test]
fn test_signed_request_in_post_body() {
    let fixture = fixture();
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::POST);
    message.extra_data.insert("title".to_owned(), "a b&c".to_owned());
    let request = fixture.consumer.prepare_direct_request(&mut message).unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(request.header("Content-Type"), Some(FORM_CONTENT_TYPE));
    assert!(request.header("Authorization").is_none());

    let received = read_resource(&fixture, &request).unwrap();
    assert_eq!(received.extra_data.get("title").map(String::as_str), Some("a b&c"));
}

#[test]
fn test_signed_request_in_get_query() {
    let fixture = fixture();
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::GET);
    let request = fixture.consumer.prepare_direct_request(&mut message).unwrap();
    assert_eq!(request.method, "GET");
    assert!(request.url.query().is_some_and(|q| q.contains("oauth_signature=")));
    assert!(read_resource(&fixture, &request).is_ok());
}

#[test]
fn test_header_extra_data_goes_to_body_for_post() {
    let fixture = fixture();
    let mut message = resource_request(
        "https://sp.example.com/photos",
        HttpDeliveryMethods::POST | HttpDeliveryMethods::AUTHORIZATION_HEADER,
    );
    message.extra_data.insert("status".to_owned(), "hello".to_owned());
    let request = fixture.consumer.prepare_direct_request(&mut message).unwrap();
    let header = request.header("Authorization").unwrap();
    assert!(!header.contains("status"));
    assert_eq!(request.body, b"status=hello");
    assert!(read_resource(&fixture, &request).is_ok());
}

#[test]
fn test_replayed_request_is_rejected() {
    let fixture = fixture();
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::GET);
    let request = fixture.consumer.prepare_direct_request(&mut message).unwrap();
    assert!(read_resource(&fixture, &request).is_ok());
    assert!(matches!(read_resource(&fixture, &request), Err(ProtocolError::ReplayDetected { .. })));
}

#[test]
fn test_tampered_query_is_rejected() {
    let fixture = fixture();
    let mut message = resource_request(
        "https://sp.example.com/photos?size=small",
        HttpDeliveryMethods::GET | HttpDeliveryMethods::AUTHORIZATION_HEADER,
    );
    let mut request = fixture.consumer.prepare_direct_request(&mut message).unwrap();
    request.url.set_query(Some("size=original"));
    assert!(matches!(
        read_resource(&fixture, &request),
        Err(ProtocolError::SignatureInvalid { failure: crate::error::SignatureFailure::Mismatch, .. })
    ));
}

#[test]
fn test_stale_request_is_rejected() {
    let fixture = fixture();
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::GET);
    let request = fixture.consumer.prepare_direct_request(&mut message).unwrap();
    fixture.clock.advance(Duration::minutes(14));
    assert!(matches!(read_resource(&fixture, &request), Err(ProtocolError::MessageExpired { .. })));
}

#[test]
fn test_unsupported_signature_method_stores_no_nonce() {
    let fixture = fixture();
    let request = HttpRequest::get(
        "https://sp.example.com/photos?oauth_consumer_key=ck1&oauth_token=at1\
         &oauth_signature_method=BOGUS&oauth_signature=x&oauth_timestamp=1709294400&oauth_nonce=n1",
    )
    .unwrap();
    assert!(matches!(
        fixture.provider.read_incoming(&request),
        Err(ProtocolError::InsufficientMessageProtection { applied: MessageProtections::NONE, .. })
    ));
    assert!(fixture.nonces.is_empty());
}

#[test]
fn test_unsigned_flood_cannot_displace_captured_nonce() {
    let fixture = fixture();
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::GET);
    let captured = fixture.consumer.prepare_direct_request(&mut message).unwrap();
    assert!(read_resource(&fixture, &captured).is_ok());
    assert_eq!(fixture.nonces.len(), 1);

    for nonce in 0..64 {
        let forged = HttpRequest::get(&format!(
            "https://sp.example.com/photos?oauth_consumer_key=ck1&oauth_token=at1\
             &oauth_signature_method=BOGUS&oauth_signature=x&oauth_timestamp=1709294400&oauth_nonce=f{nonce}"
        ))
        .unwrap();
        assert!(fixture.provider.read_incoming(&forged).is_err());
    }
    assert_eq!(fixture.nonces.len(), 1);
    assert!(matches!(read_resource(&fixture, &captured), Err(ProtocolError::ReplayDetected { .. })));
}

#[test]
fn test_out_of_range_timestamp_is_malformed() {
    let fixture = fixture();
    for timestamp in ["8210266876799", "-1"] {
        let request = HttpRequest::get(&format!(
            "https://sp.example.com/photos?oauth_consumer_key=ck1&oauth_token=at1\
             &oauth_signature_method=BOGUS&oauth_signature=x&oauth_timestamp={timestamp}&oauth_nonce=n1"
        ))
        .unwrap();
        let error = fixture.provider.read_incoming(&request).unwrap_err();
        assert!(error.is_malformed(), "{timestamp}: {error}");
    }
    assert!(fixture.nonces.is_empty());
}

#[test]
fn test_conflicting_duplicate_fields_are_malformed() {
    let fixture = fixture();
    let request = HttpRequest::get("https://sp.example.com/photos?oauth_token=a")
        .unwrap()
        .with_header("Authorization", "OAuth oauth_token=\"b\"");
    assert!(matches!(fixture.provider.read_incoming(&request), Err(ProtocolError::MalformedMessage(_))));

    let agreeing = HttpRequest::get("https://sp.example.com/authorize?oauth_token=rt1")
        .unwrap()
        .with_header("Authorization", "OAuth realm=\"sp\", oauth_token=\"rt1\"");
    let message = fixture.provider.read_incoming(&agreeing).unwrap().unwrap();
    assert_eq!(message.type_name(), "UserAuthorizationRequest");
}

#[test]
fn test_request_without_protocol_fields_is_none() {
    let fixture = fixture();
    let plain = HttpRequest::get("https://sp.example.com/index.html").unwrap();
    assert!(fixture.provider.read_incoming(&plain).unwrap().is_none());
    let unrelated = HttpRequest::get("https://sp.example.com/search?q=rust").unwrap();
    assert!(fixture.provider.read_incoming(&unrelated).unwrap().is_none());
}

#[test]
fn test_unknown_token_surfaces_as_error() {
    let fixture = fixture();
    let request =
        HttpRequest::get("https://sp.example.com/r?oauth_consumer_key=ck1&oauth_token=nope").unwrap();
    assert!(matches!(fixture.provider.read_incoming(&request), Err(ProtocolError::TokenNotFound { .. })));
}

#[test]
fn test_wrong_type_is_unrecognized() {
    let fixture = fixture();
    let request = HttpRequest::get("https://sp.example.com/authorize?oauth_token=rt1").unwrap();
    assert!(matches!(
        fixture.provider.read_request::<AccessProtectedResourceRequest>(&request),
        Err(ProtocolError::UnrecognizedMessage(_))
    ));
}

#[test]
fn test_outgoing_without_signing_is_insufficient() {
    let channel = Channel::builder(Arc::new(ConsumerMessageFactory::new())).build().unwrap();
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::GET);
    assert!(matches!(
        channel.prepare_outgoing(&mut message),
        Err(ProtocolError::InsufficientMessageProtection { required: MessageProtections::ALL, .. })
    ));
}

#[test]
fn test_incoming_without_signing_is_insufficient() {
    let fixture = fixture();
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::GET);
    let request = fixture.consumer.prepare_direct_request(&mut message).unwrap();

    let unprotected =
        Channel::builder(Arc::new(ServiceProviderMessageFactory::new(fixture.tokens.clone())))
            .build()
            .unwrap();
    assert!(matches!(
        unprotected.read_incoming(&request),
        Err(ProtocolError::InsufficientMessageProtection { .. })
    ));
}

#[test]
fn test_duplicate_protection_is_a_conflict() {
    let channel = Channel::builder(Arc::new(ConsumerMessageFactory::new()))
        .binding_element(AlwaysTamper("first"))
        .binding_element(AlwaysTamper("second"))
        .build()
        .unwrap();
    let mut message = UserAuthorizationRequest::new(
        MessageReceivingEndpoint::parse("https://sp.example.com/authorize", HttpDeliveryMethods::GET)
            .unwrap(),
        V10A,
    );
    assert!(matches!(channel.send_indirect(&mut message), Err(ProtocolError::BindingConflict(_))));
}

#[test]
fn test_indirect_message_as_redirect() {
    let fixture = fixture();
    let mut message = UserAuthorizationRequest::new(
        MessageReceivingEndpoint::parse("https://sp.example.com/authorize", HttpDeliveryMethods::GET)
            .unwrap(),
        V10A,
    );
    message.request_token = "rt1".to_owned();
    let indirect = fixture.consumer.send_indirect(&mut message).unwrap();
    let IndirectMessage::Redirect { location } = &indirect else {
        panic!("expected a redirect, got {indirect:?}");
    };
    assert_eq!(location.as_str(), "https://sp.example.com/authorize?oauth_token=rt1");

    let received = fixture
        .provider
        .read_request::<UserAuthorizationRequest>(&indirect.into_http_request())
        .unwrap()
        .unwrap();
    assert_eq!(received.request_token, "rt1");
}

#[derive(Debug, Default)]
struct Recording(std::sync::Mutex<Vec<IndirectMessage>>);

impl IndirectPresenter for Recording {
    fn present(&self, message: &IndirectMessage) -> Result<()> {
        self.0.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[test]
fn test_present_indirect_hands_payload_to_presenter() {
    let fixture = fixture();
    let mut message = UserAuthorizationRequest::new(
        MessageReceivingEndpoint::parse("https://sp.example.com/authorize", HttpDeliveryMethods::GET)
            .unwrap(),
        V10A,
    );
    message.request_token = "rt1".to_owned();
    let presenter = Recording::default();

    fixture.consumer.present_indirect(&mut message, &presenter).unwrap();

    let presented = presenter.0.lock().unwrap();
    assert_eq!(presented.len(), 1);
    assert_eq!(presented[0].url().as_str(), "https://sp.example.com/authorize?oauth_token=rt1");
}

#[test]
fn test_long_indirect_message_as_form_post() {
    let settings = MessagingSettings { maximum_indirect_url_length: 256, ..MessagingSettings::default() };
    let fixture = fixture_with(&settings);
    let endpoint = |methods| {
        MessageReceivingEndpoint::parse("https://sp.example.com/authorize", methods).unwrap()
    };

    let mut message =
        UserAuthorizationRequest::new(endpoint(HttpDeliveryMethods::GET | HttpDeliveryMethods::POST), V10A);
    message.request_token = "rt1".to_owned();
    message.extra_data.insert("state".to_owned(), "x".repeat(300));
    let indirect = fixture.consumer.send_indirect(&mut message).unwrap();
    assert!(matches!(&indirect, IndirectMessage::FormPost { fields, .. } if fields.len() == 2));

    let received = fixture.provider.read_incoming(&indirect.into_http_request()).unwrap();
    assert!(received.is_some());

    let mut get_only = UserAuthorizationRequest::new(endpoint(HttpDeliveryMethods::GET), V10A);
    get_only.extra_data.insert("state".to_owned(), "x".repeat(300));
    assert!(matches!(fixture.consumer.send_indirect(&mut get_only), Err(ProtocolError::InvalidInput(_))));
}

#[test]
fn test_direct_message_cannot_be_sent_indirectly() {
    let fixture = fixture();
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::GET);
    assert!(matches!(fixture.consumer.send_indirect(&mut message), Err(ProtocolError::InvalidInput(_))));
}

#[test]
fn test_direct_response_encodings() {
    let mut response = AuthorizedTokenResponse::new(V10A);
    response.access_token = "at 1".to_owned();
    response.token_secret = "as".to_owned();

    let form = Channel::builder(Arc::new(ConsumerMessageFactory::new())).build().unwrap();
    let encoded = form.prepare_direct_response(&mut response).unwrap();
    assert_eq!(encoded.status, 200);
    assert_eq!(encoded.header("Content-Type"), Some(FORM_CONTENT_TYPE));
    assert_eq!(encoded.body, b"oauth_token=at%201&oauth_token_secret=as");

    let key_value = Channel::builder(Arc::new(ConsumerMessageFactory::new()))
        .settings(ChannelSettings { response_encoding: ResponseEncoding::KeyValue, ..ChannelSettings::default() })
        .build()
        .unwrap();
    let encoded = key_value.prepare_direct_response(&mut response).unwrap();
    assert_eq!(encoded.header("Content-Type"), Some(KEY_VALUE_CONTENT_TYPE));
    assert_eq!(encoded.body, b"oauth_token:at 1\noauth_token_secret:as\n");
}

#[tokio::test]
async fn test_send_parses_typed_response() {
    let fixture = fixture();
    let transport = Canned(HttpResponse::ok(
        FORM_CONTENT_TYPE,
        b"oauth_token=rt9&oauth_token_secret=rs9&oauth_callback_confirmed=true".to_vec(),
    ));
    let mut request = UnauthorizedTokenRequest::new(
        MessageReceivingEndpoint::parse(
            "https://sp.example.com/request_token",
            HttpDeliveryMethods::POST | HttpDeliveryMethods::AUTHORIZATION_HEADER,
        )
        .unwrap(),
        V10A,
        "ck1",
    );
    request.callback = Some(Callback::OutOfBand);

    let response: UnauthorizedTokenResponse =
        fixture.consumer.send_expecting(&transport, &mut request).await.unwrap();
    assert_eq!(response.request_token, "rt9");
    assert_eq!(response.token_secret, "rs9");
    assert_eq!(response.version(), V10A);
}

#[tokio::test(start_paused = true)]
async fn test_send_times_out_as_communication_failure() {
    let fixture = fixture();
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::GET);
    let error = fixture.consumer.send(&Stalled, &mut message).await.unwrap_err();
    assert!(error.is_communication_failure(), "{error}");
}

#[tokio::test]
async fn test_send_error_status_is_communication_failure() {
    let fixture = fixture();
    let transport = Canned(HttpResponse { status: 401, headers: Vec::new(), body: Vec::new() });
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::GET);
    let error = fixture.consumer.send(&transport, &mut message).await.unwrap_err();
    assert!(matches!(&error, ProtocolError::CommunicationFailure(reason) if reason.contains("401")));
}

#[tokio::test]
async fn test_send_unrecognized_response() {
    let fixture = fixture();
    let transport = Canned(HttpResponse::ok(FORM_CONTENT_TYPE, b"hello=world".to_vec()));
    let mut message = resource_request("https://sp.example.com/photos", HttpDeliveryMethods::GET);
    assert!(matches!(
        fixture.consumer.send(&transport, &mut message).await,
        Err(ProtocolError::UnrecognizedMessage(_))
    ));
}

#[tokio::test]
async fn test_send_rejects_indirect_message() {
    let fixture = fixture();
    let transport = Canned(HttpResponse::ok(FORM_CONTENT_TYPE, Vec::new()));
    let mut message = UserAuthorizationRequest::new(
        MessageReceivingEndpoint::parse("https://sp.example.com/authorize", HttpDeliveryMethods::GET)
            .unwrap(),
        V10A,
    );
    assert!(matches!(
        fixture.consumer.send(&transport, &mut message).await,
        Err(ProtocolError::InvalidInput(_))
    ));
}
