//! Service-provider token bookkeeping.

use std::sync::Arc;

use chrono::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::BindingElement;
use crate::{
    audit,
    clock::Clock,
    error::{ProtocolError, Result},
    messaging::{MessageProtections, ProtocolMessage},
    oauth::{
        AccessProtectedResourceRequest, AuthorizedTokenRequest, RequestTokenRecord, TokenManager,
        UnauthorizedTokenResponse, UserAuthorizationRequest, UserAuthorizationResponse, V10A,
    },
    security::audit::{AuditEventType, redact_token},
};

/// Default lifetime of an unexchanged request token.
pub const DEFAULT_MAXIMUM_REQUEST_TOKEN_TTL: Duration = Duration::minutes(5);

/// Persists issued tokens and verifiers, and enforces token lifetimes and verifiers on
/// incoming requests.
#[derive(Debug, Clone)]
pub struct TokenHandlingBindingElement {
    token_manager: Arc<dyn TokenManager>,
    clock: Arc<dyn Clock>,
    maximum_request_token_ttl: Duration,
}

impl TokenHandlingBindingElement {
    /// Creates an element with the default request-token lifetime.
    #[must_use]
    pub fn new(token_manager: Arc<dyn TokenManager>, clock: Arc<dyn Clock>) -> Self {
        Self { token_manager, clock, maximum_request_token_ttl: DEFAULT_MAXIMUM_REQUEST_TOKEN_TTL }
    }

    /// Overrides the request-token lifetime.
    #[must_use]
    pub const fn with_request_token_ttl(mut self, ttl: Duration) -> Self {
        self.maximum_request_token_ttl = ttl;
        self
    }

    fn store_request_token(&self, response: &UnauthorizedTokenResponse) {
        self.token_manager.store_new_request_token(RequestTokenRecord {
            token: response.request_token.clone(),
            secret: response.token_secret.clone(),
            consumer_key: response.consumer_key.clone(),
            consumer_version: response.version(),
            callback: response.callback.clone(),
            created_on: self.clock.now(),
            verifier: None,
            authorized_by: None,
        });
        debug!(token = %redact_token(&response.request_token), "request token stored");
        audit!(
            AuditEventType::RequestTokenIssued,
            response.consumer_key.as_str(),
            Uuid::new_v4(),
            with_token(&response.request_token)
        );
    }

    fn record_verifier(&self, response: &UserAuthorizationResponse) -> Result<()> {
        let mut record = self.token_manager.get_request_token(&response.request_token)?;
        record.verifier = Some(response.verifier.clone());
        self.token_manager.update_token(record)?;
        Ok(())
    }

    /// Fails when the request token is older than the maximum lifetime.
    fn verify_request_token_ttl(&self, token: &str) -> Result<RequestTokenRecord> {
        let record = self.token_manager.get_request_token(token)?;
        let expired_at = record.created_on + self.maximum_request_token_ttl;
        if self.clock.now() >= expired_at {
            warn!(token = %redact_token(token), %expired_at, "request token expired");
            audit!(
                AuditEventType::TokenRejected,
                record.consumer_key.as_str(),
                Uuid::new_v4(),
                with_token(token),
                with_error("request token expired")
            );
            return Err(ProtocolError::TokenExpired { token: redact_token(token), expired_at });
        }
        Ok(record)
    }

    fn verify_authorized_token_request(&self, request: &AuthorizedTokenRequest) -> Result<()> {
        let record = self.verify_request_token_ttl(&request.request_token)?;
        if record.consumer_key != request.signed.consumer_key {
            return Err(ProtocolError::TokenNotFound {
                kind: "request token".to_owned(),
                token: redact_token(&request.request_token),
            });
        }
        if request.version() >= V10A {
            let expected = record.verifier.unwrap_or_default();
            let matches: bool = expected.as_bytes().ct_eq(request.verifier.as_bytes()).into();
            if expected.is_empty() || !matches {
                warn!(token = %redact_token(&request.request_token), "verifier mismatch");
                audit!(
                    AuditEventType::VerifierRejected,
                    record.consumer_key.as_str(),
                    Uuid::new_v4(),
                    with_token(&request.request_token)
                );
                return Err(ProtocolError::VerifierMismatch {
                    token: redact_token(&request.request_token),
                });
            }
        }
        Ok(())
    }

    fn verify_access_token_not_expired(&self, request: &AccessProtectedResourceRequest) -> Result<()> {
        let record = self.token_manager.get_access_token(&request.access_token)?;
        if let Some(expired_at) = record.expiration_date
            && self.clock.now() >= expired_at
        {
            warn!(token = %redact_token(&request.access_token), %expired_at, "access token expired");
            audit!(
                AuditEventType::TokenRejected,
                record.consumer_key.as_str(),
                Uuid::new_v4(),
                with_token(&request.access_token),
                with_error("access token expired")
            );
            return Err(ProtocolError::TokenExpired {
                token: redact_token(&request.access_token),
                expired_at,
            });
        }
        Ok(())
    }
}

impl BindingElement for TokenHandlingBindingElement {
    fn protection(&self) -> MessageProtections {
        MessageProtections::NONE
    }

    fn name(&self) -> &'static str {
        "token-handling"
    }

    #[instrument(skip(self, message), fields(message_type = message.type_name()))]
    fn prepare_outgoing(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        if let Some(response) = message.downcast_ref::<UserAuthorizationResponse>()
            && response.version() >= V10A
        {
            self.record_verifier(response)?;
            return Ok(Some(MessageProtections::NONE));
        }
        if let Some(response) = message.downcast_ref::<UnauthorizedTokenResponse>() {
            self.store_request_token(response);
            return Ok(Some(MessageProtections::NONE));
        }
        Ok(None)
    }

    #[instrument(skip(self, message), fields(message_type = message.type_name()))]
    fn process_incoming(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Option<MessageProtections>> {
        if let Some(request) = message.downcast_ref::<AuthorizedTokenRequest>() {
            self.verify_authorized_token_request(request)?;
            return Ok(Some(MessageProtections::NONE));
        }
        if let Some(request) = message.downcast_ref::<UserAuthorizationRequest>() {
            if !request.request_token.is_empty() {
                self.verify_request_token_ttl(&request.request_token)?;
            }
            return Ok(Some(MessageProtections::NONE));
        }
        if let Some(request) = message.downcast_ref::<AccessProtectedResourceRequest>() {
            self.verify_access_token_not_expired(request)?;
            return Ok(Some(MessageProtections::NONE));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        clock::ManualClock,
        messaging::{HttpDeliveryMethods, MessageReceivingEndpoint},
        oauth::{
            AccessTokenRecord, Callback, InMemoryTokenManager, UnauthorizedTokenRequest, V10,
        },
    };

    struct Fixture {
        clock: Arc<ManualClock>,
        manager: Arc<InMemoryTokenManager>,
        element: TokenHandlingBindingElement,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
        let manager = Arc::new(InMemoryTokenManager::new());
        let element = TokenHandlingBindingElement::new(manager.clone(), clock.clone());
        Fixture { clock, manager, element }
    }

    fn endpoint(path: &str) -> MessageReceivingEndpoint {
        MessageReceivingEndpoint::parse(&format!("https://sp.example.com{path}"), HttpDeliveryMethods::POST)
            .unwrap()
    }

    fn issue(fixture: &Fixture, version: crate::messaging::ProtocolVersion) {
        let mut request = UnauthorizedTokenRequest::new(endpoint("/request_token"), version, "ck1");
        request.callback = Some(Callback::OutOfBand);
        let mut response =
            UnauthorizedTokenResponse::for_request(&request, "rt1".to_owned(), "rs1".to_owned());
        fixture.element.prepare_outgoing(&mut response).unwrap();
    }

    fn exchange(version: crate::messaging::ProtocolVersion, verifier: &str) -> AuthorizedTokenRequest {
        let mut request = AuthorizedTokenRequest::new(endpoint("/access_token"), version, "ck1", "rt1");
        request.verifier = verifier.to_owned();
        request
    }

    #[test]
    fn test_outgoing_token_response_is_stored() {
        let fixture = fixture();
        issue(&fixture, V10A);
        let record = fixture.manager.get_request_token("rt1").unwrap();
        assert_eq!(record.consumer_key, "ck1");
        assert_eq!(record.consumer_version, V10A);
        assert_eq!(record.callback, Some(Callback::OutOfBand));
        assert_eq!(record.created_on, fixture.clock.now());
    }

    #[test]
    fn test_outgoing_authorization_response_records_verifier() {
        let fixture = fixture();
        issue(&fixture, V10A);
        let mut response = UserAuthorizationResponse::new(endpoint("/cb"), V10A);
        response.request_token = "rt1".to_owned();
        response.verifier = "abcde".to_owned();
        fixture.element.prepare_outgoing(&mut response).unwrap();
        assert_eq!(fixture.manager.get_request_token("rt1").unwrap().verifier.as_deref(), Some("abcde"));
    }

    #[test]
    fn test_verifier_must_match_exactly() {
        let fixture = fixture();
        issue(&fixture, V10A);
        let mut record = fixture.manager.get_request_token("rt1").unwrap();
        record.verifier = Some("abcde".to_owned());
        fixture.manager.update_token(record).unwrap();

        let error = fixture.element.process_incoming(&mut exchange(V10A, "ABCDE")).unwrap_err();
        assert!(matches!(error, ProtocolError::VerifierMismatch { .. }));
        assert!(fixture.element.process_incoming(&mut exchange(V10A, "abcde")).is_ok());
    }

    #[test]
    fn test_missing_recorded_verifier_rejects_10a_exchange() {
        let fixture = fixture();
        issue(&fixture, V10A);
        let error = fixture.element.process_incoming(&mut exchange(V10A, "")).unwrap_err();
        assert!(matches!(error, ProtocolError::VerifierMismatch { .. }));
    }

    #[test]
    fn test_legacy_exchange_checks_ttl_only() {
        let fixture = fixture();
        issue(&fixture, V10);
        assert!(fixture.element.process_incoming(&mut exchange(V10, "")).is_ok());
        fixture.clock.advance(Duration::minutes(5));
        let error = fixture.element.process_incoming(&mut exchange(V10, "")).unwrap_err();
        assert!(matches!(error, ProtocolError::TokenExpired { .. }));
    }

    #[test]
    fn test_unknown_token_is_token_not_found() {
        let fixture = fixture();
        let error = fixture.element.process_incoming(&mut exchange(V10A, "x")).unwrap_err();
        assert!(matches!(error, ProtocolError::TokenNotFound { .. }));
    }

    #[test]
    fn test_expired_access_token_rejected() {
        let fixture = fixture();
        fixture.manager.store_new_request_token(RequestTokenRecord {
            token: "rt9".to_owned(),
            secret: String::new(),
            consumer_key: "ck1".to_owned(),
            consumer_version: V10A,
            callback: None,
            created_on: fixture.clock.now(),
            verifier: None,
            authorized_by: Some("alice".to_owned()),
        });
        fixture
            .manager
            .expire_request_token_and_store_access_token(
                "ck1",
                "rt9",
                AccessTokenRecord {
                    token: "at1".to_owned(),
                    secret: "as1".to_owned(),
                    consumer_key: "ck1".to_owned(),
                    username: Some("alice".to_owned()),
                    roles: Vec::new(),
                    created_on: fixture.clock.now(),
                    expiration_date: Some(fixture.clock.now() + Duration::hours(1)),
                },
            )
            .unwrap();

        let mut request = AccessProtectedResourceRequest::new(endpoint("/photos"), V10A);
        request.signed.consumer_key = "ck1".to_owned();
        request.access_token = "at1".to_owned();
        assert!(fixture.element.process_incoming(&mut request).is_ok());

        fixture.clock.advance(Duration::hours(1));
        let error = fixture.element.process_incoming(&mut request).unwrap_err();
        assert!(matches!(error, ProtocolError::TokenExpired { .. }));
    }
}
