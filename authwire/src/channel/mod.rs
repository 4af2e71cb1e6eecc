//! Message channel: the binding-element pipeline between typed messages and the wire.
//!
//! # Outgoing
//!
//! ```text
//! message ─▶ binding elements (in order) ─▶ protection check ─▶ serialize
//!         ─▶ direct: HttpRequest ─▶ DirectTransport ─▶ response fields ─▶ incoming path
//!         ─▶ indirect: IndirectMessage (redirect or auto-post form)
//! ```
//!
//! # Incoming
//!
//! ```text
//! HttpRequest ─▶ fields (Authorization header + form body + query)
//!             ─▶ MessageFactory ─▶ deserialize ─▶ binding elements (reverse order)
//!             ─▶ protection check ─▶ typed message
//! ```
//!
//! A message that cannot be fully protected is never transmitted, and an incoming
//! message that fails any check surfaces as a typed [`ProtocolError`]; only a request
//! carrying no recognizable message yields `Ok(None)`.

use std::{sync::Arc, time::Duration};

use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    bindings::{BindingElement, order_binding_elements},
    error::{ProtocolError, Result},
    factory::MessageFactory,
    messaging::{
        DescriptionCache, Fields, HttpDeliveryMethods, MessageProtections,
        MessageReceivingEndpoint, MessageTransport, ProtocolMessage,
        encoding::{
            append_query_args, build_authorization_header, create_query_string,
            decode_key_value_form, encode_key_value_form, parse_authorization_header,
            parse_query_string, query_fields,
        },
    },
    transport::{
        DirectTransport, FORM_CONTENT_TYPE, HttpRequest, HttpResponse, IndirectPresenter,
        KEY_VALUE_CONTENT_TYPE,
    },
};

/// Default longest URL an indirect message is sent as a GET redirect.
pub const DEFAULT_MAXIMUM_INDIRECT_URL_LENGTH: usize = 2048;

/// Default deadline for a direct-message exchange.
pub const DEFAULT_DIRECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Body encoding of direct responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseEncoding {
    /// `application/x-www-form-urlencoded` (OAuth).
    #[default]
    Form,
    /// `key:value` lines (OpenID).
    KeyValue,
}

/// Per-channel behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Exact constant comparison and strict key-value parsing.
    pub strict: bool,
    /// Indirect messages whose URL would exceed this length are sent as forms.
    pub maximum_indirect_url_length: usize,
    /// Deadline for direct-message exchanges.
    pub direct_timeout: Duration,
    /// Body encoding for direct responses, both sent and received.
    pub response_encoding: ResponseEncoding,
    /// `realm` parameter for the `Authorization` header.
    pub realm: Option<String>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            strict: true,
            maximum_indirect_url_length: DEFAULT_MAXIMUM_INDIRECT_URL_LENGTH,
            direct_timeout: DEFAULT_DIRECT_TIMEOUT,
            response_encoding: ResponseEncoding::Form,
            realm: None,
        }
    }
}

/// An indirect message ready for the user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndirectMessage {
    /// Redirect the user agent with a GET to this URL.
    Redirect {
        /// Target URL including the message fields.
        location: Url,
    },
    /// Have the user agent POST these fields (an auto-submitting form).
    FormPost {
        /// Form action.
        action: Url,
        /// Form fields.
        fields: Fields,
    },
}

impl IndirectMessage {
    /// Target URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        match self {
            Self::Redirect { location } => location,
            Self::FormPost { action, .. } => action,
        }
    }

    /// The request the user agent makes when following this message.
    #[must_use]
    pub fn into_http_request(self) -> HttpRequest {
        match self {
            Self::Redirect { location } => HttpRequest::new("GET", location),
            Self::FormPost { action, fields } => HttpRequest::new("POST", action)
                .with_body(FORM_CONTENT_TYPE, create_query_string(&fields).into_bytes()),
        }
    }
}

/// Builds a [`Channel`].
#[derive(Debug)]
pub struct ChannelBuilder {
    factory: Arc<dyn MessageFactory>,
    elements: Vec<Box<dyn BindingElement>>,
    descriptions: DescriptionCache,
    settings: ChannelSettings,
}

impl ChannelBuilder {
    /// Starts a channel that dispatches incoming messages through `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn MessageFactory>) -> Self {
        Self {
            factory,
            elements: Vec::new(),
            descriptions: DescriptionCache::new(),
            settings: ChannelSettings::default(),
        }
    }

    /// Registers a binding element. Registration order only matters among elements
    /// without a protection.
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "builder accepts any binding element")]
    pub fn binding_element(mut self, element: impl BindingElement + 'static) -> Self {
        self.elements.push(Box::new(element));
        self
    }

    /// Registers an already boxed binding element.
    #[must_use]
    pub fn boxed_binding_element(mut self, element: Box<dyn BindingElement>) -> Self {
        self.elements.push(element);
        self
    }

    /// Shares a description cache with other channels.
    #[must_use]
    pub fn descriptions(mut self, descriptions: DescriptionCache) -> Self {
        self.descriptions = descriptions;
        self
    }

    /// Replaces the channel settings.
    #[must_use]
    pub fn settings(mut self, settings: ChannelSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Orders the binding elements and builds the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingProtectionDependency`] for an incoherent set of
    /// protection elements.
    pub fn build(self) -> Result<Channel> {
        Ok(Channel {
            factory: self.factory,
            elements: order_binding_elements(self.elements)?,
            descriptions: self.descriptions,
            settings: self.settings,
        })
    }
}

/// Sends and receives protocol messages through an ordered binding-element pipeline.
///
/// A channel is immutable once built and can be shared across tasks.
#[derive(Debug)]
pub struct Channel {
    factory: Arc<dyn MessageFactory>,
    elements: Vec<Box<dyn BindingElement>>,
    descriptions: DescriptionCache,
    settings: ChannelSettings,
}

impl Channel {
    /// Starts building a channel.
    #[must_use]
    pub fn builder(factory: Arc<dyn MessageFactory>) -> ChannelBuilder {
        ChannelBuilder::new(factory)
    }

    /// Description cache used for serialization.
    #[must_use]
    pub const fn descriptions(&self) -> &DescriptionCache {
        &self.descriptions
    }

    /// Channel settings.
    #[must_use]
    pub const fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Names of the binding elements in outgoing order.
    #[must_use]
    pub fn binding_element_names(&self) -> Vec<&'static str> {
        self.elements.iter().map(|element| element.name()).collect()
    }

    /// Runs the outgoing pipeline and returns the message's wire fields.
    ///
    /// # Errors
    ///
    /// - Any binding element error
    /// - [`ProtocolError::BindingConflict`] when two elements apply the same protection
    /// - [`ProtocolError::InsufficientMessageProtection`] when the applied protections
    ///   do not cover what the message requires
    /// - Basic validation errors if a required field is still unset
    #[instrument(skip(self, message), fields(message_type = message.type_name()))]
    pub fn prepare_outgoing(&self, message: &mut dyn ProtocolMessage) -> Result<Fields> {
        let mut applied = MessageProtections::NONE;
        for element in &self.elements {
            if let Some(protection) = element.prepare_outgoing(message)? {
                if !(applied & protection).is_empty() {
                    return Err(ProtocolError::BindingConflict(applied & protection));
                }
                applied |= protection;
                debug!(element = element.name(), %protection, "binding element applied");
            }
        }
        ensure_protection(&*message, applied)?;

        let description = self.descriptions.describe(&*message)?;
        let fields = description.serialize(&*message);
        description.ensure_parts_pass_basic_validation(&fields, self.settings.strict)?;
        Ok(fields)
    }

    /// Prepares an indirect message for the user agent.
    ///
    /// Sent as a GET redirect when the recipient accepts GET and the URL fits
    /// [`ChannelSettings::maximum_indirect_url_length`], otherwise as a form post.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidInput`] for a direct or undirected message, or
    /// when the URL is too long and the recipient does not accept POST. Outgoing
    /// pipeline errors propagate.
    #[instrument(skip(self, message), fields(message_type = message.type_name()))]
    pub fn send_indirect(&self, message: &mut dyn ProtocolMessage) -> Result<IndirectMessage> {
        if message.transport() != MessageTransport::Indirect {
            return Err(ProtocolError::InvalidInput(format!(
                "{} is a direct message",
                message.type_name()
            )));
        }
        let recipient = recipient_of(&*message)?;
        let fields = self.prepare_outgoing(message)?;

        let mut location = recipient.location.clone();
        append_query_args(&mut location, &fields);
        let fits = location.as_str().len() <= self.settings.maximum_indirect_url_length;
        if recipient.methods.contains(HttpDeliveryMethods::GET) && fits {
            debug!(url_len = location.as_str().len(), "indirect message as redirect");
            return Ok(IndirectMessage::Redirect { location });
        }
        if !recipient.methods.contains(HttpDeliveryMethods::POST) {
            return Err(ProtocolError::InvalidInput(format!(
                "{} exceeds {} characters and the recipient does not accept POST",
                message.type_name(),
                self.settings.maximum_indirect_url_length
            )));
        }
        debug!(fields = fields.len(), "indirect message as form post");
        Ok(IndirectMessage::FormPost { action: recipient.location, fields })
    }

    /// Prepares an indirect message and hands it to `presenter`.
    ///
    /// # Errors
    ///
    /// See [`send_indirect`](Self::send_indirect); presenter errors propagate.
    pub fn present_indirect(
        &self,
        message: &mut dyn ProtocolMessage,
        presenter: &impl IndirectPresenter,
    ) -> Result<()> {
        let indirect = self.send_indirect(message)?;
        presenter.present(&indirect)
    }

    /// Sends a direct message and returns the validated response.
    ///
    /// The exchange is bounded by [`ChannelSettings::direct_timeout`]; control returns
    /// only after the response has passed the incoming pipeline.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::CommunicationFailure`] on timeout or a non-2xx status
    /// - [`ProtocolError::UnrecognizedMessage`] when the response matches no type
    /// - Any outgoing or incoming pipeline error
    #[instrument(
        skip(self, transport, message),
        fields(message_type = message.type_name(), transport = transport.protocol_name())
    )]
    pub async fn send<T: DirectTransport>(
        &self,
        transport: &T,
        message: &mut dyn ProtocolMessage,
    ) -> Result<Box<dyn ProtocolMessage>> {
        if message.transport() != MessageTransport::Direct {
            return Err(ProtocolError::InvalidInput(format!(
                "{} is an indirect message",
                message.type_name()
            )));
        }
        let request = self.prepare_direct_request(message)?;
        let timeout = self.settings.direct_timeout;
        let response = tokio::time::timeout(timeout, transport.transmit(request))
            .await
            .map_err(|_| ProtocolError::timeout(timeout))??;

        if !response.is_success() {
            warn!(status = response.status, "direct request failed");
            return Err(ProtocolError::CommunicationFailure(format!(
                "{} answered with status {}",
                recipient_of(&*message)?.location,
                response.status
            )));
        }

        let fields = self.decode_body(&response.body)?;
        let mut reply = self.factory.create_response(&*message, &fields)?.ok_or_else(|| {
            ProtocolError::UnrecognizedMessage(format!(
                "response to {} matches no known message",
                message.type_name()
            ))
        })?;
        self.deserialize(&mut *reply, &fields)?;
        self.process_incoming(&mut *reply)?;
        debug!(response_type = reply.type_name(), "direct response accepted");
        Ok(reply)
    }

    /// Sends a direct message and returns the response as `R`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send); [`ProtocolError::UnrecognizedMessage`] when the
    /// response is of another type.
    pub async fn send_expecting<R: ProtocolMessage, T: DirectTransport>(
        &self,
        transport: &T,
        message: &mut dyn ProtocolMessage,
    ) -> Result<R> {
        let reply = self.send(transport, message).await?;
        expect_type(reply)
    }

    /// Encodes a protected response to an incoming direct request.
    ///
    /// # Errors
    ///
    /// Outgoing pipeline errors, or an encoding error for key-value form.
    #[instrument(skip(self, message), fields(message_type = message.type_name()))]
    pub fn prepare_direct_response(
        &self,
        message: &mut dyn ProtocolMessage,
    ) -> Result<HttpResponse> {
        let fields = self.prepare_outgoing(message)?;
        Ok(match self.settings.response_encoding {
            ResponseEncoding::Form => {
                HttpResponse::ok(FORM_CONTENT_TYPE, create_query_string(&fields).into_bytes())
            }
            ResponseEncoding::KeyValue => {
                HttpResponse::ok(KEY_VALUE_CONTENT_TYPE, encode_key_value_form(&fields)?.into_bytes())
            }
        })
    }

    /// Reads the protocol message carried by an incoming HTTP request.
    ///
    /// Returns `Ok(None)` when the request carries no recognizable message.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MalformedMessage`] for a key sent twice with different values
    /// - Factory errors such as [`ProtocolError::TokenNotFound`]
    /// - Deserialization and incoming pipeline errors
    #[instrument(skip(self, request), fields(method = %request.method, path = request.url.path()))]
    pub fn read_incoming(&self, request: &HttpRequest) -> Result<Option<Box<dyn ProtocolMessage>>> {
        let fields = collect_request_fields(request)?;
        if fields.is_empty() {
            return Ok(None);
        }

        let mut location = request.url.clone();
        location.set_query(None);
        location.set_fragment(None);
        let mut methods = if request.method == "POST" {
            HttpDeliveryMethods::POST
        } else {
            HttpDeliveryMethods::GET
        };
        if request.header("Authorization").is_some() {
            methods = methods | HttpDeliveryMethods::AUTHORIZATION_HEADER;
        }
        let recipient = MessageReceivingEndpoint::new(location, methods);

        let Some(mut message) = self.factory.create_request(&fields, &recipient)? else {
            debug!(fields = fields.len(), "no recognizable message");
            return Ok(None);
        };
        if let Some(signed) = message.as_signed_mut() {
            signed.set_http_method(&request.method);
        }
        self.deserialize(&mut *message, &fields)?;
        self.process_incoming(&mut *message)?;
        debug!(message_type = message.type_name(), "incoming message accepted");
        Ok(Some(message))
    }

    /// Reads an incoming request that must carry an `R`, if anything.
    ///
    /// # Errors
    ///
    /// See [`read_incoming`](Self::read_incoming); [`ProtocolError::UnrecognizedMessage`]
    /// when a message of another type is present.
    pub fn read_request<R: ProtocolMessage>(&self, request: &HttpRequest) -> Result<Option<R>> {
        self.read_incoming(request)?.map(expect_type).transpose()
    }

    /// Runs the incoming pipeline over an already deserialized message.
    ///
    /// # Errors
    ///
    /// Binding element errors, or [`ProtocolError::InsufficientMessageProtection`].
    pub fn process_incoming(&self, message: &mut dyn ProtocolMessage) -> Result<()> {
        let required = message.required_protection();
        let mut applied = MessageProtections::NONE;
        for element in self.elements.iter().rev() {
            if !applied.contains(required & element.protection().verified_before()) {
                debug!(element = element.name(), "earlier protection missing, stopping pipeline");
                return ensure_protection(&*message, applied);
            }
            if let Some(protection) = element.process_incoming(message)? {
                if !(applied & protection).is_empty() {
                    warn!(element = element.name(), %protection, "protection verified twice");
                }
                applied |= protection;
            }
        }
        ensure_protection(&*message, applied)
    }

    fn deserialize(&self, message: &mut dyn ProtocolMessage, fields: &Fields) -> Result<()> {
        let description = self.descriptions.describe(&*message)?;
        description.deserialize(message, fields, self.settings.strict)
    }

    fn decode_body(&self, body: &[u8]) -> Result<Fields> {
        let text = std::str::from_utf8(body)
            .map_err(|e| ProtocolError::MalformedMessage(format!("response body is not UTF-8: {e}")))?;
        match self.settings.response_encoding {
            ResponseEncoding::Form => Ok(parse_query_string(text.trim())),
            ResponseEncoding::KeyValue => decode_key_value_form(text, self.settings.strict),
        }
    }

    /// Protects a direct message and places its fields on an HTTP request.
    ///
    /// The `Authorization` header is preferred (declared fields in the header, extra
    /// data in the body or query), then a POST body, then the GET query. Use this for
    /// requests whose response is not a protocol message, such as protected resources.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidInput`] for an undirected message; outgoing pipeline
    /// errors.
    #[instrument(skip(self, message), fields(message_type = message.type_name()))]
    pub fn prepare_direct_request(&self, message: &mut dyn ProtocolMessage) -> Result<HttpRequest> {
        let recipient = recipient_of(&*message)?;
        let fields = self.prepare_outgoing(message)?;
        let methods = recipient.methods;
        let verb = match message.as_signed().map(|signed| signed.http_method()) {
            Some(method) if !method.is_empty() => method.to_ascii_uppercase(),
            _ => methods.http_verb().to_owned(),
        };
        let mut url = recipient.location;

        if methods.contains(HttpDeliveryMethods::AUTHORIZATION_HEADER) {
            let description = self.descriptions.describe(&*message)?;
            let (declared, extra): (Fields, Fields) =
                fields.into_iter().partition(|(key, _)| description.part(key).is_some());
            let header = build_authorization_header(self.settings.realm.as_deref(), &declared);
            if verb == "POST" {
                let request = HttpRequest::new(&verb, url).with_header("Authorization", &header);
                return Ok(if extra.is_empty() {
                    request
                } else {
                    request.with_body(FORM_CONTENT_TYPE, create_query_string(&extra).into_bytes())
                });
            }
            append_query_args(&mut url, &extra);
            return Ok(HttpRequest::new(&verb, url).with_header("Authorization", &header));
        }

        if verb == "POST" {
            return Ok(HttpRequest::new("POST", url)
                .with_body(FORM_CONTENT_TYPE, create_query_string(&fields).into_bytes()));
        }
        append_query_args(&mut url, &fields);
        Ok(HttpRequest::new(&verb, url))
    }
}

fn recipient_of(message: &dyn ProtocolMessage) -> Result<MessageReceivingEndpoint> {
    message.recipient().cloned().ok_or_else(|| {
        ProtocolError::InvalidInput(format!("{} has no recipient", message.type_name()))
    })
}

fn ensure_protection(message: &dyn ProtocolMessage, applied: MessageProtections) -> Result<()> {
    let required = message.required_protection();
    if applied.contains(required) {
        return Ok(());
    }
    warn!(message_type = message.type_name(), %required, %applied, "insufficient message protection");
    Err(ProtocolError::InsufficientMessageProtection {
        message_type: message.type_name().to_owned(),
        required,
        applied,
    })
}

fn expect_type<R: ProtocolMessage>(message: Box<dyn ProtocolMessage>) -> Result<R> {
    let received = message.type_name();
    message.downcast::<R>().map(|typed| *typed).ok_or_else(|| {
        ProtocolError::UnrecognizedMessage(format!(
            "expected {} but received {received}",
            std::any::type_name::<R>().rsplit("::").next().unwrap_or_default()
        ))
    })
}

fn merge_field(fields: &mut Fields, key: String, value: String) -> Result<()> {
    match fields.get(&key) {
        Some(existing) if *existing != value => Err(ProtocolError::MalformedMessage(format!(
            "parameter {key} appears more than once with different values"
        ))),
        Some(_) => Ok(()),
        None => {
            fields.insert(key, value);
            Ok(())
        }
    }
}

/// Merges the `Authorization` header, a form body and the query string.
fn collect_request_fields(request: &HttpRequest) -> Result<Fields> {
    let mut fields = Fields::new();
    if let Some(header) = request.header("Authorization")
        && let Some(header_fields) = parse_authorization_header(header)?
    {
        for (key, value) in header_fields {
            merge_field(&mut fields, key, value)?;
        }
    }

    let is_form = request
        .header("Content-Type")
        .is_some_and(|content_type| content_type.starts_with(FORM_CONTENT_TYPE));
    if request.method == "POST" && is_form && !request.body.is_empty() {
        let body = std::str::from_utf8(&request.body)
            .map_err(|e| ProtocolError::MalformedMessage(format!("form body is not UTF-8: {e}")))?;
        for (key, value) in parse_query_string(body) {
            merge_field(&mut fields, key, value)?;
        }
    }

    for (key, value) in query_fields(&request.url) {
        merge_field(&mut fields, key, value)?;
    }
    Ok(fields)
}

#[cfg(test)]
mod tests;
