//! Transport collaborators.
//!
//! The channel never opens sockets itself. Direct messages go through a
//! [`DirectTransport`] ("send these bytes, give me the reply"); indirect messages are
//! handed to an [`IndirectPresenter`] that redirects the user agent or renders an
//! auto-submitting form.
//!
//! # Architecture
//!
//! - **Channel**: serializes, protects and encodes messages into [`HttpRequest`]s
//! - **Transport**: moves the bytes (reqwest, an in-process loopback, a test double)
//!
//! # Examples
//!
//! ```rust,no_run
//! use authwire::transport::{DirectTransport, HttpRequest, HttpTransport};
//!
//! # async fn example() -> authwire::Result<()> {
//! let transport = HttpTransport::new()?;
//! let request = HttpRequest::get("https://sp.example.com/request_token?oauth_consumer_key=ck1")?;
//! let response = transport.transmit(request).await?;
//! println!("Status: {}", response.status);
//! # Ok(())
//! # }
//! ```

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;

use url::Url;

use crate::{
    channel::IndirectMessage,
    error::{ProtocolError, Result},
};

pub mod config;
pub mod http;

pub use config::{HttpConfig, HttpVersion};
pub use http::HttpTransport;

/// `Content-Type` of form-encoded bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// `Content-Type` of key-value form bodies.
pub const KEY_VALUE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// An HTTP request, outgoing from a channel or incoming to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// HTTP verb, uppercase.
    pub method: String,
    /// Full URL including any query string.
    pub url: Url,
    /// Header pairs in order.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a bodiless request.
    #[must_use]
    pub fn new(method: &str, url: Url) -> Self {
        Self { method: method.to_ascii_uppercase(), url, headers: Vec::new(), body: Vec::new() }
    }

    /// Parses `url` and creates a GET request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidInput`] if `url` is not absolute.
    pub fn get(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| ProtocolError::InvalidInput(format!("invalid request URL {url}: {e}")))?;
        Ok(Self::new("GET", url))
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Sets the body and its content type.
    #[must_use]
    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers.push(("Content-Type".to_owned(), content_type.to_owned()));
        self.body = body;
        self
    }

    /// First value of header `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Header pairs in order.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A 200 response with `body` of `content_type`.
    #[must_use]
    pub fn ok(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".to_owned(), content_type.to_owned())],
            body,
        }
    }

    /// First value of header `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// True for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
}

/// Carries direct messages to the remote endpoint.
///
/// Implementations must return only once the full response body is available. The
/// channel applies its own deadline around [`transmit`](Self::transmit), so an
/// implementation's internal timeout is a backstop.
///
/// # Examples
///
/// ```
/// use authwire::transport::{DirectTransport, HttpRequest, HttpResponse};
///
/// #[derive(Debug)]
/// struct Canned;
///
/// impl DirectTransport for Canned {
///     async fn transmit(&self, _request: HttpRequest) -> authwire::Result<HttpResponse> {
///         Ok(HttpResponse::ok("text/plain", b"oauth_token=t&oauth_token_secret=s".to_vec()))
///     }
///
///     fn protocol_name(&self) -> &'static str {
///         "canned"
///     }
/// }
/// ```
pub trait DirectTransport: Send + Sync {
    /// Sends `request` and waits for the response.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CommunicationFailure`] or [`ProtocolError::HttpError`]
    /// when the exchange cannot complete.
    fn transmit(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send;

    /// Protocol name for logging.
    fn protocol_name(&self) -> &'static str;
}

/// Delivers indirect messages through the user agent.
///
/// Implemented by the host web layer: a 302 for
/// [`IndirectMessage::Redirect`], an auto-submitting HTML form for
/// [`IndirectMessage::FormPost`].
pub trait IndirectPresenter {
    /// Presents `message` to the user agent.
    ///
    /// # Errors
    ///
    /// Whatever the host layer reports.
    fn present(&self, message: &IndirectMessage) -> Result<()>;
}

/// Rejects header names and values carrying control characters.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidInput`] on CR, LF or NUL.
pub fn validate_header(name: &str, value: &str) -> Result<()> {
    let has_control = |s: &str| s.contains(['\r', '\n', '\0']);
    if has_control(name) {
        return Err(ProtocolError::InvalidInput(
            "invalid header name: control characters not allowed".to_owned(),
        ));
    }
    if has_control(value) {
        return Err(ProtocolError::InvalidInput(
            "invalid header value: control characters not allowed".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_method_is_uppercased() {
        let request = HttpRequest::new("post", Url::parse("https://sp.example.com/").unwrap());
        assert_eq!(request.method, "POST");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = HttpRequest::get("https://sp.example.com/")
            .unwrap()
            .with_header("Authorization", "OAuth oauth_token=\"t\"");
        assert_eq!(request.header("authorization"), Some("OAuth oauth_token=\"t\""));
        assert_eq!(request.header("content-type"), None);
    }

    #[test]
    fn test_with_body_sets_content_type() {
        let request = HttpRequest::get("https://sp.example.com/")
            .unwrap()
            .with_body(FORM_CONTENT_TYPE, b"a=1".to_vec());
        assert_eq!(request.header("Content-Type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(request.body, b"a=1");
    }

    #[test]
    fn test_invalid_request_url() {
        assert!(matches!(HttpRequest::get("not-a-url"), Err(ProtocolError::InvalidInput(_))));
    }

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::ok("text/plain", Vec::new()).is_success());
        let error = HttpResponse { status: 401, headers: Vec::new(), body: Vec::new() };
        assert!(!error.is_success());
    }

    #[test]
    fn test_validate_header_rejects_crlf() {
        assert!(validate_header("X-Ok", "value").is_ok());
        assert!(validate_header("X-Bad\r\n", "value").is_err());
        assert!(validate_header("X-Ok", "a\nInjected: 1").is_err());
        assert!(validate_header("X-Ok", "nul\0").is_err());
    }
}
