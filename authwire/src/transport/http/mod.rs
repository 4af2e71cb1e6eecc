//! reqwest-backed [`DirectTransport`].
//!
//! Peers name the endpoints a consumer talks to, so every request is checked before it
//! leaves: scheme and host, header values, and optionally HTTPS. Response bodies are read
//! in chunks and abandoned once they exceed the configured limit.

use reqwest::{Client, Method, redirect};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    DirectTransport, HttpRequest, HttpResponse,
    config::{HttpConfig, HttpVersion},
    validate_header,
};
use crate::error::{ProtocolError, Result};

fn validate_url(url: &Url, require_https: bool) -> Result<()> {
    match url.scheme() {
        "https" => {}
        "http" if !require_https => {}
        "http" => {
            return Err(ProtocolError::InvalidInput(format!("HTTPS required for direct messages: {url}")));
        }
        scheme => {
            return Err(ProtocolError::InvalidInput(format!(
                "unsupported URL scheme for direct messages: {scheme}"
            )));
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProtocolError::InvalidInput(format!("URL missing host: {url}")));
    }
    Ok(())
}

/// HTTP/1.1 and HTTP/2 transport.
///
/// Non-2xx responses are returned as-is; the channel decides what they mean.
///
/// # Examples
///
/// ```rust,no_run
/// use authwire::transport::{DirectTransport, HttpConfig, HttpRequest, HttpTransport};
///
/// # async fn example() -> authwire::Result<()> {
/// let transport = HttpTransport::with_config(&HttpConfig::default())?;
/// let response = transport
///     .transmit(HttpRequest::get("https://sp.example.com/photos?size=original")?)
///     .await?;
/// println!("Status: {}", response.status);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    http_version: HttpVersion,
    require_https: bool,
    maximum_response_bytes: usize,
}

impl HttpTransport {
    /// Creates a transport with [`HttpConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::HttpError`] if the client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_config(&HttpConfig::default())
    }

    /// Creates a transport from `config`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidConfiguration`] when `config` fails validation
    /// - [`ProtocolError::HttpError`] if the client cannot be built
    ///
    /// # Examples
    ///
    /// ```
    /// use authwire::transport::{HttpConfig, HttpTransport, HttpVersion};
    ///
    /// let config = HttpConfig {
    ///     require_https: true,
    ///     maximum_redirects: 0,
    ///     http_version: HttpVersion::Http1,
    ///     ..HttpConfig::default()
    /// };
    ///
    /// let transport = HttpTransport::with_config(&config).unwrap();
    /// ```
    pub fn with_config(config: &HttpConfig) -> Result<Self> {
        config.validate()?;

        let redirects = if config.maximum_redirects == 0 {
            redirect::Policy::none()
        } else {
            redirect::Policy::limited(config.maximum_redirects)
        };
        let mut builder = Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .redirect(redirects)
            .user_agent(config.user_agent.as_str())
            .https_only(config.require_https);

        builder = match config.http_version {
            HttpVersion::Http1 => builder.http1_only(),
            HttpVersion::Http2 => builder.http2_prior_knowledge(),
            HttpVersion::Auto => builder,
        };

        Ok(Self {
            client: builder.build()?,
            http_version: config.http_version,
            require_https: config.require_https,
            maximum_response_bytes: config.maximum_response_bytes,
        })
    }

    #[instrument(skip(self, request), fields(method = %request.method, host = request.url.host_str()))]
    async fn execute_request(&self, request: HttpRequest) -> Result<HttpResponse> {
        validate_url(&request.url, self.require_https)?;
        for (name, value) in &request.headers {
            validate_header(name, value)?;
        }

        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            ProtocolError::InvalidInput(format!("unsupported HTTP method: {}", request.method))
        })?;

        let mut builder = self.client.request(method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();
        if response.content_length().is_some_and(|length| length > self.maximum_response_bytes as u64) {
            warn!(status, limit = self.maximum_response_bytes, "declared response length over limit");
            return Err(self.oversized());
        }
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_owned()))
            .collect();

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.maximum_response_bytes {
                warn!(status, limit = self.maximum_response_bytes, "response body over limit");
                return Err(self.oversized());
            }
            body.extend_from_slice(&chunk);
        }
        debug!(status, body_len = body.len(), "direct response received");

        Ok(HttpResponse { status, headers, body })
    }

    fn oversized(&self) -> ProtocolError {
        ProtocolError::CommunicationFailure(format!(
            "response exceeds {} bytes",
            self.maximum_response_bytes
        ))
    }
}

impl DirectTransport for HttpTransport {
    async fn transmit(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_request(request).await
    }

    fn protocol_name(&self) -> &'static str {
        match self.http_version {
            HttpVersion::Http1 => "http/1.1",
            HttpVersion::Http2 => "http/2",
            HttpVersion::Auto => "http",
        }
    }
}
