//! HTTP transport over `reqwest` with request tracing.

use std::io;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use url::Url;

use crate::error::{TransportError, TransportErrorKind};
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// Production REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.venue.example";

/// REST transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HttpTransport {
    /// A transport for `base_url` with default settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new transport builder.
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let method = Method::from_bytes(request.method().as_bytes()).map_err(|e| {
            TransportError::new(TransportErrorKind::Other, format!("invalid method {}", request.method()))
                .with_source(e)
                .unsent()
        })?;
        let url = Url::parse(&format!("{}{}", self.base_url, request.path)).map_err(|e| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("invalid request URL {}{}", self.base_url, request.path),
            )
            .with_source(e)
            .unsent()
        })?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = request.auth {
            for (name, value) in auth.into_pairs() {
                builder = builder.header(name, value);
            }
        }
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = builder.send().await.map_err(from_middleware)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(from_reqwest)?;

        Ok(TransportResponse {
            status,
            body,
            headers,
        })
    }
}

fn from_middleware(err: reqwest_middleware::Error) -> TransportError {
    match err {
        reqwest_middleware::Error::Reqwest(err) => from_reqwest(err),
        reqwest_middleware::Error::Middleware(err) => {
            TransportError::new(TransportErrorKind::Other, format!("middleware error: {err}"))
        }
    }
}

fn from_reqwest(err: reqwest::Error) -> TransportError {
    let kind = classify(&err);
    TransportError::new(kind, err.to_string()).with_source(err)
}

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_connect() {
        return TransportErrorKind::Connect;
    }
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }
    if let Some(io_error) = source_of::<io::Error>(err) {
        return match io_error.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportErrorKind::ConnectionReset,
            io::ErrorKind::UnexpectedEof => TransportErrorKind::UnexpectedEof,
            io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            _ => TransportErrorKind::Other,
        };
    }
    if err.is_body() {
        // The response started but was cut off.
        return TransportErrorKind::UnexpectedEof;
    }
    TransportErrorKind::Other
}

/// First error of type `T` in the source chain of `err`.
fn source_of<'a, T: std::error::Error + 'static>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a T> {
    let mut source = err.source();
    while let Some(err) = source {
        if let Some(found) = err.downcast_ref::<T>() {
            return Some(found);
        }
        source = err.source();
    }
    None
}

/// Builder for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportBuilder {
    base_url: String,
    user_agent: Option<String>,
    timeout: Option<Duration>,
}

impl HttpTransportBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: None,
            timeout: None,
        }
    }

    /// Set the base URL (useful for testing with a mock server).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set a per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the transport.
    pub fn build(self) -> HttpTransport {
        let mut headers = HeaderMap::new();
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("venue-api-client/{}", env!("CARGO_PKG_VERSION")));
        let header_value = HeaderValue::from_str(&user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("venue-api-client"));
        headers.insert(USER_AGENT, header_value);

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let reqwest_client = builder.build().unwrap_or_else(|_| reqwest::Client::new());

        // No retry middleware: retries are decided per operation by the client.
        let client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();

        HttpTransport {
            client,
            base_url: self.base_url,
        }
    }
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RouteKey;

    #[tokio::test]
    async fn test_connection_refused_is_unsent() {
        // Bind then drop a listener to get a port nobody is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = HttpTransport::new(format!("http://127.0.0.1:{port}"));
        let request = TransportRequest::new(RouteKey::rest("GET", "/api/v1/timestamp"), "/api/v1/timestamp");
        let err = transport.send(request).await.unwrap_err();

        assert_eq!(err.kind(), TransportErrorKind::Connect);
        assert!(!err.sent());
    }

    #[tokio::test]
    async fn test_invalid_method_is_unsent() {
        let transport = HttpTransport::new("http://127.0.0.1:1");
        let request = TransportRequest::new(RouteKey::rest("NOT A METHOD", "/"), "/");
        let err = transport.send(request).await.unwrap_err();
        assert!(!err.sent());
    }

    #[tokio::test]
    async fn test_malformed_base_url_is_unsent() {
        let transport = HttpTransport::new("api.venue.example");
        let request = TransportRequest::new(RouteKey::rest("GET", "/api/v1/timestamp"), "/api/v1/timestamp");
        let err = transport.send(request).await.unwrap_err();

        assert_eq!(err.kind(), TransportErrorKind::Other);
        assert!(!err.sent());
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let transport = HttpTransport::builder()
            .base_url("http://localhost:8080/")
            .user_agent("test-agent")
            .timeout(Duration::from_secs(2))
            .build();
        assert_eq!(transport.base_url(), "http://localhost:8080");
    }
}
