//! Wire transports.
//!
//! The dispatch routine hands a fully prepared [`TransportRequest`] to a
//! [`Transport`] only after admission. Transports never retry on their own.

mod http;
mod ws;

use std::future::Future;
use std::sync::Arc;

pub use http::{HttpTransport, HttpTransportBuilder};
pub use ws::WsTransport;

use crate::auth::SignedHeaders;
use crate::error::TransportError;
use crate::rate_limit::RouteKey;

/// One outbound request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// The route being called. Its method or operation name drives the wire method.
    pub route: RouteKey,
    /// Path including any query string. For stream routes, the endpoint.
    pub path: String,
    /// Serialized JSON body, if any.
    pub body: Option<String>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Authentication material for signed calls.
    pub auth: Option<SignedHeaders>,
}

impl TransportRequest {
    /// An unsigned request with no body.
    pub fn new(route: RouteKey, path: impl Into<String>) -> Self {
        Self {
            route,
            path: path.into(),
            body: None,
            headers: Vec::new(),
            auth: None,
        }
    }

    /// HTTP method or stream operation name.
    pub fn method(&self) -> &str {
        self.route.method_or_op()
    }
}

/// A raw response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status. Stream transports report 200 for every matched reply.
    pub status: u16,
    /// Raw body.
    pub body: String,
    /// Response headers.
    pub headers: Vec<(String, String)>,
}

impl TransportResponse {
    /// A 200 response with `body`.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            headers: Vec::new(),
        }
    }
}

/// Sends one request and waits for its response.
pub trait Transport: Send + Sync + 'static {
    /// Send `request`.
    ///
    /// Errors must say whether anything may have been written; see
    /// [`TransportError::sent`].
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        (**self).send(request)
    }
}
