//! Route identity.
//!
//! A route is a distinguishable operation family: an HTTP method plus path for
//! REST calls, or an operation name plus endpoint for streaming calls. Each
//! route owns its own admission policy inside the [`AdmissionGate`](super::AdmissionGate).

use std::borrow::Cow;
use std::fmt;

/// Wire protocol a route is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP request/response.
    Rest,
    /// WebSocket request/response.
    Stream,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Rest => f.write_str("REST"),
            Protocol::Stream => f.write_str("STREAM"),
        }
    }
}

/// Key identifying a governed route.
///
/// Equality and hashing are structural. Keys can be built in `const`
/// context from static strings, which is how the endpoint catalog declares them.
///
/// ```rust
/// use venue_api_client::rate_limit::{Protocol, RouteKey};
///
/// let a = RouteKey::rest("POST", "/api/v1/trade/order");
/// let b = RouteKey::new(Protocol::Rest, "POST".to_string(), "/api/v1/trade/order".to_string());
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "REST POST /api/v1/trade/order");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    protocol: Protocol,
    method_or_op: Cow<'static, str>,
    endpoint: Cow<'static, str>,
}

impl RouteKey {
    /// Build a key from owned or borrowed parts.
    pub fn new(
        protocol: Protocol,
        method_or_op: impl Into<Cow<'static, str>>,
        endpoint: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            protocol,
            method_or_op: method_or_op.into(),
            endpoint: endpoint.into(),
        }
    }

    /// A REST route from static parts.
    pub const fn rest(method: &'static str, path: &'static str) -> Self {
        Self {
            protocol: Protocol::Rest,
            method_or_op: Cow::Borrowed(method),
            endpoint: Cow::Borrowed(path),
        }
    }

    /// A streaming route from static parts.
    pub const fn stream(op: &'static str, endpoint: &'static str) -> Self {
        Self {
            protocol: Protocol::Stream,
            method_or_op: Cow::Borrowed(op),
            endpoint: Cow::Borrowed(endpoint),
        }
    }

    /// The protocol of this route.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// HTTP method for REST routes, operation name for streaming routes.
    pub fn method_or_op(&self) -> &str {
        &self.method_or_op
    }

    /// Request path for REST routes, channel endpoint for streaming routes.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the HTTP method carries its parameters in the query string.
    pub fn uses_query(&self) -> bool {
        self.protocol == Protocol::Rest
            && matches!(self.method_or_op.as_ref(), "GET" | "DELETE")
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.protocol, self.method_or_op, self.endpoint)
    }
}
