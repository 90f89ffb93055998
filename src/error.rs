//! Error types for the venue client library.
//!
//! [`VenueError`] is the cause of every failure. The dispatch routine wraps it
//! in a [`RequestStateError`](crate::stage::RequestStateError) that records how
//! far the call got.

use std::fmt;

use thiserror::Error;

pub use crate::context::ContextError;
pub use crate::rate_limit::{AdmissionError, PrimingError};

/// The main error type for all venue client operations.
#[derive(Error, Debug)]
pub enum VenueError {
    /// Connection-level failure while talking to the venue
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The venue answered with a business error
    #[error("Venue API error: {0}")]
    Api(ApiError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Invalid response from the API
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Missing required credentials
    #[error("Missing credentials: API key and secret required for signed endpoints")]
    MissingCredentials,

    /// Request failed local validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller's context expired
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The admission gate refused the call
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// The quota priming step failed
    #[error(transparent)]
    Priming(#[from] PrimingError),
}

impl VenueError {
    /// The business error, if the venue answered with one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            VenueError::Api(err) => Some(err),
            VenueError::Priming(
                PrimingError::Failed(inner) | PrimingError::Throttled { last: inner, .. },
            ) => inner.api_error(),
            _ => None,
        }
    }

    /// The transport failure, if any.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            VenueError::Transport(err) => Some(err),
            _ => None,
        }
    }

    /// The context expiry behind this error, wherever it surfaced.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            VenueError::Context(cause)
            | VenueError::Admission(AdmissionError::Context(cause))
            | VenueError::Priming(PrimingError::Context(cause)) => Some(*cause),
            _ => None,
        }
    }

    /// Whether this error came from the caller's own cancellation or deadline.
    pub fn is_context(&self) -> bool {
        self.context_error().is_some()
    }
}

impl From<ApiError> for VenueError {
    fn from(err: ApiError) -> Self {
        VenueError::Api(err)
    }
}

/// Business error embedded in a venue response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// The venue's error code (e.g. "429000")
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Create a new API error from code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Check if this is a rate limit error.
    pub fn is_rate_limit(&self) -> bool {
        self.code == error_codes::RATE_LIMIT_EXCEEDED
    }

    /// Check if the venue reported it is overloaded or temporarily down.
    pub fn is_server_busy(&self) -> bool {
        self.code == error_codes::SERVICE_UNAVAILABLE
            || self.code == error_codes::SYSTEM_BUSY
            || self.message.to_ascii_lowercase().contains("busy")
    }

    /// Check if this is an invalid signature error.
    pub fn is_invalid_signature(&self) -> bool {
        self.code == error_codes::INVALID_SIGNATURE
    }

    /// Check if the request timestamp was rejected.
    pub fn is_timestamp_expired(&self) -> bool {
        self.code == error_codes::INVALID_TIMESTAMP
    }

    /// Check if this is a permission denied error.
    pub fn is_permission_denied(&self) -> bool {
        self.code == error_codes::PERMISSION_DENIED || self.code == error_codes::IP_NOT_ALLOWED
    }
}

/// Known venue error codes for pattern matching.
pub mod error_codes {
    /// Success
    pub const SUCCESS: &str = "0";

    /// Authentication errors
    pub const MISSING_AUTH_HEADERS: &str = "400001";
    pub const INVALID_TIMESTAMP: &str = "400002";
    pub const INVALID_API_KEY: &str = "400003";
    pub const INVALID_SIGNATURE: &str = "400005";
    pub const IP_NOT_ALLOWED: &str = "400006";
    pub const PERMISSION_DENIED: &str = "400007";

    /// Request errors
    pub const INVALID_PARAMETERS: &str = "400100";
    pub const NOT_FOUND: &str = "404000";

    /// Throttling
    pub const RATE_LIMIT_EXCEEDED: &str = "429000";

    /// Service errors
    pub const INTERNAL_ERROR: &str = "500000";
    pub const SERVICE_UNAVAILABLE: &str = "503000";
    pub const SYSTEM_BUSY: &str = "900001";
}

/// Category of a connection-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection could not be established; nothing was written.
    Connect,
    /// The peer reset the connection.
    ConnectionReset,
    /// The stream ended before a complete response arrived.
    UnexpectedEof,
    /// The request timed out.
    Timeout,
    /// The peer violated the wire protocol.
    Protocol,
    /// Anything else.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::ConnectionReset => "connection reset",
            TransportErrorKind::UnexpectedEof => "unexpected end of stream",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Protocol => "protocol",
            TransportErrorKind::Other => "transport",
        };
        f.write_str(name)
    }
}

/// A connection-level failure, with whether the request may have left the process.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    sent: bool,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    /// Create a transport error. Only connect failures are treated as unsent.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sent: kind != TransportErrorKind::Connect,
            message: message.into(),
            source: None,
        }
    }

    /// Mark the request as provably never written.
    pub fn unsent(mut self) -> Self {
        self.sent = false;
        self
    }

    /// Attach the underlying error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The failure category.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Whether the request may have reached the venue.
    pub fn sent(&self) -> bool {
        self.sent
    }

    /// Whether the failure happened before any response was read, so a
    /// repeat of an idempotent request is safe.
    pub fn is_pre_response(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Connect
                | TransportErrorKind::ConnectionReset
                | TransportErrorKind::UnexpectedEof
        )
    }
}
