//! Failure staging.
//!
//! Every failed call reports the stage it reached and whether its request may
//! have left the process. For mutating operations `dispatched` is the signal
//! that matters:
//!
//! - `false`: nothing reached the venue, resubmitting is safe
//! - `true`: the outcome is unknown, query venue state before resubmitting
//!
//! ```rust
//! use venue_api_client::error::VenueError;
//! use venue_api_client::rate_limit::RouteKey;
//! use venue_api_client::stage::{RequestStateError, Stage};
//!
//! let route = RouteKey::rest("POST", "/api/v1/trade/order");
//! let err = RequestStateError::preflight(&route, VenueError::MissingCredentials);
//! assert_eq!(err.stage(), Stage::Preflight);
//! assert!(!err.dispatched());
//! ```

use std::fmt;

use thiserror::Error;

use crate::error::VenueError;
use crate::rate_limit::RouteKey;

/// How far a call got before failing. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Validation, priming and signing.
    Preflight,
    /// Waiting on the admission gate.
    Admission,
    /// Writing the request and reading the response.
    Transport,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Preflight => f.write_str("PREFLIGHT"),
            Stage::Admission => f.write_str("ADMISSION"),
            Stage::Transport => f.write_str("TRANSPORT"),
        }
    }
}

/// A failed call, tagged with its stage and dispatch status.
#[derive(Error, Debug)]
#[error("{method} {path} failed at {stage} (dispatched: {dispatched}, attempts: {attempts}): {cause}")]
pub struct RequestStateError {
    stage: Stage,
    dispatched: bool,
    method: String,
    path: String,
    attempts: u32,
    #[source]
    cause: Box<VenueError>,
}

impl RequestStateError {
    fn new(stage: Stage, dispatched: bool, route: &RouteKey, cause: VenueError) -> Self {
        Self {
            stage,
            dispatched,
            method: route.method_or_op().to_string(),
            path: route.endpoint().to_string(),
            attempts: 1,
            cause: Box::new(cause),
        }
    }

    /// A failure before admission. Never dispatched.
    pub fn preflight(route: &RouteKey, cause: VenueError) -> Self {
        Self::new(Stage::Preflight, false, route, cause)
    }

    /// A failure while waiting for admission. Never dispatched.
    pub fn admission(route: &RouteKey, cause: VenueError) -> Self {
        Self::new(Stage::Admission, false, route, cause)
    }

    /// A failure once transmission began.
    ///
    /// Dispatched unless the cause is a transport error that provably never
    /// wrote anything.
    pub fn transport(route: &RouteKey, cause: VenueError) -> Self {
        let dispatched = cause.transport_error().is_none_or(|err| err.sent());
        Self::new(Stage::Transport, dispatched, route, cause)
    }

    /// The stage the call failed at.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Whether the request may have reached the venue.
    pub fn dispatched(&self) -> bool {
        self.dispatched
    }

    /// HTTP method or stream operation name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path or stream endpoint.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// How many attempts were made, including the failed one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The underlying cause.
    pub fn cause(&self) -> &VenueError {
        &self.cause
    }

    /// Unwrap the underlying cause.
    pub fn into_cause(self) -> VenueError {
        *self.cause
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Keep the stage and dispatch status, swap the cause.
    pub(crate) fn replace_cause(mut self, cause: VenueError) -> Self {
        self.cause = Box::new(cause);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ContextError, TransportError, TransportErrorKind};

    fn route() -> RouteKey {
        RouteKey::rest("POST", "/api/v1/trade/order")
    }

    #[test]
    fn test_early_stages_are_never_dispatched() {
        let pre = RequestStateError::preflight(&route(), VenueError::Validation("missing symbol".into()));
        let adm = RequestStateError::admission(&route(), VenueError::Context(ContextError::Cancelled));
        assert!(!pre.dispatched());
        assert!(!adm.dispatched());
        assert!(pre.stage() < adm.stage());
    }

    #[test]
    fn test_transport_dispatch_flag() {
        let unsent = TransportError::new(TransportErrorKind::Connect, "refused");
        let err = RequestStateError::transport(&route(), unsent.into());
        assert_eq!(err.stage(), Stage::Transport);
        assert!(!err.dispatched());

        let reset = TransportError::new(TransportErrorKind::ConnectionReset, "reset");
        assert!(RequestStateError::transport(&route(), reset.into()).dispatched());

        let api = ApiError::new("400100", "bad size");
        assert!(RequestStateError::transport(&route(), api.into()).dispatched());
    }

    #[test]
    fn test_display_and_source() {
        use std::error::Error as _;

        let err = RequestStateError::admission(&route(), VenueError::Context(ContextError::DeadlineExceeded))
            .with_attempts(2);
        assert_eq!(
            err.to_string(),
            "POST /api/v1/trade/order failed at ADMISSION (dispatched: false, attempts: 2): request deadline exceeded"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_replace_cause_keeps_staging() {
        let reset = TransportError::new(TransportErrorKind::UnexpectedEof, "eof");
        let err = RequestStateError::transport(&route(), reset.into())
            .replace_cause(VenueError::Context(ContextError::Cancelled));
        assert_eq!(err.stage(), Stage::Transport);
        assert!(err.dispatched());
        assert!(err.cause().is_context());
    }
}
