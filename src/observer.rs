//! Hook for internal errors that no caller receives directly.
//!
//! A failed priming attempt is the main example: the triggering call sees a
//! preflight error, but operators usually want the underlying cause reported
//! once, wherever it happened.

use std::sync::Arc;

use crate::error::VenueError;

/// Callback invoked with internal, non-request errors.
pub type ErrorObserver = Arc<dyn Fn(&VenueError) + Send + Sync>;

/// An observer that logs through `tracing` at warn level.
pub fn tracing_observer() -> ErrorObserver {
    Arc::new(|err: &VenueError| {
        tracing::warn!(error = %err, "Internal venue client error");
    })
}
