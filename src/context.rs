//! Cancellable, deadline-bound execution context for outbound calls.
//!
//! Every dispatch, admission wait and retry sleep observes a [`RequestContext`].
//! A context expires when its deadline passes or when its cancellation token
//! fires, whichever comes first.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use venue_api_client::context::RequestContext;
//!
//! let ctx = RequestContext::with_timeout(Duration::from_millis(250));
//! assert!(ctx.check().is_ok());
//!
//! ctx.cancel();
//! assert!(ctx.check().is_err());
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`RequestContext`] stopped accepting work.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The cancellation token was triggered.
    #[error("request cancelled")]
    Cancelled,

    /// The deadline passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Execution context carried by a single logical call.
///
/// Clones share the same cancellation token, so cancelling any clone cancels
/// them all.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// A context with no deadline that is only cancelled explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token, e.g. to tie the call to a client-wide
    /// shutdown token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The cancellation token backing this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check whether the context has already expired, without waiting.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.cancel.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolve once the context expires, yielding the cause.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => ContextError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Sleep for `duration` unless the context expires first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// Drive `future` to completion unless the context expires first.
    ///
    /// An already expired context never polls the future.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            cause = self.done() => Err(cause),
            output = future => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_without_deadline_stays_open() {
        let ctx = RequestContext::new();
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().is_none());
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_clones() {
        let ctx = RequestContext::new();
        let clone = ctx.clone();
        ctx.cancel();
        assert_eq!(clone.check(), Err(ContextError::Cancelled));
        assert_eq!(clone.done().await, ContextError::Cancelled);
    }

    #[tokio::test]
    async fn test_deadline_interrupts_sleep() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(20));
        let started = Instant::now();
        let result = ctx.sleep(Duration::from_secs(5)).await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_expired_context_does_not_poll_future() {
        let ctx = RequestContext::with_timeout(Duration::ZERO);
        let polled = std::sync::atomic::AtomicBool::new(false);
        let result = ctx
            .run(async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
            })
            .await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_external_token_cancels_context() {
        let token = CancellationToken::new();
        let ctx = RequestContext::with_timeout(Duration::from_secs(30)).with_cancellation(token.clone());
        token.cancel();
        assert_eq!(ctx.check(), Err(ContextError::Cancelled));
    }
}
