//! Automatic retries for idempotent operations.
//!
//! A failed attempt is repeated only when all of these hold:
//!
//! - the operation is idempotent (mutations are never repeated, whatever the error)
//! - the retry budget is not spent
//! - the failure is transient: a pre-response connection failure, a venue
//!   "busy" answer, or (opt-in) a rate-limit answer
//!
//! The caller's own cancellation or deadline always ends the call.
//!
//! Waits grow exponentially and are jittered into `[delay / 2, delay]`.

use std::time::Duration;

use crate::endpoints::Operation;
use crate::error::VenueError;

/// Fallback base delay when retries are enabled with a zero base.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Retry configuration.
///
/// `max_retries` counts retries after the initial attempt, so the default
/// allows up to four attempts in total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on a single delay. Zero means uncapped.
    pub max_delay: Duration,
    /// Also retry when the venue answers with a rate-limit code.
    pub retry_on_rate_limit: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: Duration::from_secs(5),
            retry_on_rate_limit: false,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Decides whether and when a failed attempt is repeated.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Build a policy, substituting a safe base delay for a zero one.
    pub fn new(mut config: RetryConfig) -> Self {
        if config.max_retries > 0 && config.base_delay.is_zero() {
            config.base_delay = DEFAULT_BASE_DELAY;
        }
        Self { config }
    }

    /// The effective configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether attempt number `attempt` (1-based) that failed with `error`
    /// should be followed by another attempt.
    pub fn should_retry(&self, attempt: u32, error: &VenueError, operation: &Operation) -> bool {
        if !operation.is_idempotent() || attempt > self.config.max_retries {
            return false;
        }
        self.is_transient(error)
    }

    /// Whether `error` is worth repeating at all.
    pub fn is_transient(&self, error: &VenueError) -> bool {
        match error {
            VenueError::Transport(err) => err.is_pre_response(),
            VenueError::Api(err) => {
                err.is_server_busy() || (self.config.retry_on_rate_limit && err.is_rate_limit())
            }
            _ => false,
        }
    }

    /// Un-jittered delay before retrying after attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.config.base_delay.saturating_mul(1u32 << exponent);
        if self.config.max_delay.is_zero() {
            delay
        } else {
            delay.min(self.config.max_delay)
        }
    }

    /// Jittered delay before retrying after attempt `attempt`, sampled
    /// uniformly from `[backoff / 2, backoff]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let full = self.backoff(attempt);
        let half = full / 2;
        half + (full - half).mul_f64(rand::random::<f64>())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ContextError, TransportError, TransportErrorKind, error_codes};
    use crate::rate_limit::RouteKey;

    const READ: Operation = Operation::query(RouteKey::rest("GET", "/api/v1/market/ticker"));
    const WRITE: Operation = Operation::mutation(RouteKey::rest("POST", "/api/v1/trade/order"));

    fn reset() -> VenueError {
        TransportError::new(TransportErrorKind::ConnectionReset, "reset by peer").into()
    }

    #[test]
    fn test_backoff_bounds_uncapped() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::ZERO,
            ..RetryConfig::default()
        });

        let mut previous = Duration::ZERO;
        for attempt in 1..=5 {
            let computed = policy.backoff(attempt);
            assert!(computed >= previous);
            assert_eq!(computed, Duration::from_millis(200) * 2u32.pow(attempt - 1));
            previous = computed;

            for _ in 0..50 {
                let sampled = policy.delay(attempt);
                assert!(sampled >= computed / 2, "{sampled:?} below half of {computed:?}");
                assert!(sampled <= computed, "{sampled:?} above {computed:?}");
            }
        }
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(500),
            ..RetryConfig::default()
        });
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_base_gets_safe_default() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::ZERO,
            ..RetryConfig::default()
        });
        assert_eq!(policy.backoff(1), DEFAULT_BASE_DELAY);
    }

    #[test]
    fn test_never_retries_mutations() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 10,
            retry_on_rate_limit: true,
            ..RetryConfig::default()
        });
        assert!(!policy.should_retry(1, &reset(), &WRITE));
        let busy = ApiError::new(error_codes::SERVICE_UNAVAILABLE, "busy").into();
        assert!(!policy.should_retry(1, &busy, &WRITE));
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 2,
            ..RetryConfig::default()
        });
        assert!(policy.should_retry(1, &reset(), &READ));
        assert!(policy.should_retry(2, &reset(), &READ));
        assert!(!policy.should_retry(3, &reset(), &READ));

        assert!(!RetryPolicy::new(RetryConfig::disabled()).should_retry(1, &reset(), &READ));
    }

    #[test]
    fn test_transient_classification() {
        let policy = RetryPolicy::default();

        let eof = TransportError::new(TransportErrorKind::UnexpectedEof, "eof").into();
        let timeout = TransportError::new(TransportErrorKind::Timeout, "timed out").into();
        let cancelled = VenueError::Context(ContextError::Cancelled);
        let bad_request = ApiError::new(error_codes::INVALID_PARAMETERS, "bad symbol").into();
        let rate_limited: VenueError = ApiError::new(error_codes::RATE_LIMIT_EXCEEDED, "slow down").into();

        assert!(policy.is_transient(&eof));
        assert!(!policy.is_transient(&timeout));
        assert!(!policy.is_transient(&cancelled));
        assert!(!policy.is_transient(&bad_request));
        assert!(!policy.is_transient(&rate_limited));

        let opted_in = RetryPolicy::new(RetryConfig {
            retry_on_rate_limit: true,
            ..RetryConfig::default()
        });
        assert!(opted_in.is_transient(&rate_limited));
    }
}
