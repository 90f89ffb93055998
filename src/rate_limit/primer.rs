//! Quota priming for rate-governed routes.
//!
//! The venue publishes each account's current order quota through a dedicated
//! endpoint. Governed routes start out denied and stay that way until the
//! primer has fetched a quota and reconfigured them. A failed fetch is cached
//! and replayed to callers until the minimum retry interval has passed, so a
//! throttled priming endpoint is not hammered by every call.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::context::{ContextError, RequestContext};
use crate::error::VenueError;
use crate::observer::ErrorObserver;
use crate::rate_limit::limits;
use crate::rate_limit::{AdmissionGate, LimitPolicy, RouteKey};

/// Something that can fetch the caller's current quota from the venue.
pub trait QuotaSource: Send + Sync {
    /// Fetch the raw quota value, normally a numeric string.
    fn fetch_quota(
        &self,
        ctx: &RequestContext,
    ) -> impl Future<Output = Result<String, VenueError>> + Send;
}

/// How a primed quota translates into a route policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QuotaMode {
    /// A quota of `n` allows `n` calls in flight at once.
    #[default]
    Concurrency,
    /// A quota of `n` allows `n` admissions per second, evenly spaced.
    PerSecond,
}

impl QuotaMode {
    /// The policy for a parsed quota. Zero always denies.
    pub fn policy(self, quota: u32) -> LimitPolicy {
        if quota == 0 {
            return LimitPolicy::deny();
        }
        match self {
            QuotaMode::Concurrency => LimitPolicy::Concurrency(quota as usize),
            QuotaMode::PerSecond => LimitPolicy::Interval(Duration::from_secs(1) / quota),
        }
    }
}

/// Primer configuration.
#[derive(Debug, Clone)]
pub struct PrimerConfig {
    /// Minimum spacing between priming attempts after a failure.
    pub min_retry_interval: Duration,
    /// Routes reconfigured from the primed quota.
    pub governed_routes: Vec<RouteKey>,
    /// How the quota maps onto route policies.
    pub quota_mode: QuotaMode,
}

impl Default for PrimerConfig {
    fn default() -> Self {
        Self {
            min_retry_interval: limits::DEFAULT_PRIMING_RETRY_INTERVAL,
            governed_routes: Vec::new(),
            quota_mode: QuotaMode::default(),
        }
    }
}

/// Why a caller could not get past priming.
#[derive(Error, Debug, Clone)]
pub enum PrimingError {
    /// The priming call failed.
    #[error("quota priming failed: {0}")]
    Failed(Arc<VenueError>),

    /// A recent priming attempt failed and the retry interval has not passed.
    #[error("quota priming recently failed, next attempt in {retry_in:?}: {last}")]
    Throttled {
        /// The cached failure.
        last: Arc<VenueError>,
        /// Time until the next attempt is allowed.
        retry_in: Duration,
    },

    /// The caller's context expired while priming.
    #[error("quota priming aborted: {0}")]
    Context(ContextError),
}

impl PrimingError {
    /// The underlying priming failure, if one was observed.
    pub fn cause(&self) -> Option<&VenueError> {
        match self {
            PrimingError::Failed(cause) | PrimingError::Throttled { last: cause, .. } => {
                Some(cause.as_ref())
            }
            PrimingError::Context(_) => None,
        }
    }
}

/// Snapshot of the primer's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimingState {
    /// Whether a quota has been applied.
    pub primed: bool,
    /// When the last priming call was issued.
    pub last_attempt: Option<Instant>,
    /// The cached failure of the last attempt, if it failed.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Attempt {
    at: Option<Instant>,
    error: Option<Arc<VenueError>>,
}

/// Discovers the account's quota and applies it to governed routes.
pub struct RateLimitPrimer {
    gate: Arc<AdmissionGate>,
    config: PrimerConfig,
    primed: AtomicBool,
    attempts: AtomicU64,
    last: Mutex<Attempt>,
    observer: Option<ErrorObserver>,
}

impl std::fmt::Debug for RateLimitPrimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitPrimer")
            .field("config", &self.config)
            .field("primed", &self.primed)
            .field("attempts", &self.attempts)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl RateLimitPrimer {
    /// Create a primer for `gate`, denying every governed route until primed.
    pub fn new(gate: Arc<AdmissionGate>, config: PrimerConfig) -> Self {
        for route in &config.governed_routes {
            gate.reconfigure(route, LimitPolicy::deny());
        }
        Self {
            gate,
            config,
            primed: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            last: Mutex::new(Attempt::default()),
            observer: None,
        }
    }

    /// Report priming failures to `observer`.
    pub fn with_observer(mut self, observer: ErrorObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The routes this primer governs.
    pub fn governed_routes(&self) -> &[RouteKey] {
        &self.config.governed_routes
    }

    /// Whether `route` is governed by this primer.
    pub fn governs(&self, route: &RouteKey) -> bool {
        self.config.governed_routes.contains(route)
    }

    /// Whether a quota has been applied.
    pub fn is_primed(&self) -> bool {
        self.primed.load(Ordering::Acquire)
    }

    /// Number of priming calls issued so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Make sure governed routes carry the venue's quota.
    ///
    /// Returns immediately once primed. Concurrent first callers are serialized
    /// so exactly one priming call is issued; the rest observe its outcome.
    pub async fn ensure<S>(&self, ctx: &RequestContext, source: &S) -> Result<(), PrimingError>
    where
        S: QuotaSource + ?Sized,
    {
        if self.is_primed() {
            return Ok(());
        }

        let mut last = tokio::select! {
            biased;
            cause = ctx.done() => return Err(PrimingError::Context(cause)),
            guard = self.last.lock() => guard,
        };

        if self.is_primed() {
            return Ok(());
        }

        if let (Some(at), Some(error)) = (last.at, last.error.as_ref()) {
            let elapsed = at.elapsed();
            if elapsed < self.config.min_retry_interval {
                return Err(PrimingError::Throttled {
                    last: Arc::clone(error),
                    retry_in: self.config.min_retry_interval - elapsed,
                });
            }
        }

        last.at = Some(Instant::now());
        self.attempts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(routes = self.config.governed_routes.len(), "Priming order quota");

        match source.fetch_quota(ctx).await {
            Ok(raw) => {
                let quota = parse_quota(&raw);
                self.apply(quota);
                last.error = None;
                self.primed.store(true, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                if let Some(cause) = err.context_error() {
                    // The caller gave up; that says nothing about the venue.
                    last.at = None;
                    return Err(PrimingError::Context(cause));
                }
                tracing::warn!(error = %err, "Quota priming failed");
                if let Some(observer) = &self.observer {
                    observer(&err);
                }
                let err = Arc::new(err);
                last.error = Some(Arc::clone(&err));
                Err(PrimingError::Failed(err))
            }
        }
    }

    fn apply(&self, quota: u32) {
        let policy = self.config.quota_mode.policy(quota);
        for route in &self.config.governed_routes {
            self.gate.reconfigure(route, policy);
        }
        if quota == 0 {
            tracing::warn!("Venue reported no order quota, governed routes stay denied");
        } else {
            tracing::info!(quota, ?policy, "Applied order quota");
        }
    }

    /// Forget the current quota so the next governed call primes again.
    ///
    /// Governed routes keep their current policy until the new quota arrives.
    pub async fn force_reprime(&self) {
        let mut last = self.last.lock().await;
        last.at = None;
        last.error = None;
        self.primed.store(false, Ordering::Release);
        tracing::debug!("Quota priming reset");
    }

    /// Current priming state.
    pub async fn state(&self) -> PrimingState {
        let last = self.last.lock().await;
        PrimingState {
            primed: self.is_primed(),
            last_attempt: last.at,
            last_error: last.error.as_ref().map(|err| err.to_string()),
        }
    }
}

/// Parse a quota value reported by the venue.
///
/// Anything that is not a positive number counts as zero, so a malformed
/// response can only ever tighten limits. Fractions are truncated.
pub fn parse_quota(raw: &str) -> u32 {
    let Ok(value) = raw.trim().parse::<Decimal>() else {
        return 0;
    };
    if value <= Decimal::ZERO {
        return 0;
    }
    value.trunc().to_u32().unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FixedQuota {
        responses: std::sync::Mutex<Vec<Result<String, VenueError>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FixedQuota {
        fn new(responses: Vec<Result<String, VenueError>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl QuotaSource for FixedQuota {
        async fn fetch_quota(&self, _ctx: &RequestContext) -> Result<String, VenueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                match &responses[0] {
                    Ok(raw) => Ok(raw.clone()),
                    Err(err) => Err(VenueError::InvalidResponse(err.to_string())),
                }
            }
        }
    }

    fn order_route() -> RouteKey {
        RouteKey::rest("POST", "/api/v1/trade/order")
    }

    fn primer(min_retry_interval: Duration) -> (Arc<AdmissionGate>, RateLimitPrimer) {
        let gate = Arc::new(AdmissionGate::default());
        let primer = RateLimitPrimer::new(
            Arc::clone(&gate),
            PrimerConfig {
                min_retry_interval,
                governed_routes: vec![order_route()],
                quota_mode: QuotaMode::Concurrency,
            },
        );
        (gate, primer)
    }

    #[test]
    fn test_parse_quota() {
        assert_eq!(parse_quota("5"), 5);
        assert_eq!(parse_quota(" 12 "), 12);
        assert_eq!(parse_quota("3.9"), 3);
        assert_eq!(parse_quota("0"), 0);
        assert_eq!(parse_quota("-4"), 0);
        assert_eq!(parse_quota(""), 0);
        assert_eq!(parse_quota("unlimited"), 0);
        assert_eq!(parse_quota("99999999999"), u32::MAX);
    }

    #[test]
    fn test_quota_mode_policy() {
        assert_eq!(QuotaMode::Concurrency.policy(4), LimitPolicy::Concurrency(4));
        assert_eq!(
            QuotaMode::PerSecond.policy(4),
            LimitPolicy::Interval(Duration::from_millis(250))
        );
        assert!(QuotaMode::PerSecond.policy(0).is_denied());
    }

    #[tokio::test]
    async fn test_governed_routes_start_denied() {
        let (gate, primer) = primer(Duration::from_secs(10));
        assert!(!primer.is_primed());
        assert!(gate.policy(&order_route()).is_denied());
    }

    #[tokio::test]
    async fn test_ensure_applies_quota_once() {
        let (gate, primer) = primer(Duration::from_secs(10));
        let source = FixedQuota::new(vec![Ok("3".to_string())]);
        let ctx = RequestContext::new();

        primer.ensure(&ctx, &source).await.unwrap();
        primer.ensure(&ctx, &source).await.unwrap();

        assert!(primer.is_primed());
        assert_eq!(source.calls(), 1);
        assert_eq!(gate.policy(&order_route()), LimitPolicy::Concurrency(3));
    }

    #[tokio::test]
    async fn test_zero_quota_keeps_route_denied() {
        let (gate, primer) = primer(Duration::from_secs(10));
        let source = FixedQuota::new(vec![Ok("0".to_string())]);

        primer.ensure(&RequestContext::new(), &source).await.unwrap();
        assert!(primer.is_primed());
        assert!(gate.policy(&order_route()).is_denied());
    }

    #[tokio::test]
    async fn test_high_per_second_quota_admits_back_to_back() {
        let gate = Arc::new(AdmissionGate::default());
        let primer = RateLimitPrimer::new(
            Arc::clone(&gate),
            PrimerConfig {
                governed_routes: vec![order_route()],
                quota_mode: QuotaMode::PerSecond,
                ..PrimerConfig::default()
            },
        );
        let source = FixedQuota::new(vec![Ok("2000".to_string())]);
        let ctx = RequestContext::with_timeout(Duration::from_secs(1));

        primer.ensure(&ctx, &source).await.unwrap();
        assert_eq!(
            gate.policy(&order_route()),
            LimitPolicy::Interval(Duration::from_micros(500))
        );

        let first = gate.acquire(&ctx, &order_route()).await.unwrap();
        let second = gate.acquire(&ctx, &order_route()).await.unwrap();
        assert!(first.is_held() && second.is_held());
    }

    #[tokio::test]
    async fn test_failure_is_cached_until_interval_passes() {
        let (_gate, primer) = primer(Duration::from_millis(50));
        let source = FixedQuota::new(vec![
            Err(VenueError::InvalidResponse("boom".to_string())),
            Ok("2".to_string()),
        ]);
        let ctx = RequestContext::new();

        assert!(matches!(
            primer.ensure(&ctx, &source).await,
            Err(PrimingError::Failed(_))
        ));
        assert!(matches!(
            primer.ensure(&ctx, &source).await,
            Err(PrimingError::Throttled { .. })
        ));
        assert_eq!(source.calls(), 1);

        let state = primer.state().await;
        assert!(!state.primed);
        assert!(state.last_error.unwrap().contains("boom"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        primer.ensure(&ctx, &source).await.unwrap();
        assert_eq!(source.calls(), 2);
        assert!(primer.state().await.last_error.is_none());
    }

    #[tokio::test]
    async fn test_observer_sees_priming_failures() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let (_gate, primer) = primer(Duration::from_secs(10));
        let primer = primer.with_observer(Arc::new(move |_err: &VenueError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let source = FixedQuota::new(vec![Err(VenueError::InvalidResponse("down".to_string()))]);

        let _ = primer.ensure(&RequestContext::new(), &source).await;
        let _ = primer.ensure(&RequestContext::new(), &source).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_caller_cancellation_is_not_cached() {
        let (_gate, primer) = primer(Duration::from_secs(10));
        let source = FixedQuota::new(vec![
            Err(VenueError::Context(ContextError::Cancelled)),
            Ok("1".to_string()),
        ]);

        let err = primer.ensure(&RequestContext::new(), &source).await.unwrap_err();
        assert!(matches!(err, PrimingError::Context(ContextError::Cancelled)));

        primer.ensure(&RequestContext::new(), &source).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_force_reprime() {
        let (gate, primer) = primer(Duration::from_secs(10));
        let source = FixedQuota::new(vec![Ok("1".to_string()), Ok("4".to_string())]);
        let ctx = RequestContext::new();

        primer.ensure(&ctx, &source).await.unwrap();
        primer.force_reprime().await;
        assert!(!primer.is_primed());

        primer.ensure(&ctx, &source).await.unwrap();
        assert_eq!(primer.attempts(), 2);
        assert_eq!(gate.policy(&order_route()), LimitPolicy::Concurrency(4));
    }

    #[tokio::test]
    async fn test_concurrent_first_callers_prime_once() {
        let (_gate, primer) = primer(Duration::from_secs(10));
        let primer = Arc::new(primer);
        let source = Arc::new(FixedQuota {
            delay: Duration::from_millis(20),
            ..FixedQuota::new(vec![Ok("2".to_string())])
        });

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let primer = Arc::clone(&primer);
                let source = Arc::clone(&source);
                tokio::spawn(async move { primer.ensure(&RequestContext::new(), source.as_ref()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(source.calls(), 1);
        assert!(primer.is_primed());
    }
}
