//! The admission gate: single choke point for every outbound call.
//!
//! The gate couples a global concurrency ceiling (protecting the local
//! process) with per-route limiters (protecting the venue). A call is admitted
//! only when both have room, and it then holds a [`Permit`] until it finishes.
//!
//! # Example
//!
//! ```rust
//! use venue_api_client::context::RequestContext;
//! use venue_api_client::rate_limit::{AdmissionGate, GateConfig, LimitPolicy, RouteKey};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let route = RouteKey::rest("POST", "/api/v1/trade/order");
//! let gate = AdmissionGate::new(GateConfig::default().route(route.clone(), LimitPolicy::Concurrency(1)));
//!
//! let ctx = RequestContext::new();
//! let mut permit = gate.acquire(&ctx, &route).await?;
//! assert_eq!(gate.outstanding(&route), 1);
//! permit.release();
//! assert_eq!(gate.outstanding(&route), 0);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::context::{ContextError, RequestContext};
use crate::rate_limit::limits;
use crate::rate_limit::limiter::{LimitPolicy, Refusal, Reservation, RouteLimiter};
use crate::rate_limit::RouteKey;

/// Why the gate refused to admit a call. Nothing was reserved in any case.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The caller's context expired while waiting for capacity.
    #[error("admission aborted: {0}")]
    Context(#[from] ContextError),

    /// The route has no budget at all.
    #[error("route {route} is denied (no quota)")]
    Denied {
        /// The refused route.
        route: RouteKey,
    },

    /// The gate was closed.
    #[error("admission gate is closed")]
    Closed,
}

/// Gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Global ceiling on in-flight calls. Zero means no global ceiling.
    pub max_concurrency: usize,
    /// Policy for routes without an explicit entry.
    pub default_policy: LimitPolicy,
    /// Per-route policies, applied when a route is first seen.
    pub routes: HashMap<RouteKey, LimitPolicy>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrency: limits::DEFAULT_MAX_CONCURRENCY,
            default_policy: LimitPolicy::Unbounded,
            routes: HashMap::new(),
        }
    }
}

impl GateConfig {
    /// Set the global concurrency ceiling.
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the policy for routes without an explicit entry.
    pub fn default_policy(mut self, policy: LimitPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Configure a specific route.
    pub fn route(mut self, route: RouteKey, policy: LimitPolicy) -> Self {
        self.routes.insert(route, policy);
        self
    }
}

/// Process-wide admission control for one client instance.
///
/// Route limiters are created lazily the first time a route is acquired and
/// then live as long as the gate.
#[derive(Debug)]
pub struct AdmissionGate {
    global: Arc<Semaphore>,
    max_concurrency: usize,
    in_flight: Arc<AtomicUsize>,
    routes: RwLock<HashMap<RouteKey, Arc<RouteLimiter>>>,
    overrides: HashMap<RouteKey, LimitPolicy>,
    default_policy: LimitPolicy,
}

impl AdmissionGate {
    /// Create a gate from its configuration.
    pub fn new(config: GateConfig) -> Self {
        let max_concurrency = match config.max_concurrency {
            0 => Semaphore::MAX_PERMITS,
            n => n.min(Semaphore::MAX_PERMITS),
        };
        Self {
            global: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            in_flight: Arc::new(AtomicUsize::new(0)),
            routes: RwLock::new(HashMap::new()),
            overrides: config.routes,
            default_policy: config.default_policy,
        }
    }

    /// Wait until both the global ceiling and the route's limiter have room,
    /// then reserve one slot in each.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::Context`] if `ctx` expires first.
    /// - [`AdmissionError::Denied`] immediately if the route has zero capacity.
    /// - [`AdmissionError::Closed`] if the gate was closed.
    ///
    /// No partial reservation survives an error.
    pub async fn acquire(
        &self,
        ctx: &RequestContext,
        route: &RouteKey,
    ) -> Result<Permit, AdmissionError> {
        let limiter = self.limiter(route);

        loop {
            ctx.check()?;

            let global = tokio::select! {
                biased;
                cause = ctx.done() => return Err(cause.into()),
                permit = self.global.clone().acquire_owned() => {
                    permit.map_err(|_| AdmissionError::Closed)?
                }
            };

            // Register interest before looking, so a release that lands between
            // the check and the wait still wakes us.
            let changed = limiter.changed().notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let retry_after = match limiter.reserve() {
                Ok(reservation) => {
                    return Ok(Permit::new(
                        global,
                        Arc::clone(&limiter),
                        reservation,
                        Arc::clone(&self.in_flight),
                    ));
                }
                Err(Refusal::Denied) => {
                    tracing::warn!(route = %route, "Route has no quota, refusing admission");
                    return Err(AdmissionError::Denied {
                        route: route.clone(),
                    });
                }
                Err(Refusal::Full) => None,
                Err(Refusal::NotBefore(wait)) => Some(wait),
            };

            // Never hold a global slot while parked on a route.
            drop(global);
            tracing::trace!(route = %route, ?retry_after, "Waiting for route capacity");

            tokio::select! {
                biased;
                cause = ctx.done() => return Err(cause.into()),
                _ = &mut changed => {}
                _ = tokio::time::sleep(retry_after.unwrap_or_default()), if retry_after.is_some() => {}
            }
        }
    }

    /// The limiter for `route`, created with its configured policy on first use.
    pub fn limiter(&self, route: &RouteKey) -> Arc<RouteLimiter> {
        if let Some(limiter) = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(route)
        {
            return Arc::clone(limiter);
        }

        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let limiter = routes.entry(route.clone()).or_insert_with(|| {
            let policy = self
                .overrides
                .get(route)
                .copied()
                .unwrap_or(self.default_policy);
            tracing::debug!(route = %route, ?policy, "Registering route limiter");
            Arc::new(RouteLimiter::new(route.clone(), policy))
        });
        Arc::clone(limiter)
    }

    /// Replace the policy of `route`, creating its limiter if needed.
    ///
    /// Permits already granted on the route remain valid until released.
    pub fn reconfigure(&self, route: &RouteKey, policy: LimitPolicy) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        match routes.get(route) {
            Some(limiter) => limiter.reconfigure(policy),
            None => {
                routes.insert(
                    route.clone(),
                    Arc::new(RouteLimiter::new(route.clone(), policy)),
                );
            }
        }
        tracing::info!(route = %route, ?policy, "Reconfigured route limiter");
    }

    /// Current policy of `route`, without registering it.
    pub fn policy(&self, route: &RouteKey) -> LimitPolicy {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(route)
            .map(|limiter| limiter.policy())
            .or_else(|| self.overrides.get(route).copied())
            .unwrap_or(self.default_policy)
    }

    /// Concurrency slots currently held on `route`.
    pub fn outstanding(&self, route: &RouteKey) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(route)
            .map_or(0, |limiter| limiter.outstanding())
    }

    /// Permits currently held across all routes.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Global permits still available.
    pub fn available_global_permits(&self) -> usize {
        self.global.available_permits()
    }

    /// The effective global ceiling.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Routes registered so far.
    pub fn routes(&self) -> Vec<RouteKey> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Refuse all future admissions. Permits already granted stay valid.
    pub fn close(&self) {
        self.global.close();
    }

    /// Whether [`AdmissionGate::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.global.is_closed()
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

/// Proof of admission. Released exactly once: explicitly through
/// [`Permit::release`], or on drop if the call ends any other way.
#[derive(Debug)]
pub struct Permit {
    inner: Option<PermitInner>,
}

#[derive(Debug)]
struct PermitInner {
    _global: OwnedSemaphorePermit,
    limiter: Arc<RouteLimiter>,
    reservation: Reservation,
    in_flight: Arc<AtomicUsize>,
}

impl Permit {
    fn new(
        global: OwnedSemaphorePermit,
        limiter: Arc<RouteLimiter>,
        reservation: Reservation,
        in_flight: Arc<AtomicUsize>,
    ) -> Self {
        in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Some(PermitInner {
                _global: global,
                limiter,
                reservation,
                in_flight,
            }),
        }
    }

    /// The route this permit was granted on.
    pub fn route(&self) -> Option<&RouteKey> {
        self.inner.as_ref().map(|inner| inner.limiter.key())
    }

    /// Whether the permit still holds its slots.
    pub fn is_held(&self) -> bool {
        self.inner.is_some()
    }

    /// Give the slots back. Calling this again has no effect.
    pub fn release(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.limiter.release(inner.reservation);
            inner.in_flight.fetch_sub(1, Ordering::AcqRel);
            // The global slot is returned when `inner` drops here.
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.release();
    }
}
