//! Admission control and rate limiting.
//!
//! Every outbound call passes through one [`AdmissionGate`] before it may touch
//! the network. The gate enforces a global concurrency ceiling plus a policy per
//! route. Order routes are additionally governed by the venue's published quota,
//! which [`RateLimitPrimer`] fetches lazily and applies to the gate.
//!
//! ## Policies
//!
//! - **Unbounded**: only the global ceiling applies
//! - **Concurrency(n)**: at most `n` calls in flight on the route; `0` denies
//! - **Interval(d)**: at most one admission every `d`
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use venue_api_client::context::RequestContext;
//! use venue_api_client::rate_limit::{AdmissionGate, GateConfig, LimitPolicy, RouteKey};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ticker = RouteKey::rest("GET", "/api/v1/market/ticker");
//! let gate = AdmissionGate::new(
//!     GateConfig::default()
//!         .max_concurrency(16)
//!         .route(ticker.clone(), LimitPolicy::Interval(Duration::from_millis(100))),
//! );
//!
//! let ctx = RequestContext::with_timeout(Duration::from_secs(1));
//! let permit = gate.acquire(&ctx, &ticker).await?;
//! drop(permit);
//! # Ok(())
//! # }
//! ```

mod gate;
mod limiter;
mod primer;
mod route;

pub use gate::{AdmissionError, AdmissionGate, GateConfig, Permit};
pub use limiter::{LimitPolicy, Reservation, RouteLimiter};
pub use primer::{
    PrimerConfig, PrimingError, PrimingState, QuotaMode, QuotaSource, RateLimitPrimer, parse_quota,
};
pub use route::{Protocol, RouteKey};

/// Default limits.
pub mod limits {
    use std::time::Duration;

    /// Global ceiling on in-flight calls per client.
    pub const DEFAULT_MAX_CONCURRENCY: usize = 64;

    /// Minimum spacing between priming attempts after a failure.
    pub const DEFAULT_PRIMING_RETRY_INTERVAL: Duration = Duration::from_secs(10);
}
