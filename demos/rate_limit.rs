//! Example: Admission gate and quota priming without a network.
//!
//! Run with: cargo run --example rate_limit

use std::sync::Arc;
use std::time::{Duration, Instant};

use venue_api_client::VenueError;
use venue_api_client::context::RequestContext;
use venue_api_client::endpoints::trade;
use venue_api_client::rate_limit::{
    AdmissionGate, GateConfig, LimitPolicy, PrimerConfig, QuotaMode, QuotaSource, RateLimitPrimer,
    RouteKey,
};

/// Pretends to be the venue's quota endpoint.
struct FixedQuota(&'static str);

impl QuotaSource for FixedQuota {
    async fn fetch_quota(&self, _ctx: &RequestContext) -> Result<String, VenueError> {
        Ok(self.0.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let symbols = RouteKey::rest("GET", "/api/v1/symbols");
    let gate = Arc::new(AdmissionGate::new(
        GateConfig::default()
            .max_concurrency(8)
            .route(symbols.clone(), LimitPolicy::Interval(Duration::from_millis(100))),
    ));

    // Interval routes admit one call per period.
    let ctx = RequestContext::with_timeout(Duration::from_secs(2));
    let started = Instant::now();
    for n in 1..=3 {
        let permit = gate.acquire(&ctx, &symbols).await?;
        println!("symbols call #{n} admitted after {:?}", started.elapsed());
        drop(permit);
    }

    // Order routes are denied until the quota is known.
    let order_route = trade::PLACE_ORDER.route().clone();
    let primer = RateLimitPrimer::new(
        Arc::clone(&gate),
        PrimerConfig {
            governed_routes: vec![order_route.clone()],
            quota_mode: QuotaMode::Concurrency,
            ..PrimerConfig::default()
        },
    );
    match gate.acquire(&ctx, &order_route).await {
        Err(err) => println!("before priming: {err}"),
        Ok(_) => println!("before priming: admitted"),
    }

    primer.ensure(&ctx, &FixedQuota("2")).await?;
    println!("primed, order policy is now {:?}", gate.policy(&order_route));

    let first = gate.acquire(&ctx, &order_route).await?;
    let second = gate.acquire(&ctx, &order_route).await?;
    println!("orders in flight: {}", gate.outstanding(&order_route));

    // A third order waits; give up after 50ms.
    let short = RequestContext::with_timeout(Duration::from_millis(50));
    match gate.acquire(&short, &order_route).await {
        Err(err) => println!("third order: {err}"),
        Ok(_) => println!("third order: admitted"),
    }

    drop(first);
    drop(second);
    println!("orders in flight after release: {}", gate.outstanding(&order_route));

    Ok(())
}
