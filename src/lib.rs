//! # Venue API Client
//!
//! An async Rust client for a trading venue's REST and WebSocket APIs, built
//! around safe admission of outbound calls.
//!
//! ## Features
//!
//! - One admission gate per client: a global concurrency ceiling plus a
//!   concurrency or interval policy per route
//! - Order quota discovery: order routes stay blocked until the venue's
//!   published quota has been fetched and applied
//! - Retries with jittered exponential backoff, for idempotent operations only
//! - Every failure reports its stage and whether the request may have been sent
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rust_decimal::Decimal;
//! use venue_api_client::VenueClient;
//! use venue_api_client::auth::EnvCredentials;
//! use venue_api_client::context::RequestContext;
//! use venue_api_client::types::{OrderSide, PlaceOrderRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = VenueClient::builder()
//!         .credentials(Arc::new(EnvCredentials::from_env()?))
//!         .build();
//!
//!     let ctx = RequestContext::with_timeout(Duration::from_secs(5));
//!     let order = PlaceOrderRequest::limit("my-oid-1", "BTC-USDT", OrderSide::Buy, Decimal::new(30_000, 0), Decimal::new(1, 3));
//!
//!     match client.place_order(&ctx, &order).await {
//!         Ok(id) => println!("placed {}", id.order_id),
//!         Err(err) if err.dispatched() => println!("unknown outcome, check my-oid-1: {err}"),
//!         Err(err) => println!("not sent, safe to resubmit: {err}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod context;
pub mod endpoints;
pub mod envelope;
pub mod error;
pub mod observer;
pub mod rate_limit;
pub mod retry;
pub mod stage;
pub mod transport;
pub mod types;

// Re-export commonly used types at crate root
pub use client::{VenueClient, VenueClientBuilder};
pub use context::RequestContext;
pub use error::VenueError;
pub use stage::{RequestStateError, Stage};

/// Result type alias using VenueError
pub type Result<T> = std::result::Result<T, VenueError>;
