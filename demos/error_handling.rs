//! Example: Telling "not sent" apart from "outcome unknown".
//!
//! Run with: cargo run --example error_handling

use std::time::Duration;

use venue_api_client::context::RequestContext;
use venue_api_client::error::{ApiError, TransportError, TransportErrorKind, error_codes};
use venue_api_client::retry::RetryConfig;
use venue_api_client::{RequestStateError, Stage, VenueClient, VenueError};

fn describe(err: &RequestStateError) {
    println!("{err}");
    match (err.stage(), err.dispatched()) {
        (Stage::Preflight | Stage::Admission, _) | (Stage::Transport, false) => {
            println!("  -> never reached the venue, safe to resubmit");
        }
        (Stage::Transport, true) => {
            if let Some(api) = err.cause().api_error() {
                println!("  -> venue answered with code {}: {}", api.code, api.message);
            } else {
                println!("  -> outcome unknown, reconcile before resubmitting");
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let api_error = ApiError::new(error_codes::RATE_LIMIT_EXCEEDED, "Too Many Requests");
    println!("API error: {api_error}");
    println!("Is rate limit: {}", api_error.is_rate_limit());

    let reset = TransportError::new(TransportErrorKind::ConnectionReset, "reset by peer");
    println!("Reset was sent: {}, pre-response: {}", reset.sent(), reset.is_pre_response());
    let refused = TransportError::new(TransportErrorKind::Connect, "connection refused");
    println!("Refused was sent: {}", refused.sent());

    // Nothing listens on port 1, so every attempt fails to connect.
    let client = VenueClient::builder()
        .base_url("http://127.0.0.1:1")
        .retry_config(RetryConfig {
            max_retries: 1,
            base_delay: Duration::from_millis(10),
            ..RetryConfig::default()
        })
        .build();
    let ctx = RequestContext::with_timeout(Duration::from_secs(5));

    match client.server_time(&ctx).await {
        Ok(time) => println!("server time: {time}"),
        Err(err) => describe(&err),
    }

    // Signed calls without credentials fail before admission.
    match client
        .call::<serde_json::Value, serde_json::Value>(
            &ctx,
            &venue_api_client::endpoints::account::ACCOUNTS,
            None,
        )
        .await
    {
        Ok(_) => println!("accounts fetched"),
        Err(err) => {
            describe(&err);
            if matches!(err.cause(), VenueError::MissingCredentials) {
                println!("  -> configure credentials first");
            }
        }
    }
}
