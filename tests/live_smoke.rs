use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use venue_api_client::VenueClient;
use venue_api_client::auth::EnvCredentials;
use venue_api_client::context::RequestContext;
use venue_api_client::endpoints::account;

fn live_tests_enabled() -> bool {
    std::env::var("VENUE_LIVE_TESTS").ok().as_deref() == Some("1")
}

#[tokio::test]
#[ignore]
async fn live_public_smoke() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv::dotenv();
    if !live_tests_enabled() {
        return Ok(());
    }

    let client = VenueClient::new();
    let ctx = RequestContext::with_timeout(Duration::from_secs(10));

    let time = client.server_time(&ctx).await?;
    assert!(time > 0);
    let ticker = client.ticker(&ctx, "BTC-USDT").await?;
    assert!(ticker.best_ask >= ticker.best_bid);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn live_private_smoke() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv::dotenv();
    if !live_tests_enabled() {
        return Ok(());
    }

    let credentials = match EnvCredentials::try_from_env() {
        Some(creds) => creds,
        None => return Ok(()),
    };
    let client = VenueClient::builder()
        .credentials(Arc::new(credentials))
        .build();
    let ctx = RequestContext::with_timeout(Duration::from_secs(10));

    let _accounts: Value = client.call::<_, Value>(&ctx, &account::ACCOUNTS, None).await?;
    let quota: Value = client.call::<_, Value>(&ctx, &account::ORDER_QUOTA, None).await?;
    assert!(quota.is_string() || quota.is_number());

    Ok(())
}
