//! Price Client Integration Tests
//!
//! Runs the metal and exchange clients against a mock HTTP upstream:
//! - Fresh cache hits avoid the network
//! - Expired entries are refreshed, and served stale when refresh fails
//! - Unit normalization and per-metal independence
//! - Exchange tables populate every pair from one request
//! - An open breaker serves stale data without touching the upstream

use chrono::NaiveDate;
use jewelbox_core::circuit_breaker::{CircuitBreakerFactory, CircuitState};
use jewelbox_core::http::{ApiClient, ApiClientConfig};
use jewelbox_core::pricing::{
    ExchangeRateApiClient, ExchangeRateClientConfig, Metal, MetalPriceApiClient, MetalPriceClientConfig,
    PriceSource, TROY_OUNCE_IN_GRAMS,
};
use mockito::Server;
use std::time::{Duration, Instant};

const SHORT_TTL: Duration = Duration::from_millis(300);

fn api(base_url: &str) -> ApiClient {
    ApiClient::new(ApiClientConfig {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(2),
        retries: 0,
        retry_delay: Duration::from_millis(10),
        ..ApiClientConfig::default()
    })
    .expect("client should build")
}

fn metal_client(base_url: &str, cache_ttl: Duration) -> MetalPriceApiClient {
    MetalPriceApiClient::new(
        api(base_url),
        &CircuitBreakerFactory::new(),
        MetalPriceClientConfig {
            currency: "USD".to_string(),
            cache_ttl,
            rate_limit: Duration::ZERO,
            breaker: None,
        },
    )
}

fn exchange_client(base_url: &str, cache_ttl: Duration) -> ExchangeRateApiClient {
    ExchangeRateApiClient::new(
        api(base_url),
        &CircuitBreakerFactory::new(),
        ExchangeRateClientConfig { cache_ttl, breaker: None },
    )
}

fn mid_january() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date")
}

const GOLD_QUOTE: &str = r#"{"price": 2350.5, "currency": "USD", "timestamp": 1700000000, "ch": 12.5, "chp": 0.53}"#;

const USD_TABLE: &str = r#"{
    "result": "success",
    "base_code": "USD",
    "time_last_update_unix": 1700000000,
    "conversion_rates": {"USD": 1.0, "EUR": 0.92, "GBP": 0.79}
}"#;

#[tokio::test]
async fn test_fresh_cache_avoids_network_until_expiry() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/XAU/USD")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(GOLD_QUOTE)
        .expect(2)
        .create_async()
        .await;

    let client = metal_client(&server.url(), SHORT_TTL);

    let first = client.get_current_price(Metal::Gold).await.expect("live price");
    assert_eq!(first.source, PriceSource::Live);
    assert_eq!(first.price_per_ounce, 2350.5);
    assert_eq!(first.change, Some(12.5));

    let second = client.get_current_price(Metal::Gold).await.expect("cached price");
    assert_eq!(second.source, PriceSource::Cached);
    assert_eq!(second.price_per_ounce, 2350.5);

    tokio::time::sleep(SHORT_TTL + Duration::from_millis(100)).await;

    let third = client.get_current_price(Metal::Gold).await.expect("refreshed price");
    assert_eq!(third.source, PriceSource::Live);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_expired_entry_served_stale_when_refresh_fails() {
    let mut server = Server::new_async().await;
    let ok = server
        .mock("GET", "/XAG/USD")
        .with_status(200)
        .with_body(r#"{"price": 29.4}"#)
        .create_async()
        .await;

    let client = metal_client(&server.url(), SHORT_TTL);
    let live = client.get_current_price(Metal::Silver).await.expect("live price");
    assert_eq!(live.source, PriceSource::Live);

    ok.remove_async().await;
    let failing = server
        .mock("GET", "/XAG/USD")
        .with_status(500)
        .with_body(r#"{"message": "upstream exploded"}"#)
        .create_async()
        .await;

    tokio::time::sleep(SHORT_TTL + Duration::from_millis(100)).await;

    let stale = client.get_current_price(Metal::Silver).await.expect("stale price");
    assert_eq!(stale.source, PriceSource::Stale);
    assert_eq!(stale.price_per_ounce, 29.4);
    assert_eq!(client.breaker().stats().failure_count, 1);

    failing.assert_async().await;
}

#[tokio::test]
async fn test_gram_quotes_are_normalized() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/XPT/USD")
        .with_status(200)
        .with_body(r#"{"price": 31.0, "unit": "gram"}"#)
        .create_async()
        .await;

    let client = metal_client(&server.url(), SHORT_TTL);
    let price = client.get_current_price(Metal::Platinum).await.expect("price");

    assert_eq!(price.price_per_gram, 31.0);
    assert!((price.price_per_ounce - 31.0 * TROY_OUNCE_IN_GRAMS).abs() < 1e-9);
    assert_eq!(price.currency, "USD");
}

#[tokio::test]
async fn test_multiple_prices_fail_independently() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/XAU/USD")
        .with_status(200)
        .with_body(GOLD_QUOTE)
        .create_async()
        .await;
    server
        .mock("GET", "/XPD/USD")
        .with_status(503)
        .create_async()
        .await;

    let client = metal_client(&server.url(), SHORT_TTL);
    let prices = client
        .get_multiple_prices(&[Metal::Gold, Metal::Palladium])
        .await;

    assert_eq!(prices.len(), 2);
    assert!(prices[&Metal::Gold].is_some());
    assert!(prices[&Metal::Palladium].is_none());
}

#[tokio::test]
async fn test_default_price_when_unreachable() {
    // Nothing listens on the discard port
    let client = metal_client("http://127.0.0.1:9", SHORT_TTL);
    let price = client.get_price_or_default(Metal::Gold).await;

    assert_eq!(price.source, PriceSource::Default);
    assert_eq!(price.price_per_ounce, Metal::Gold.default_price_per_ounce());
}

#[tokio::test]
async fn test_default_price_is_quoted_in_usd() {
    let client = MetalPriceApiClient::new(
        api("http://127.0.0.1:9"),
        &CircuitBreakerFactory::new(),
        MetalPriceClientConfig {
            currency: "EUR".to_string(),
            cache_ttl: SHORT_TTL,
            rate_limit: Duration::ZERO,
            breaker: None,
        },
    );
    assert_eq!(client.currency(), "EUR");

    let price = client.get_price_or_default(Metal::Silver).await;
    assert_eq!(price.source, PriceSource::Default);
    assert_eq!(price.currency, "USD");
    assert_eq!(price.price_per_ounce, Metal::Silver.default_price_per_ounce());
}

#[tokio::test]
async fn test_open_breaker_serves_stale_metal_price_without_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/XAU/USD")
        .with_status(200)
        .with_body(GOLD_QUOTE)
        .expect(1)
        .create_async()
        .await;

    let client = metal_client(&server.url(), SHORT_TTL);
    client.get_current_price(Metal::Gold).await.expect("live price");

    client.breaker().force_open();
    tokio::time::sleep(SHORT_TTL + Duration::from_millis(100)).await;

    let stale = client.get_current_price(Metal::Gold).await.expect("stale price");
    assert_eq!(stale.source, PriceSource::Stale);
    assert_eq!(stale.price_per_ounce, 2350.5);

    let stats = client.breaker().stats();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.failure_count, 0, "rejected calls are not failures");
    assert_eq!(stats.total_requests, 1);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_historical_metal_price_uses_dated_path() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/XAU/USD/20240115")
        .with_status(200)
        .with_body(r#"{"price": 2050.0}"#)
        .expect(1)
        .create_async()
        .await;

    let client = metal_client(&server.url(), SHORT_TTL);

    let price = client
        .get_historical_price(Metal::Gold, mid_january())
        .await
        .expect("historical price");
    assert_eq!(price.source, PriceSource::Live);
    assert_eq!(price.price_per_ounce, 2050.0);

    // Cached separately from the current price
    let again = client
        .get_historical_price(Metal::Gold, mid_january())
        .await
        .expect("cached historical price");
    assert_eq!(again.source, PriceSource::Cached);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_rate_limit_spaces_requests_across_metals() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/XAU/USD")
        .with_status(200)
        .with_body(GOLD_QUOTE)
        .create_async()
        .await;
    server
        .mock("GET", "/XAG/USD")
        .with_status(200)
        .with_body(r#"{"price": 29.4}"#)
        .create_async()
        .await;

    let rate_limit = Duration::from_millis(200);
    let client = MetalPriceApiClient::new(
        api(&server.url()),
        &CircuitBreakerFactory::new(),
        MetalPriceClientConfig {
            currency: "USD".to_string(),
            cache_ttl: SHORT_TTL,
            rate_limit,
            breaker: None,
        },
    );

    let started = Instant::now();
    client.get_current_price(Metal::Gold).await.expect("gold price");
    client.get_current_price(Metal::Silver).await.expect("silver price");

    assert!(
        started.elapsed() >= rate_limit,
        "second request should wait out the rate limit, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_exchange_table_populates_sibling_pairs() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/latest/USD")
        .with_status(200)
        .with_body(USD_TABLE)
        .expect(1)
        .create_async()
        .await;

    let client = exchange_client(&server.url(), Duration::from_secs(60));

    let eur = client.get_exchange_rate("usd", "eur").await.expect("EUR rate");
    assert_eq!(eur.source, PriceSource::Live);
    assert_eq!(eur.rate, 0.92);
    assert_eq!((eur.from.as_str(), eur.to.as_str()), ("USD", "EUR"));

    // Served from the table cached by the first request
    let gbp = client.get_exchange_rate("USD", "GBP").await.expect("GBP rate");
    assert_eq!(gbp.source, PriceSource::Cached);
    assert_eq!(gbp.rate, 0.79);

    let conversion = client.convert_currency(100.0, "USD", "EUR").await.expect("conversion");
    assert!((conversion.converted_amount - 92.0).abs() < 1e-9);
    assert_eq!(conversion.source, PriceSource::Cached);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_exchange_error_payload_is_a_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/latest/JPY")
        .with_status(200)
        .with_body(r#"{"result": "error", "error-type": "invalid-key"}"#)
        .create_async()
        .await;

    let client = exchange_client(&server.url(), Duration::from_secs(60));
    assert!(client.get_exchange_rate("JPY", "USD").await.is_none());
    assert_eq!(client.breaker().stats().failure_count, 1);
}

#[tokio::test]
async fn test_open_breaker_serves_stale_rate_without_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/latest/USD")
        .with_status(200)
        .with_body(USD_TABLE)
        .expect(1)
        .create_async()
        .await;

    let client = exchange_client(&server.url(), SHORT_TTL);
    client.get_exchange_rate("USD", "EUR").await.expect("live rate");

    client.breaker().force_open();
    tokio::time::sleep(SHORT_TTL + Duration::from_millis(100)).await;

    let stale = client.get_exchange_rate("USD", "EUR").await.expect("stale rate");
    assert_eq!(stale.source, PriceSource::Stale);
    assert_eq!(stale.rate, 0.92);

    let stats = client.breaker().stats();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.failure_count, 0, "rejected calls are not failures");
    assert_eq!(stats.total_requests, 1);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_historical_rate_uses_dated_path() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/history/USD/2024/1/15")
        .with_status(200)
        .with_body(r#"{"result": "success", "conversion_rates": {"EUR": 0.91, "GBP": 0.78}}"#)
        .expect(1)
        .create_async()
        .await;

    let client = exchange_client(&server.url(), Duration::from_secs(60));

    let eur = client
        .get_historical_rate("usd", "eur", mid_january())
        .await
        .expect("historical EUR rate");
    assert_eq!(eur.source, PriceSource::Live);
    assert_eq!(eur.rate, 0.91);

    // Sibling pair for the same date comes from the cached table
    let gbp = client
        .get_historical_rate("USD", "GBP", mid_january())
        .await
        .expect("historical GBP rate");
    assert_eq!(gbp.source, PriceSource::Cached);
    assert_eq!(gbp.rate, 0.78);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_multiple_rates_fail_independently() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/latest/USD")
        .with_status(200)
        .with_body(USD_TABLE)
        .create_async()
        .await;

    let client = exchange_client(&server.url(), Duration::from_secs(60));
    let rates = client.get_multiple_rates("USD", &["EUR", "gbp", "JPY"]).await;

    assert_eq!(rates.len(), 3);
    assert_eq!(rates["EUR"].as_ref().map(|r| r.rate), Some(0.92));
    assert_eq!(rates["GBP"].as_ref().map(|r| r.rate), Some(0.79));
    assert!(rates["JPY"].is_none(), "missing from the upstream table");

    assert!(mock.matched_async().await);
}
