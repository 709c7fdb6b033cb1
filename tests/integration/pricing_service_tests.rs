//! Pricing Service Integration Tests
//!
//! Drives the pricing facade over mocked metal and exchange upstreams.

use jewelbox_core::circuit_breaker::CircuitBreakerFactory;
use jewelbox_core::events::{event_types, handler_fn, EventBus, EventBusConfig};
use jewelbox_core::http::{ApiClient, ApiClientConfig};
use jewelbox_core::pricing::{
    ExchangeRateApiClient, ExchangeRateClientConfig, MetalPriceApiClient, MetalPriceClientConfig, PriceSource,
    PricingService,
};
use jewelbox_core::AppError;
use mockito::{Server, ServerGuard};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn api(base_url: &str) -> ApiClient {
    ApiClient::new(ApiClientConfig {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(2),
        retries: 0,
        ..ApiClientConfig::default()
    })
    .expect("client should build")
}

async fn upstream() -> ServerGuard {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/XAU/USD")
        .with_status(200)
        .with_body(r#"{"price_gram": 100.0, "currency": "USD"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/latest/USD")
        .with_status(200)
        .with_body(r#"{"result": "success", "conversion_rates": {"EUR": 0.92, "GBP": 0.79}}"#)
        .create_async()
        .await;
    server
}

fn service(base_url: &str) -> PricingService {
    let breakers = CircuitBreakerFactory::new();
    let metals = MetalPriceApiClient::new(
        api(base_url),
        &breakers,
        MetalPriceClientConfig {
            rate_limit: Duration::ZERO,
            ..MetalPriceClientConfig::default()
        },
    );
    let exchange = ExchangeRateApiClient::new(api(base_url), &breakers, ExchangeRateClientConfig::default());
    PricingService::new(Arc::new(metals), Arc::new(exchange))
}

#[tokio::test]
async fn test_metal_price_accepts_names_and_symbols() {
    let server = upstream().await;
    let pricing = service(&server.url());

    let by_name = pricing.get_metal_price("Gold").await.expect("price by name");
    assert_eq!(by_name.source, PriceSource::Live);

    let by_symbol = pricing.get_metal_price("xau").await.expect("price by symbol");
    assert_eq!(by_symbol.source, PriceSource::Cached);
    assert_eq!(by_symbol.price_per_gram, 100.0);

    assert!(pricing.get_metal_price("unobtainium").await.is_none());
}

#[tokio::test]
async fn test_metal_price_in_other_currency() {
    let server = upstream().await;
    let pricing = service(&server.url());

    let eur = pricing.get_metal_price_in("gold", "eur").await.expect("EUR price");
    assert_eq!(eur.currency, "EUR");
    assert!((eur.price_per_gram - 92.0).abs() < 1e-9);

    let usd = pricing.get_metal_price_in("gold", "USD").await.expect("USD price");
    assert_eq!(usd.currency, "USD");
    assert_eq!(usd.price_per_gram, 100.0);
}

#[tokio::test]
async fn test_calculate_metal_value() {
    let server = upstream().await;
    let pricing = service(&server.url());

    let value = pricing
        .calculate_metal_value("gold", Decimal::from(10), Decimal::from_str("0.75").unwrap())
        .await
        .unwrap();
    assert_eq!(value, Some(Decimal::from_str("750.00").unwrap()));

    let err = pricing
        .calculate_metal_value("gold", Decimal::from(-1), Decimal::ONE)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = pricing
        .calculate_metal_value("gold", Decimal::ONE, Decimal::from(2))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert!(pricing
        .calculate_metal_value("tin", Decimal::ONE, Decimal::ONE)
        .await
        .is_err());
}

#[tokio::test]
async fn test_calculate_metal_value_rejects_overflowing_weight() {
    let server = upstream().await;
    let pricing = service(&server.url());

    let err = pricing
        .calculate_metal_value("gold", Decimal::MAX, Decimal::ONE)
        .await
        .unwrap_err();
    match err {
        AppError::Validation(message) => assert!(message.contains("too large"), "{}", message),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_live_quotes_announce_price_updates() {
    let server = upstream().await;
    let bus = EventBus::new(EventBusConfig {
        max_retries: 0,
        retry_delay: Duration::from_millis(10),
    });
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    bus.subscribe(
        event_types::PRICE_UPDATED,
        handler_fn(move |event| {
            let counter = counter.clone();
            async move {
                assert_eq!(event.aggregate_id(), "gold");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );

    let pricing = service(&server.url()).with_events(bus.clone());
    pricing.get_metal_price("gold").await.expect("live price");
    pricing.get_metal_price("gold").await.expect("cached price");

    tokio::time::timeout(Duration::from_secs(5), bus.wait_until_idle())
        .await
        .expect("bus should drain");
    assert_eq!(seen.load(Ordering::SeqCst), 1, "only live quotes are announced");
}
