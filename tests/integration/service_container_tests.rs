//! Service Container Integration Tests
//!
//! Boots the composition root against a mock upstream and checks wiring,
//! shared instances, audit subscriptions and shutdown.

use jewelbox_core::events::{event_types, handler_fn};
use jewelbox_core::pricing::PriceSource;
use jewelbox_core::{tokens, AppConfig, AppError, DiError, DomainEvent, EventBus, ServiceContainer};
use mockito::Server;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config_for(base_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.http.retries = 0;
    config.metal_api.base_url = base_url.to_string();
    config.metal_api.rate_limit_ms = 0;
    config.exchange_api.base_url = base_url.to_string();
    config.event_bus.retry_delay_ms = 10;
    config
}

#[tokio::test]
async fn test_init_wires_shared_services() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/XAU/USD")
        .with_status(200)
        .with_body(r#"{"price": 2400.0}"#)
        .create_async()
        .await;

    let services = ServiceContainer::init(&config_for(&server.url())).expect("container should init");

    let pricing = services.pricing().unwrap();
    assert!(Arc::ptr_eq(&pricing, &services.pricing().unwrap()));
    assert!(Arc::ptr_eq(pricing.metal_client(), &services.metal_client().unwrap()));
    assert!(Arc::ptr_eq(pricing.exchange_client(), &services.exchange_client().unwrap()));

    let price = pricing.get_metal_price("gold").await.expect("price");
    assert_eq!(price.source, PriceSource::Live);
    assert_eq!(price.price_per_ounce, 2400.0);

    let stats = services.breakers().unwrap().get_all_stats();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats["metal-price-api"].total_requests, 1);

    let metrics = services.metrics().unwrap().render();
    assert!(metrics.contains("jewelbox_price_cache_lookups_total"));

    services.dispose().await;
}

#[tokio::test]
async fn test_audit_log_subscribes_to_every_event_type() {
    let services = ServiceContainer::init(&config_for("http://127.0.0.1:9")).unwrap();
    let bus = services.event_bus().unwrap();

    let stats = bus.get_stats();
    assert_eq!(stats.total_subscriptions, event_types::ALL.len());
    assert_eq!(stats.subscriptions.get(event_types::RECEIPT_CREATED), Some(&1));

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    bus.subscribe(
        event_types::QUOTATION_CREATED,
        handler_fn(move |_event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );

    let delivered = bus
        .publish_sync(&DomainEvent::new(event_types::QUOTATION_CREATED, "q-1", 1, json!({})))
        .await
        .unwrap();
    assert_eq!(delivered, 2, "audit log plus the test handler");
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    services.dispose().await;
}

#[tokio::test]
async fn test_dispose_drains_queue_and_tears_down() {
    let services = ServiceContainer::init(&config_for("http://127.0.0.1:9")).unwrap();
    let bus = services.event_bus().unwrap();
    let di = services.di().clone();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    bus.subscribe(
        event_types::SYSTEM_STARTED,
        handler_fn(move |_event| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );
    bus.publish(DomainEvent::new(event_types::SYSTEM_STARTED, "core", 1, json!({})));

    services.dispose().await;

    assert_eq!(seen.load(Ordering::SeqCst), 1, "queued event delivered before shutdown");
    assert!(di.is_disposed());
    assert!(matches!(
        di.resolve::<EventBus>(&tokens::EVENT_BUS),
        Err(DiError::Disposed)
    ));
}

#[test]
fn test_init_rejects_invalid_config() {
    let mut config = AppConfig::default();
    config.metal_api.currency = "DOLLARS".to_string();

    let err = ServiceContainer::init(&config).err().expect("invalid config");
    assert!(matches!(err, AppError::Config(_)));
}
