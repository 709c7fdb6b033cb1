//! Jewelbox Core - pricing and service runtime
//!
//! Boots the service container, reports current metal prices and a sample
//! currency conversion, publishes a startup event and shuts down cleanly.

use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jewelbox_core::events::event_types;
use jewelbox_core::{AppConfig, DomainEvent, ServiceContainer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Jewelbox Core v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    tracing::info!(
        metal_api = %config.metal_api.base_url,
        exchange_api = %config.exchange_api.base_url,
        currency = %config.metal_api.currency,
        "Configuration loaded"
    );

    let services = ServiceContainer::init(&config)?;
    let pricing = services.pricing()?;

    for price in pricing.get_all_metal_prices().await {
        tracing::info!(
            metal = %price.metal,
            currency = %price.currency,
            per_ounce = price.price_per_ounce,
            per_gram = price.price_per_gram,
            source = %price.source,
            "Metal price"
        );
    }

    match pricing.convert_currency(100.0, "USD", "EUR").await {
        Some(conversion) => tracing::info!(
            amount = 100.0,
            converted = conversion.converted_amount,
            rate = conversion.rate,
            source = %conversion.source,
            "USD -> EUR"
        ),
        None => tracing::warn!("No USD -> EUR rate available"),
    }

    for (name, stats) in services.breakers()?.get_all_stats() {
        tracing::info!(
            breaker = %name,
            state = %stats.state,
            failures = stats.failure_count,
            requests = stats.total_requests,
            "Circuit breaker status"
        );
    }

    services.event_bus()?.publish(DomainEvent::new(
        event_types::SYSTEM_STARTED,
        "jewelbox-core",
        1,
        json!({ "version": env!("CARGO_PKG_VERSION") }),
    ));

    services.dispose().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jewelbox_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Load and validate configuration
fn load_config() -> anyhow::Result<AppConfig> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

    Ok(config)
}
