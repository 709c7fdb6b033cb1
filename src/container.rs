//! Composition root
//!
//! Builds the process-wide services from [`AppConfig`] and registers them
//! in a [`DiContainer`] under the tokens in [`tokens`]. Each
//! [`ServiceContainer`] is independent, so tests can run several side by
//! side.

use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerFactory;
use crate::config::AppConfig;
use crate::di::{DiContainer, Lifecycle, ServiceDescriptor};
use crate::error::AppResult;
use crate::events::{event_types, DomainEvent, EventBus, EventHandler, Subscription};
use crate::metrics::MetricsState;
use crate::pricing::{ExchangeRateApiClient, MetalPriceApiClient, PricingService};

/// How long `dispose` waits for queued events to drain
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry tokens for the core services
pub mod tokens {
    use crate::di::Token;

    pub const CONFIG: Token = Token::from_static("AppConfig");
    pub const METRICS: Token = Token::from_static("MetricsState");
    pub const CIRCUIT_BREAKER_FACTORY: Token = Token::from_static("CircuitBreakerFactory");
    pub const METAL_PRICE_CLIENT: Token = Token::from_static("MetalPriceApiClient");
    pub const EXCHANGE_RATE_CLIENT: Token = Token::from_static("ExchangeRateApiClient");
    pub const PRICING_SERVICE: Token = Token::from_static("PricingService");
    pub const EVENT_BUS: Token = Token::from_static("EventBus");
}

/// Logs every domain event it receives
pub struct AuditLogHandler;

#[async_trait::async_trait]
impl EventHandler for AuditLogHandler {
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        tracing::info!(
            event_id = %event.id(),
            event_type = event.event_type(),
            aggregate_id = event.aggregate_id(),
            version = event.version(),
            occurred_at = %event.occurred_at(),
            "Domain event"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "audit-log"
    }
}

/// Wired application services
pub struct ServiceContainer {
    di: DiContainer,
    audit_subscriptions: Vec<Subscription>,
}

impl ServiceContainer {
    /// Validate `config`, register all services and subscribe the audit log
    pub fn init(config: &AppConfig) -> AppResult<Self> {
        config.validate()?;

        let di = DiContainer::new();
        di.register_instance(tokens::CONFIG, Arc::new(config.clone()));
        di.register_singleton(tokens::METRICS, |_| Ok(MetricsState::new()));

        di.register_singleton(tokens::CIRCUIT_BREAKER_FACTORY, |r| {
            let config = r.resolve::<AppConfig>(&tokens::CONFIG)?;
            let metrics = r.resolve::<MetricsState>(&tokens::METRICS)?;
            Ok(CircuitBreakerFactory::with_defaults(config.circuit_breaker.settings()).with_metrics(metrics))
        });

        di.register_singleton(tokens::METAL_PRICE_CLIENT, |r| {
            let config = r.resolve::<AppConfig>(&tokens::CONFIG)?;
            let breakers = r.resolve::<CircuitBreakerFactory>(&tokens::CIRCUIT_BREAKER_FACTORY)?;
            let metrics = r.resolve::<MetricsState>(&tokens::METRICS)?;
            let client = MetalPriceApiClient::from_config(&config.metal_api, &config.http, &breakers)?;
            Ok(client.with_metrics(metrics))
        });

        di.register_singleton(tokens::EXCHANGE_RATE_CLIENT, |r| {
            let config = r.resolve::<AppConfig>(&tokens::CONFIG)?;
            let breakers = r.resolve::<CircuitBreakerFactory>(&tokens::CIRCUIT_BREAKER_FACTORY)?;
            let metrics = r.resolve::<MetricsState>(&tokens::METRICS)?;
            let client = ExchangeRateApiClient::from_config(&config.exchange_api, &config.http, &breakers)?;
            Ok(client.with_metrics(metrics))
        });

        di.register(
            ServiceDescriptor::singleton(tokens::EVENT_BUS, |r| {
                let config = r.resolve::<AppConfig>(&tokens::CONFIG)?;
                let metrics = r.resolve::<MetricsState>(&tokens::METRICS)?;
                Ok(EventBus::new(config.event_bus.bus_config())
                    .with_metrics(metrics)
                    .with_error_handler(|error, event| {
                        tracing::error!(
                            event_id = %event.id(),
                            event_type = event.event_type(),
                            error = %error,
                            "Event dropped after exhausting retries"
                        );
                    }))
            })
            .with_disposer(|bus: &EventBus| bus.clear()),
        );

        di.register(ServiceDescriptor::constructor(
            tokens::PRICING_SERVICE,
            Lifecycle::Singleton,
            vec![
                tokens::METAL_PRICE_CLIENT,
                tokens::EXCHANGE_RATE_CLIENT,
                tokens::EVENT_BUS,
            ],
            |deps| {
                let bus = deps.get::<EventBus>(2)?;
                Ok(PricingService::new(deps.get(0)?, deps.get(1)?).with_events(EventBus::clone(&bus)))
            },
        ));

        let bus = di.resolve::<EventBus>(&tokens::EVENT_BUS)?;
        let audit: Arc<dyn EventHandler> = Arc::new(AuditLogHandler);
        let audit_subscriptions = event_types::ALL
            .iter()
            .map(|event_type| bus.subscribe(event_type, audit.clone()))
            .collect();

        tracing::info!(services = di.len(), "Service container initialized");
        Ok(Self {
            di,
            audit_subscriptions,
        })
    }

    pub fn di(&self) -> &DiContainer {
        &self.di
    }

    pub fn pricing(&self) -> AppResult<Arc<PricingService>> {
        Ok(self.di.resolve(&tokens::PRICING_SERVICE)?)
    }

    pub fn event_bus(&self) -> AppResult<Arc<EventBus>> {
        Ok(self.di.resolve(&tokens::EVENT_BUS)?)
    }

    pub fn breakers(&self) -> AppResult<Arc<CircuitBreakerFactory>> {
        Ok(self.di.resolve(&tokens::CIRCUIT_BREAKER_FACTORY)?)
    }

    pub fn metal_client(&self) -> AppResult<Arc<MetalPriceApiClient>> {
        Ok(self.di.resolve(&tokens::METAL_PRICE_CLIENT)?)
    }

    pub fn exchange_client(&self) -> AppResult<Arc<ExchangeRateApiClient>> {
        Ok(self.di.resolve(&tokens::EXCHANGE_RATE_CLIENT)?)
    }

    pub fn metrics(&self) -> AppResult<Arc<MetricsState>> {
        Ok(self.di.resolve(&tokens::METRICS)?)
    }

    /// Flush queued events, then tear down every service
    pub async fn dispose(self) {
        if let Ok(bus) = self.di.resolve::<EventBus>(&tokens::EVENT_BUS) {
            if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, bus.wait_until_idle())
                .await
                .is_err()
            {
                tracing::warn!(
                    queue_depth = bus.get_stats().queue_depth,
                    "Event queue did not drain before shutdown"
                );
            }
        }

        for subscription in &self.audit_subscriptions {
            subscription.unsubscribe();
        }
        self.di.dispose();
    }
}
