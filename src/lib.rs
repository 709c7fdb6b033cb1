//! Jewelbox Core Library
//!
//! Resilient price acquisition and in-process service runtime for the
//! Jewelbox retail application: circuit-breaker-guarded metal and exchange
//! rate clients with stale-cache fallback, a dependency injection container
//! and a domain event bus.

pub mod circuit_breaker;
pub mod config;
pub mod container;
pub mod di;
pub mod error;
pub mod events;
pub mod http;
pub mod metrics;
pub mod pricing;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerFactory, CircuitBreakerSettings, CircuitBreakerStats,
    CircuitState,
};
pub use config::AppConfig;
pub use container::{tokens, ServiceContainer};
pub use di::{DiContainer, DiError, Injectable, Lifecycle, ServiceDescriptor, Token};
pub use error::{AppError, AppResult};
pub use events::{handler_fn, DomainEvent, EventBus, EventBusConfig, EventBusError, EventHandler, Subscription};
pub use http::{ApiClient, ApiClientConfig, ApiError, ApiResponse};
pub use metrics::MetricsState;
pub use pricing::{
    Conversion, ExchangeRate, ExchangeRateApiClient, Metal, MetalPrice, MetalPriceApiClient, PriceSource,
    PricingService,
};
