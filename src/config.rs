//! Configuration management for Jewelbox
//!
//! Loads configuration from YAML/TOML files and environment variables.
//! Environment variables override file values.

use config::{Config, ConfigError, Environment, File};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerSettings;
use crate::events::EventBusConfig;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Shared HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
    /// Metal price API settings
    #[serde(default)]
    pub metal_api: MetalApiConfig,
    /// Exchange rate API settings
    #[serde(default)]
    pub exchange_api: ExchangeApiConfig,
    /// Default circuit breaker thresholds
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Event bus delivery policy
    #[serde(default)]
    pub event_bus: EventBusSettings,
}

/// HTTP retry policy shared by all API clients
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Additional attempts after the first failure
    #[serde(default = "default_http_retries")]
    pub retries: u32,
    /// Base delay for linear backoff in milliseconds
    #[serde(default = "default_http_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_http_retries() -> u32 {
    3
}

fn default_http_retry_delay() -> u64 {
    1000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retries: default_http_retries(),
            retry_delay_ms: default_http_retry_delay(),
        }
    }
}

/// Metal price API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetalApiConfig {
    /// Base URL of the metal price API
    #[serde(default = "default_metal_api_url")]
    pub base_url: String,
    /// API access token (sent as `x-access-token`)
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Quote currency requested upstream
    #[serde(default = "default_metal_currency")]
    pub currency: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_metal_timeout")]
    pub timeout_ms: u64,
    /// Minimum spacing between live requests in milliseconds
    #[serde(default = "default_metal_rate_limit")]
    pub rate_limit_ms: u64,
    /// Freshness window for cached prices in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_metal_api_url() -> String {
    "https://www.goldapi.io/api".to_string()
}

fn default_metal_currency() -> String {
    "USD".to_string()
}

fn default_metal_timeout() -> u64 {
    10000
}

fn default_metal_rate_limit() -> u64 {
    1000
}

fn default_cache_ttl() -> u64 {
    3600
}

impl Default for MetalApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_metal_api_url(),
            api_key: None,
            currency: default_metal_currency(),
            timeout_ms: default_metal_timeout(),
            rate_limit_ms: default_metal_rate_limit(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

/// Exchange rate API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeApiConfig {
    /// Base URL of the exchange rate API (key is appended as a path segment when set)
    #[serde(default = "default_exchange_api_url")]
    pub base_url: String,
    /// API key
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_exchange_timeout")]
    pub timeout_ms: u64,
    /// Freshness window for cached rates in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_exchange_api_url() -> String {
    "https://v6.exchangerate-api.com/v6".to_string()
}

fn default_exchange_timeout() -> u64 {
    15000
}

impl Default for ExchangeApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_exchange_api_url(),
            api_key: None,
            timeout_ms: default_exchange_timeout(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl ExchangeApiConfig {
    /// Base URL with the API key segment applied, if one is configured
    pub fn keyed_base_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.api_key {
            Some(ref key) if !key.expose_secret().is_empty() => {
                format!("{}/{}", base, key.expose_secret())
            }
            _ => base.to_string(),
        }
    }
}

/// Circuit breaker default thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cooldown before a half-open trial call, in seconds
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
    /// Rolling window for the failure rate, in seconds
    #[serde(default = "default_monitoring_period")]
    pub monitoring_period_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> u64 {
    60
}

fn default_monitoring_period() -> u64 {
    300
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout(),
            monitoring_period_secs: default_monitoring_period(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Convert into breaker settings
    pub fn settings(&self) -> CircuitBreakerSettings {
        CircuitBreakerSettings {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_secs),
            monitoring_period: Duration::from_secs(self.monitoring_period_secs),
        }
    }
}

/// Event bus delivery policy
#[derive(Debug, Clone, Deserialize)]
pub struct EventBusSettings {
    /// Redelivery attempts before an event is dropped
    #[serde(default = "default_event_max_retries")]
    pub max_retries: u32,
    /// Base redelivery delay in milliseconds
    #[serde(default = "default_event_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_event_max_retries() -> u32 {
    3
}

fn default_event_retry_delay() -> u64 {
    1000
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            max_retries: default_event_max_retries(),
            retry_delay_ms: default_event_retry_delay(),
        }
    }
}

impl EventBusSettings {
    pub fn bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            metal_api: MetalApiConfig::default(),
            exchange_api: ExchangeApiConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            event_bus: EventBusSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (JEWELBOX_*)
    /// 2. config/config.{yaml,toml} (if exists)
    /// 3. config.{yaml,toml} (if exists)
    /// 4. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("http.retries", default_http_retries())?
            .set_default("http.retry_delay_ms", default_http_retry_delay())?
            .set_default("metal_api.base_url", default_metal_api_url())?
            .set_default("metal_api.currency", default_metal_currency())?
            .set_default("metal_api.rate_limit_ms", default_metal_rate_limit())?
            .set_default("exchange_api.base_url", default_exchange_api_url())?
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name("config/config").required(false))
            // JEWELBOX_METAL_API__API_KEY=... -> metal_api.api_key
            .add_source(
                Environment::with_prefix("JEWELBOX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metal_api.base_url.is_empty() {
            return Err(ConfigError::Message(
                "Metal API base URL must be set".to_string(),
            ));
        }

        if self.exchange_api.base_url.is_empty() {
            return Err(ConfigError::Message(
                "Exchange API base URL must be set".to_string(),
            ));
        }

        if self.metal_api.currency.len() != 3 {
            return Err(ConfigError::Message(
                "Metal API currency must be a 3-letter ISO code".to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "Circuit breaker failure_threshold must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
