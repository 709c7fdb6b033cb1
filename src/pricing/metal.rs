//! Metal price API client
//!
//! Fetches spot prices per metal from a goldapi-style endpoint
//! (`GET {base}/{SYMBOL}/{CURRENCY}[/{YYYYMMDD}]`), behind the
//! `metal-price-api` circuit breaker, a 1 hour freshness cache and a
//! minimum spacing between live requests.

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::join_all;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

use super::{CacheLookup, Metal, MetalPrice, PriceCache, PriceCacheStats, PriceSource, TROY_OUNCE_IN_GRAMS};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerFactory, CircuitBreakerSettings};
use crate::config::{HttpConfig, MetalApiConfig};
use crate::http::{ApiClient, ApiClientConfig, ApiError};
use crate::metrics::MetricsState;

/// Breaker name shared by all metal price requests
pub const METAL_PRICE_BREAKER: &str = "metal-price-api";

const METRICS_CLIENT: &str = "metal";

/// Client behavior settings
#[derive(Debug, Clone)]
pub struct MetalPriceClientConfig {
    /// Quote currency
    pub currency: String,
    /// Freshness window
    pub cache_ttl: Duration,
    /// Minimum spacing between live requests, across all metals
    pub rate_limit: Duration,
    /// Breaker settings; `None` uses the factory defaults
    pub breaker: Option<CircuitBreakerSettings>,
}

impl Default for MetalPriceClientConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            cache_ttl: Duration::from_secs(3600),
            rate_limit: Duration::from_millis(1000),
            breaker: None,
        }
    }
}

/// Upstream quote shape
#[derive(Debug, Deserialize)]
struct UpstreamQuote {
    #[serde(default)]
    price: Option<f64>,
    #[serde(default, alias = "price_gram_24k")]
    price_gram: Option<f64>,
    /// "ounce"/"oz"/"troy_ounce" or "gram"/"g"; absent means per ounce
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    ch: Option<f64>,
    #[serde(default)]
    chp: Option<f64>,
}

/// Metal price API client
pub struct MetalPriceApiClient {
    api: ApiClient,
    breaker: Arc<CircuitBreaker>,
    cache: PriceCache<String, MetalPrice>,
    currency: String,
    rate_limit: Duration,
    last_request: Mutex<Option<Instant>>,
    metrics: Option<Arc<MetricsState>>,
}

impl MetalPriceApiClient {
    pub fn new(api: ApiClient, breakers: &CircuitBreakerFactory, config: MetalPriceClientConfig) -> Self {
        Self {
            api,
            breaker: breakers.get_instance(METAL_PRICE_BREAKER, config.breaker),
            cache: PriceCache::new(config.cache_ttl),
            currency: config.currency.to_ascii_uppercase(),
            rate_limit: config.rate_limit,
            last_request: Mutex::new(None),
            metrics: None,
        }
    }

    /// Build from application configuration
    pub fn from_config(
        api_config: &MetalApiConfig,
        http: &HttpConfig,
        breakers: &CircuitBreakerFactory,
    ) -> Result<Self, ApiError> {
        let api = ApiClient::new(ApiClientConfig {
            base_url: api_config.base_url.clone(),
            timeout: Duration::from_millis(api_config.timeout_ms),
            retries: http.retries,
            retry_delay: Duration::from_millis(http.retry_delay_ms),
            ..ApiClientConfig::default()
        })?;

        if let Some(ref key) = api_config.api_key {
            api.set_header("x-access-token", key.expose_secret())?;
        }

        Ok(Self::new(
            api,
            breakers,
            MetalPriceClientConfig {
                currency: api_config.currency.clone(),
                cache_ttl: Duration::from_secs(api_config.cache_ttl_secs),
                rate_limit: Duration::from_millis(api_config.rate_limit_ms),
                breaker: None,
            },
        ))
    }

    /// Attach a metrics sink
    pub fn with_metrics(mut self, metrics: Arc<MetricsState>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Current price for `metal`
    ///
    /// Returns `None` when the live fetch fails and nothing is cached.
    pub async fn get_current_price(&self, metal: Metal) -> Option<MetalPrice> {
        let key = metal.symbol().to_string();
        let path = format!("/{}/{}", metal.symbol(), self.currency);
        self.cached_fetch(metal, key, path).await
    }

    /// Price for `metal` on a past date (best effort)
    pub async fn get_historical_price(&self, metal: Metal, date: NaiveDate) -> Option<MetalPrice> {
        let stamp = date.format("%Y%m%d").to_string();
        let key = format!("{}:{}", metal.symbol(), stamp);
        let path = format!("/{}/{}/{}", metal.symbol(), self.currency, stamp);
        self.cached_fetch(metal, key, path).await
    }

    /// Current price, falling back to the hardcoded default table
    ///
    /// The default table is quoted in USD and is not converted: a fallback
    /// price always reports `currency == "USD"` and [`PriceSource::Default`],
    /// whatever currency this client is configured for. Callers needing
    /// another currency convert through the exchange client.
    pub async fn get_price_or_default(&self, metal: Metal) -> MetalPrice {
        match self.get_current_price(metal).await {
            Some(price) => price,
            None => {
                tracing::warn!(metal = %metal, "No live or cached price, using default");
                self.record("default");
                MetalPrice::from_ounce(metal, "USD", metal.default_price_per_ounce(), PriceSource::Default)
            }
        }
    }

    /// Prices for several metals; each lookup succeeds or fails independently
    pub async fn get_multiple_prices(&self, metals: &[Metal]) -> HashMap<Metal, Option<MetalPrice>> {
        let lookups = metals.iter().map(|metal| async move {
            (*metal, self.get_current_price(*metal).await)
        });
        join_all(lookups).await.into_iter().collect()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> PriceCacheStats {
        self.cache.stats()
    }

    pub fn prune_expired(&self) -> usize {
        self.cache.prune_expired()
    }

    async fn cached_fetch(&self, metal: Metal, key: String, path: String) -> Option<MetalPrice> {
        if let CacheLookup::Fresh(price) = self.cache.lookup(&key) {
            tracing::debug!(metal = %metal, key = %key, "Metal price cache hit");
            self.record("fresh");
            return Some(price.with_source(PriceSource::Cached));
        }

        let result = self
            .breaker
            .execute(|| self.fetch(metal, &path))
            .await;

        match result {
            Ok(price) => {
                self.cache.insert(key, price.clone());
                self.record("live");
                Some(price)
            }
            Err(e) => {
                let stale = self.cache.get_including_expired(&key);
                tracing::warn!(
                    metal = %metal,
                    key = %key,
                    error = %e,
                    stale_fallback = stale.is_some(),
                    "Metal price fetch failed"
                );
                match stale {
                    Some(price) => {
                        self.record("stale");
                        Some(price.with_source(PriceSource::Stale))
                    }
                    None => {
                        self.record("miss");
                        None
                    }
                }
            }
        }
    }

    async fn fetch(&self, metal: Metal, path: &str) -> Result<MetalPrice, ApiError> {
        self.throttle().await;
        let response = self.api.get::<UpstreamQuote>(path).await?;
        normalize_quote(metal, &self.currency, response.data)
    }

    /// Enforce `rate_limit` spacing between live requests
    async fn throttle(&self) {
        if self.rate_limit.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let next_allowed = previous + self.rate_limit;
            if Instant::now() < next_allowed {
                tracing::debug!(
                    wait_ms = (next_allowed - Instant::now()).as_millis() as u64,
                    "Throttling metal price request"
                );
                sleep_until(next_allowed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn record(&self, result: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_price_lookup(METRICS_CLIENT, result);
        }
    }
}

/// Reconcile an upstream quote into per-ounce and per-gram prices
fn normalize_quote(metal: Metal, currency: &str, quote: UpstreamQuote) -> Result<MetalPrice, ApiError> {
    let (per_ounce, per_gram) = match (quote.price, quote.price_gram) {
        (Some(price), _) => match quote.unit.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("oz") | Some("ozt") | Some("ounce") | Some("troy_ounce") | Some("toz") => {
                (price, price / TROY_OUNCE_IN_GRAMS)
            }
            Some("g") | Some("gram") | Some("grams") => (price * TROY_OUNCE_IN_GRAMS, price),
            Some(other) => {
                return Err(ApiError::Decode {
                    message: format!("Unsupported price unit '{}' for {}", other, metal),
                })
            }
        },
        (None, Some(gram)) => (gram * TROY_OUNCE_IN_GRAMS, gram),
        (None, None) => {
            return Err(ApiError::Decode {
                message: format!("Quote for {} has no price", metal),
            })
        }
    };

    if !per_ounce.is_finite() || per_ounce <= 0.0 {
        return Err(ApiError::Decode {
            message: format!("Invalid price {} for {}", per_ounce, metal),
        });
    }

    let timestamp = quote
        .timestamp
        .and_then(|ts| {
            // Some providers report milliseconds
            if ts > 100_000_000_000 {
                DateTime::from_timestamp_millis(ts)
            } else {
                DateTime::from_timestamp(ts, 0)
            }
        })
        .unwrap_or_else(Utc::now);

    Ok(MetalPrice {
        metal,
        currency: quote
            .currency
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|| currency.to_string()),
        price_per_ounce: per_ounce,
        price_per_gram: per_gram,
        change: quote.ch,
        change_percent: quote.chp,
        timestamp,
        source: PriceSource::Live,
    })
}
