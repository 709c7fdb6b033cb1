//! Exchange rate API client
//!
//! Reads `GET {base}/latest/{FROM}` (and `history/{FROM}/{Y}/{M}/{D}`) from
//! an exchangerate-api style endpoint. One response carries every rate for
//! the base currency, so all of them are cached at once.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use futures_util::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{CacheLookup, Conversion, ExchangeRate, PriceCache, PriceCacheStats, PriceSource};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerFactory, CircuitBreakerSettings};
use crate::config::{ExchangeApiConfig, HttpConfig};
use crate::http::{ApiClient, ApiClientConfig, ApiError};
use crate::metrics::MetricsState;

/// Breaker name shared by all exchange rate requests
pub const EXCHANGE_RATE_BREAKER: &str = "exchange-rate-api";

const METRICS_CLIENT: &str = "exchange";

/// Client behavior settings
#[derive(Debug, Clone)]
pub struct ExchangeRateClientConfig {
    /// Freshness window
    pub cache_ttl: Duration,
    /// Breaker settings; `None` uses the factory defaults
    pub breaker: Option<CircuitBreakerSettings>,
}

impl Default for ExchangeRateClientConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            breaker: None,
        }
    }
}

/// Upstream rate table
#[derive(Debug, Deserialize)]
struct UpstreamRates {
    #[serde(default)]
    result: Option<String>,
    #[serde(rename = "error-type", default)]
    error_type: Option<String>,
    #[serde(default, alias = "rates")]
    conversion_rates: HashMap<String, f64>,
    #[serde(default)]
    time_last_update_unix: Option<i64>,
}

/// Exchange rate API client
pub struct ExchangeRateApiClient {
    api: ApiClient,
    breaker: Arc<CircuitBreaker>,
    cache: PriceCache<String, ExchangeRate>,
    metrics: Option<Arc<MetricsState>>,
}

impl ExchangeRateApiClient {
    pub fn new(api: ApiClient, breakers: &CircuitBreakerFactory, config: ExchangeRateClientConfig) -> Self {
        Self {
            api,
            breaker: breakers.get_instance(EXCHANGE_RATE_BREAKER, config.breaker),
            cache: PriceCache::new(config.cache_ttl),
            metrics: None,
        }
    }

    /// Build from application configuration
    pub fn from_config(
        api_config: &ExchangeApiConfig,
        http: &HttpConfig,
        breakers: &CircuitBreakerFactory,
    ) -> Result<Self, ApiError> {
        let api = ApiClient::new(ApiClientConfig {
            base_url: api_config.keyed_base_url(),
            timeout: Duration::from_millis(api_config.timeout_ms),
            retries: http.retries,
            retry_delay: Duration::from_millis(http.retry_delay_ms),
            ..ApiClientConfig::default()
        })?;

        Ok(Self::new(
            api,
            breakers,
            ExchangeRateClientConfig {
                cache_ttl: Duration::from_secs(api_config.cache_ttl_secs),
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

    /// Current rate for `from -> to`
    ///
    /// Invalid currency codes yield `None` without a network call; equal
    /// currencies yield a rate of 1.0.
    pub async fn get_exchange_rate(&self, from: &str, to: &str) -> Option<ExchangeRate> {
        let (from, to) = (normalize_code(from)?, normalize_code(to)?);
        if from == to {
            return Some(identity_rate(from));
        }

        let key = pair_key(&from, &to, None);
        let path = format!("/latest/{}", from);
        self.cached_fetch(&from, &to, key, path, None).await
    }

    /// Rate for `from -> to` on a past date (best effort)
    pub async fn get_historical_rate(&self, from: &str, to: &str, date: NaiveDate) -> Option<ExchangeRate> {
        let (from, to) = (normalize_code(from)?, normalize_code(to)?);
        if from == to {
            return Some(identity_rate(from));
        }

        let key = pair_key(&from, &to, Some(date));
        let path = format!(
            "/history/{}/{}/{}/{}",
            from,
            date.year(),
            date.month(),
            date.day()
        );
        self.cached_fetch(&from, &to, key, path, Some(date)).await
    }

    /// Convert `amount` from one currency to another
    pub async fn convert_currency(&self, amount: f64, from: &str, to: &str) -> Option<Conversion> {
        let rate = self.get_exchange_rate(from, to).await?;
        Some(Conversion {
            converted_amount: amount * rate.rate,
            rate: rate.rate,
            source: rate.source,
        })
    }

    /// Rates from `from` to each target; lookups succeed or fail independently
    pub async fn get_multiple_rates(&self, from: &str, targets: &[&str]) -> HashMap<String, Option<ExchangeRate>> {
        let lookups = targets.iter().map(|to| async move {
            (to.to_ascii_uppercase(), self.get_exchange_rate(from, to).await)
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

    async fn cached_fetch(
        &self,
        from: &str,
        to: &str,
        key: String,
        path: String,
        date: Option<NaiveDate>,
    ) -> Option<ExchangeRate> {
        if let CacheLookup::Fresh(rate) = self.cache.lookup(&key) {
            tracing::debug!(key = %key, "Exchange rate cache hit");
            self.record("fresh");
            return Some(rate.with_source(PriceSource::Cached));
        }

        let result = self
            .breaker
            .execute(|| self.fetch_table(from, &path))
            .await;

        let error = match result {
            Ok((rates, timestamp)) => {
                for (target, rate) in &rates {
                    self.cache.insert(
                        pair_key(from, target, date),
                        ExchangeRate {
                            from: from.to_string(),
                            to: target.clone(),
                            rate: *rate,
                            timestamp,
                            source: PriceSource::Live,
                        },
                    );
                }
                match rates.get(to) {
                    Some(rate) => {
                        self.record("live");
                        return Some(ExchangeRate {
                            from: from.to_string(),
                            to: to.to_string(),
                            rate: *rate,
                            timestamp,
                            source: PriceSource::Live,
                        });
                    }
                    None => format!("No rate for {} in {} table", to, from),
                }
            }
            Err(e) => e.to_string(),
        };

        let stale = self.cache.get_including_expired(&key);
        tracing::warn!(
            key = %key,
            error = %error,
            stale_fallback = stale.is_some(),
            "Exchange rate fetch failed"
        );
        match stale {
            Some(rate) => {
                self.record("stale");
                Some(rate.with_source(PriceSource::Stale))
            }
            None => {
                self.record("miss");
                None
            }
        }
    }

    async fn fetch_table(&self, from: &str, path: &str) -> Result<(HashMap<String, f64>, DateTime<Utc>), ApiError> {
        let response = self.api.get::<UpstreamRates>(path).await?;
        let table = response.data;

        if table.result.as_deref() == Some("error") {
            return Err(ApiError::Decode {
                message: format!(
                    "Upstream rejected {} rate request: {}",
                    from,
                    table.error_type.as_deref().unwrap_or("unknown")
                ),
            });
        }

        let timestamp = table
            .time_last_update_unix
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);

        let rates = table
            .conversion_rates
            .into_iter()
            .filter(|(_, rate)| rate.is_finite() && *rate > 0.0)
            .map(|(code, rate)| (code.to_ascii_uppercase(), rate))
            .collect();

        Ok((rates, timestamp))
    }

    fn record(&self, result: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_price_lookup(METRICS_CLIENT, result);
        }
    }
}

/// Upper-case 3-letter ISO code, or `None`
fn normalize_code(code: &str) -> Option<String> {
    let code = code.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code.to_ascii_uppercase())
    } else {
        tracing::debug!(code = code, "Rejected invalid currency code");
        None
    }
}

fn pair_key(from: &str, to: &str, date: Option<NaiveDate>) -> String {
    match date {
        Some(date) => format!("{}:{}:{}", from, to, date),
        None => format!("{}:{}", from, to),
    }
}

fn identity_rate(code: String) -> ExchangeRate {
    ExchangeRate {
        from: code.clone(),
        to: code,
        rate: 1.0,
        timestamp: Utc::now(),
        source: PriceSource::Live,
    }
}
