//! Precious-metal and currency pricing
//!
//! Both clients follow the same lookup order:
//! 1. Fresh cache entry (no network, no breaker interaction)
//! 2. Live fetch through a dedicated named circuit breaker
//! 3. Stale cache entry when the live fetch fails or is short-circuited
//! 4. `None` (or, for metals, an optional hardcoded default)

pub mod cache;
pub mod exchange;
pub mod metal;
pub mod service;

pub use cache::{CacheLookup, PriceCache, PriceCacheStats};
pub use exchange::{ExchangeRateApiClient, ExchangeRateClientConfig};
pub use metal::{MetalPriceApiClient, MetalPriceClientConfig};
pub use service::{karat_to_purity, PricingService};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Grams per troy ounce
pub const TROY_OUNCE_IN_GRAMS: f64 = 31.1035;

/// Precious metals quoted by the metal price API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metal {
    Gold,
    Silver,
    Platinum,
    Palladium,
}

impl Metal {
    pub const ALL: [Metal; 4] = [Metal::Gold, Metal::Silver, Metal::Platinum, Metal::Palladium];

    /// ISO 4217 symbol used upstream
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gold => "XAU",
            Self::Silver => "XAG",
            Self::Platinum => "XPT",
            Self::Palladium => "XPD",
        }
    }

    /// Fallback USD price per troy ounce when no live or cached price exists
    pub fn default_price_per_ounce(&self) -> f64 {
        match self {
            Self::Gold => 2000.0,
            Self::Silver => 25.0,
            Self::Platinum => 950.0,
            Self::Palladium => 1000.0,
        }
    }
}

impl fmt::Display for Metal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gold => write!(f, "gold"),
            Self::Silver => write!(f, "silver"),
            Self::Platinum => write!(f, "platinum"),
            Self::Palladium => write!(f, "palladium"),
        }
    }
}

impl FromStr for Metal {
    type Err = String;

    /// Accepts names ("Gold") or symbols ("XAU"), case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gold" | "xau" => Ok(Self::Gold),
            "silver" | "xag" => Ok(Self::Silver),
            "platinum" | "xpt" => Ok(Self::Platinum),
            "palladium" | "xpd" => Ok(Self::Palladium),
            other => Err(format!("Unknown metal: {}", other)),
        }
    }
}

/// Where a returned price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    /// Fetched from the upstream API by this call
    Live,
    /// Fresh cache hit
    Cached,
    /// Expired cache entry served after a failed refresh
    Stale,
    /// Hardcoded default table
    Default,
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Cached => write!(f, "cached"),
            Self::Stale => write!(f, "stale"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Normalized metal price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetalPrice {
    pub metal: Metal,
    pub currency: String,
    pub price_per_ounce: f64,
    pub price_per_gram: f64,
    /// Absolute change since previous close, if reported
    pub change: Option<f64>,
    /// Percent change since previous close, if reported
    pub change_percent: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub source: PriceSource,
}

impl MetalPrice {
    /// Build from a per-ounce price
    pub fn from_ounce(metal: Metal, currency: &str, price_per_ounce: f64, source: PriceSource) -> Self {
        Self {
            metal,
            currency: currency.to_string(),
            price_per_ounce,
            price_per_gram: price_per_ounce / TROY_OUNCE_IN_GRAMS,
            change: None,
            change_percent: None,
            timestamp: Utc::now(),
            source,
        }
    }

    /// Build from a per-gram price
    pub fn from_gram(metal: Metal, currency: &str, price_per_gram: f64, source: PriceSource) -> Self {
        Self {
            price_per_gram,
            price_per_ounce: price_per_gram * TROY_OUNCE_IN_GRAMS,
            ..Self::from_ounce(metal, currency, 0.0, source)
        }
    }

    pub(crate) fn with_source(mut self, source: PriceSource) -> Self {
        self.source = source;
        self
    }
}

/// Normalized exchange rate (`1 from = rate to`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub from: String,
    pub to: String,
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
    pub source: PriceSource,
}

impl ExchangeRate {
    pub(crate) fn with_source(mut self, source: PriceSource) -> Self {
        self.source = source;
        self
    }
}

/// Result of a currency conversion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversion {
    pub converted_amount: f64,
    pub rate: f64,
    pub source: PriceSource,
}
