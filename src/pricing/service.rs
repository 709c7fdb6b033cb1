//! Pricing service used by the business layer
//!
//! Thin facade over the metal and exchange clients: accepts metal names as
//! entered by users, converts quotes into other currencies and values metal
//! by weight and purity.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use std::sync::Arc;

use super::{Conversion, ExchangeRateApiClient, Metal, MetalPrice, MetalPriceApiClient, PriceSource};
use crate::error::{AppError, AppResult};
use crate::events::{event_types, DomainEvent, EventBus};

/// Pricing service
pub struct PricingService {
    metals: Arc<MetalPriceApiClient>,
    exchange: Arc<ExchangeRateApiClient>,
    events: Option<EventBus>,
}

impl PricingService {
    pub fn new(metals: Arc<MetalPriceApiClient>, exchange: Arc<ExchangeRateApiClient>) -> Self {
        Self {
            metals,
            exchange,
            events: None,
        }
    }

    /// Publish `price.updated` whenever a live quote is fetched
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn metal_client(&self) -> &Arc<MetalPriceApiClient> {
        &self.metals
    }

    pub fn exchange_client(&self) -> &Arc<ExchangeRateApiClient> {
        &self.exchange
    }

    /// Current price for a metal name or symbol; `None` if unknown or unavailable
    pub async fn get_metal_price(&self, metal: &str) -> Option<MetalPrice> {
        let metal = match metal.parse::<Metal>() {
            Ok(metal) => metal,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring price request");
                return None;
            }
        };

        let price = self.metals.get_current_price(metal).await?;
        if price.source == PriceSource::Live {
            self.announce(&price);
        }
        Some(price)
    }

    /// Current price converted into `currency`
    ///
    /// The result is marked stale if either the quote or the rate was stale.
    pub async fn get_metal_price_in(&self, metal: &str, currency: &str) -> Option<MetalPrice> {
        let price = self.get_metal_price(metal).await?;
        if price.currency.eq_ignore_ascii_case(currency) {
            return Some(price);
        }

        let rate = self.exchange.get_exchange_rate(&price.currency, currency).await?;
        let stale = price.source == PriceSource::Stale || rate.source == PriceSource::Stale;

        Some(MetalPrice {
            currency: rate.to.clone(),
            price_per_ounce: price.price_per_ounce * rate.rate,
            price_per_gram: price.price_per_gram * rate.rate,
            change: price.change.map(|c| c * rate.rate),
            source: if stale { PriceSource::Stale } else { price.source },
            ..price
        })
    }

    /// Value of `weight_grams` of metal at `purity` (0-1), rounded to cents
    ///
    /// `Ok(None)` means no price is available right now.
    pub async fn calculate_metal_value(
        &self,
        metal: &str,
        weight_grams: Decimal,
        purity: Decimal,
    ) -> AppResult<Option<Decimal>> {
        metal
            .parse::<Metal>()
            .map_err(AppError::Validation)?;
        if weight_grams.is_sign_negative() {
            return Err(AppError::Validation(format!(
                "Weight must not be negative: {}",
                weight_grams
            )));
        }
        if purity.is_sign_negative() || purity > Decimal::ONE {
            return Err(AppError::Validation(format!(
                "Purity must be between 0 and 1: {}",
                purity
            )));
        }

        let Some(price) = self.get_metal_price(metal).await else {
            return Ok(None);
        };
        let per_gram = Decimal::from_f64(price.price_per_gram).ok_or_else(|| {
            AppError::Internal(format!("Unrepresentable price: {}", price.price_per_gram))
        })?;

        let value = weight_grams
            .checked_mul(purity)
            .and_then(|fine_grams| fine_grams.checked_mul(per_gram))
            .ok_or_else(|| AppError::Validation(format!("Weight too large: {}", weight_grams)))?;
        Ok(Some(value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)))
    }

    pub async fn convert_currency(&self, amount: f64, from: &str, to: &str) -> Option<Conversion> {
        self.exchange.convert_currency(amount, from, to).await
    }

    /// Prices for every known metal, falling back to the default table
    pub async fn get_all_metal_prices(&self) -> Vec<MetalPrice> {
        let mut prices = Vec::with_capacity(Metal::ALL.len());
        for metal in Metal::ALL {
            prices.push(self.metals.get_price_or_default(metal).await);
        }
        prices
    }

    fn announce(&self, price: &MetalPrice) {
        if let Some(ref bus) = self.events {
            bus.publish(DomainEvent::new(
                event_types::PRICE_UPDATED,
                price.metal.to_string(),
                1,
                json!({
                    "currency": price.currency,
                    "pricePerOunce": price.price_per_ounce,
                    "pricePerGram": price.price_per_gram,
                }),
            ));
        }
    }
}

/// Fineness of a karat grade (24k = 1.0)
pub fn karat_to_purity(karat: u8) -> AppResult<Decimal> {
    if karat == 0 || karat > 24 {
        return Err(AppError::Validation(format!(
            "Karat must be between 1 and 24: {}",
            karat
        )));
    }
    Ok((Decimal::from(karat) / Decimal::from(24u8)).round_dp(4))
}
