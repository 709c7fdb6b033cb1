//! Named circuit breaker registry
//!
//! One breaker per name, created lazily on first request and reused
//! afterwards. Settings only apply when the breaker is created: a later
//! request for an existing name with different settings gets the existing
//! instance (a warning is logged).

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{CircuitBreaker, CircuitBreakerSettings, CircuitBreakerStats};
use crate::metrics::MetricsState;

/// Registry producing and reusing named circuit breakers
pub struct CircuitBreakerFactory {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    defaults: CircuitBreakerSettings,
    metrics: Option<Arc<MetricsState>>,
}

impl CircuitBreakerFactory {
    /// Create a factory with the standard defaults (5 failures, 60s, 300s)
    pub fn new() -> Self {
        Self::with_defaults(CircuitBreakerSettings::default())
    }

    /// Create a factory with custom default settings
    pub fn with_defaults(defaults: CircuitBreakerSettings) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            defaults,
            metrics: None,
        }
    }

    /// Attach a metrics sink, inherited by breakers created afterwards
    pub fn with_metrics(mut self, metrics: Arc<MetricsState>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn defaults(&self) -> &CircuitBreakerSettings {
        &self.defaults
    }

    /// Get the breaker for `name`, creating it with `settings` (or the
    /// factory defaults) if it does not exist yet
    pub fn get_instance(
        &self,
        name: &str,
        settings: Option<CircuitBreakerSettings>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            warn_on_mismatch(existing, settings.as_ref());
            return existing.clone();
        }

        let mut breakers = self.breakers.write();
        if let Some(existing) = breakers.get(name) {
            warn_on_mismatch(existing, settings.as_ref());
            return existing.clone();
        }

        let mut breaker = CircuitBreaker::new(name, settings.unwrap_or(self.defaults));
        if let Some(ref metrics) = self.metrics {
            breaker = breaker.with_metrics(metrics.clone());
        }
        let breaker = Arc::new(breaker);
        breakers.insert(name.to_string(), breaker.clone());

        tracing::debug!(
            breaker = name,
            failure_threshold = breaker.settings().failure_threshold,
            "Created circuit breaker"
        );

        breaker
    }

    /// Remove a breaker; the next request for `name` creates a fresh one
    pub fn remove_instance(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.write().remove(name)
    }

    /// All breakers, sorted by name
    pub fn get_all_instances(&self) -> Vec<Arc<CircuitBreaker>> {
        let mut all: Vec<_> = self.breakers.read().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Stats for every breaker keyed by name
    pub fn get_all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    /// Reset every breaker (admin action)
    pub fn reset_all(&self) {
        for breaker in self.get_all_instances() {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CircuitBreakerFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn warn_on_mismatch(existing: &CircuitBreaker, requested: Option<&CircuitBreakerSettings>) {
    if let Some(requested) = requested {
        if requested != existing.settings() {
            tracing::warn!(
                breaker = existing.name(),
                "Circuit breaker already exists, ignoring different settings"
            );
        }
    }
}
