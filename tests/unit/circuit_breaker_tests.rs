//! Circuit Breaker Unit Tests
//!
//! Tests the breaker state machine through the public API:
//! - Opening after `failure_threshold` failures
//! - Short-circuiting without invoking the operation
//! - Self-healing after `reset_timeout`
//! - Per-name reuse in the factory

use jewelbox_core::circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerFactory, CircuitBreakerSettings, CircuitState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn settings(failure_threshold: u32) -> CircuitBreakerSettings {
    CircuitBreakerSettings {
        failure_threshold,
        reset_timeout: Duration::from_secs(60),
        monitoring_period: Duration::from_secs(300),
    }
}

async fn fail(breaker: &CircuitBreaker, calls: &AtomicUsize) -> Result<(), CircuitBreakerError<String>> {
    breaker
        .execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("upstream down".to_string())
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_opens_after_threshold_and_short_circuits() {
    let breaker = CircuitBreaker::new("metal-price-api", settings(3));
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let err = fail(&breaker, &calls).await.unwrap_err();
        assert!(!err.is_open(), "inner error should be returned as-is");
        assert_eq!(err.to_string(), "upstream down");
    }
    assert_eq!(breaker.stats().state, CircuitState::Open);

    // Fourth call before reset_timeout never reaches the operation
    let err = fail(&breaker, &calls).await.unwrap_err();
    assert!(err.is_open());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!breaker.is_call_permitted());
}

#[tokio::test(start_paused = true)]
async fn test_self_heals_after_reset_timeout() {
    let breaker = CircuitBreaker::new("exchange-rate-api", settings(3));
    let calls = AtomicUsize::new(0);
    for _ in 0..3 {
        let _ = fail(&breaker, &calls).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(breaker.is_call_permitted());

    let value = breaker.execute(|| async { Ok::<_, String>(42) }).await.unwrap();
    assert_eq!(value, 42);

    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let breaker = CircuitBreaker::new("trial", settings(2));
    let calls = AtomicUsize::new(0);
    for _ in 0..2 {
        let _ = fail(&breaker, &calls).await;
    }

    tokio::time::advance(Duration::from_secs(61)).await;
    let err = fail(&breaker, &calls).await.unwrap_err();
    assert!(!err.is_open());
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.stats().next_retry_in.is_some());
}

#[tokio::test]
async fn test_manual_overrides() {
    let breaker = CircuitBreaker::new("admin", settings(5));
    breaker.force_open();
    assert!(breaker
        .execute(|| async { Ok::<_, String>(()) })
        .await
        .unwrap_err()
        .is_open());

    breaker.force_closed();
    assert!(breaker.execute(|| async { Ok::<_, String>(()) }).await.is_ok());

    breaker.reset();
    let stats = breaker.stats();
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.window_size, 0);
}

#[test]
fn test_factory_reuses_instances_per_name() {
    let factory = CircuitBreakerFactory::new();
    let first = factory.get_instance("metal-price-api", Some(settings(2)));
    let second = factory.get_instance("metal-price-api", Some(settings(9)));

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.settings().failure_threshold, 2, "first config wins");

    let defaults = factory.get_instance("exchange-rate-api", None);
    assert_eq!(defaults.settings(), &CircuitBreakerSettings::default());

    let names: Vec<String> = factory.get_all_stats().into_keys().collect();
    assert_eq!(names, vec!["exchange-rate-api", "metal-price-api"]);

    assert!(factory.remove_instance("metal-price-api").is_some());
    assert_eq!(factory.len(), 1);
}
