//! Domain events and in-process delivery
//!
//! Business operations publish [`DomainEvent`]s onto the [`EventBus`];
//! handlers subscribe per event type. Queued delivery retries failed
//! events with linear backoff; synchronous delivery bypasses the queue.

pub mod bus;

pub use bus::{ErrorHandler, EventBus, EventBusConfig, EventBusStats, Subscription};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Well-known event types published by the business layer
pub mod event_types {
    pub const RECEIPT_CREATED: &str = "receipt.created";
    pub const RECEIPT_UPDATED: &str = "receipt.updated";
    pub const RECEIPT_DELETED: &str = "receipt.deleted";
    pub const QUOTATION_CREATED: &str = "quotation.created";
    pub const QUOTATION_UPDATED: &str = "quotation.updated";
    pub const QUOTATION_DELETED: &str = "quotation.deleted";
    pub const CLIENT_CREATED: &str = "client.created";
    pub const CLIENT_UPDATED: &str = "client.updated";
    pub const CLIENT_DELETED: &str = "client.deleted";
    pub const PRODUCT_CREATED: &str = "product.created";
    pub const PRODUCT_UPDATED: &str = "product.updated";
    pub const PRODUCT_DELETED: &str = "product.deleted";
    pub const PAYMENT_CREATED: &str = "payment.created";
    pub const PAYMENT_UPDATED: &str = "payment.updated";
    pub const PAYMENT_DELETED: &str = "payment.deleted";
    pub const PRICE_UPDATED: &str = "price.updated";
    pub const SYSTEM_STARTED: &str = "system.started";

    pub const ALL: [&str; 17] = [
        RECEIPT_CREATED,
        RECEIPT_UPDATED,
        RECEIPT_DELETED,
        QUOTATION_CREATED,
        QUOTATION_UPDATED,
        QUOTATION_DELETED,
        CLIENT_CREATED,
        CLIENT_UPDATED,
        CLIENT_DELETED,
        PRODUCT_CREATED,
        PRODUCT_UPDATED,
        PRODUCT_DELETED,
        PAYMENT_CREATED,
        PAYMENT_UPDATED,
        PAYMENT_DELETED,
        PRICE_UPDATED,
        SYSTEM_STARTED,
    ];
}

/// Immutable record of something that happened to an aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    id: Uuid,
    #[serde(rename = "type")]
    event_type: String,
    occurred_at: DateTime<Utc>,
    aggregate_id: String,
    version: u32,
    data: Value,
}

impl DomainEvent {
    pub fn new(event_type: impl Into<String>, aggregate_id: impl Into<String>, version: u32, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            occurred_at: Utc::now(),
            aggregate_id: aggregate_id.into(),
            version,
            data,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}@v{} ({})",
            self.event_type, self.aggregate_id, self.version, self.id
        )
    }
}

/// Event handler trait
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event; an error marks this delivery attempt failed
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;

    /// Name used in logs
    fn name(&self) -> &str {
        "handler"
    }
}

struct FnHandler<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Event delivery errors
#[derive(Debug, Clone, Error)]
pub enum EventBusError {
    #[error("{failed} of {total} handlers failed for '{event_type}': {first}")]
    DeliveryFailed {
        event_type: String,
        failed: usize,
        total: usize,
        /// First handler error, rendered
        first: String,
    },
}
