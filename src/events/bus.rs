//! Publish/subscribe event bus
//!
//! Queue semantics:
//! - `publish` enqueues and starts a drain task if none is running
//! - The drain task delivers one event at a time; all handlers for that
//!   event run concurrently and are awaited together
//! - A failed event goes back to the FRONT of the queue with its retry
//!   count incremented, and the drain pauses `retry_delay * retry_count`
//! - After `max_retries` the error handler is called and the event dropped

use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;

use super::{DomainEvent, EventBusError, EventHandler};
use crate::metrics::MetricsState;

/// Called once per event that exhausted its retries
pub type ErrorHandler = Arc<dyn Fn(&EventBusError, &DomainEvent) + Send + Sync>;

/// Retry policy for queued delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBusConfig {
    /// Redeliveries after the first failed attempt
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `retry_delay * n`
    pub retry_delay: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Observational snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusStats {
    /// Subscriber count per event type
    pub subscriptions: BTreeMap<String, usize>,
    pub total_subscriptions: usize,
    pub queue_depth: usize,
    pub processing: bool,
}

struct QueuedEvent {
    event: DomainEvent,
    retry_count: u32,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<QueuedEvent>,
    processing: bool,
}

struct Inner {
    config: EventBusConfig,
    /// event type -> subscription id -> handler
    subscriptions: RwLock<HashMap<String, BTreeMap<u64, Arc<dyn EventHandler>>>>,
    next_id: AtomicU64,
    queue: Mutex<QueueState>,
    idle: Notify,
    error_handler: RwLock<Option<ErrorHandler>>,
    metrics: RwLock<Option<Arc<MetricsState>>>,
}

/// In-process event bus
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

/// Handle for one registration
///
/// Dropping the handle keeps the subscription; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    event_type: String,
    bus: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Remove exactly this registration
    ///
    /// Returns false if it was already removed or the bus is gone.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove_subscription(&self.event_type, self.id),
            None => false,
        }
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                subscriptions: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue: Mutex::new(QueueState::default()),
                idle: Notify::new(),
                error_handler: RwLock::new(None),
                metrics: RwLock::new(None),
            }),
        }
    }

    /// Set the handler for events that exhaust their retries
    pub fn with_error_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&EventBusError, &DomainEvent) + Send + Sync + 'static,
    {
        *self.inner.error_handler.write() = Some(Arc::new(handler));
        self
    }

    pub fn with_metrics(self, metrics: Arc<MetricsState>) -> Self {
        *self.inner.metrics.write() = Some(metrics);
        self
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    pub fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscriptions
            .write()
            .entry(event_type.to_string())
            .or_default()
            .insert(id, handler);

        tracing::debug!(event_type = event_type, subscription = id, "Handler subscribed");
        Subscription {
            id,
            event_type: event_type.to_string(),
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove every handler for `event_type`
    pub fn unsubscribe_all(&self, event_type: &str) -> usize {
        self.inner
            .subscriptions
            .write()
            .remove(event_type)
            .map_or(0, |handlers| handlers.len())
    }

    /// Drop all subscriptions and any queued events
    pub fn clear(&self) {
        self.inner.subscriptions.write().clear();
        let dropped = {
            let mut queue = self.inner.queue.lock();
            let dropped = queue.events.len();
            queue.events.clear();
            dropped
        };
        self.inner.update_queue_depth();
        if dropped > 0 {
            tracing::warn!(dropped, "Event bus cleared with queued events");
        }
    }

    /// Enqueue for asynchronous delivery (fire-and-forget)
    ///
    /// Must be called from within a tokio runtime.
    pub fn publish(&self, event: DomainEvent) {
        tracing::debug!(event = %event, "Event published");
        let start_drain = {
            let mut queue = self.inner.queue.lock();
            queue.events.push_back(QueuedEvent {
                event,
                retry_count: 0,
            });
            !std::mem::replace(&mut queue.processing, true)
        };

        self.inner.with_metrics(|m| m.events_published.inc());
        self.inner.update_queue_depth();

        if start_drain {
            tokio::spawn(drain(self.inner.clone()));
        }
    }

    /// Deliver to current subscribers now, bypassing the queue
    ///
    /// Every handler runs even if others fail. Returns the number of
    /// handlers invoked.
    pub async fn publish_sync(&self, event: &DomainEvent) -> Result<usize, EventBusError> {
        self.inner.with_metrics(|m| m.events_published.inc());
        let result = self.inner.deliver(event).await;
        match result {
            Ok(_) => self.inner.with_metrics(|m| m.events_delivered.inc()),
            Err(_) => self.inner.with_metrics(|m| m.events_failed.inc()),
        }
        result
    }

    pub fn get_stats(&self) -> EventBusStats {
        let subscriptions: BTreeMap<String, usize> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .map(|(event_type, handlers)| (event_type.clone(), handlers.len()))
            .collect();
        let queue = self.inner.queue.lock();
        EventBusStats {
            total_subscriptions: subscriptions.values().sum(),
            subscriptions,
            queue_depth: queue.events.len(),
            processing: queue.processing,
        }
    }

    /// Wait until the queue is drained and no delivery is in progress
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.inner.queue.lock().processing {
                return;
            }
            notified.await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl Inner {
    fn remove_subscription(&self, event_type: &str, id: u64) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let Some(handlers) = subscriptions.get_mut(event_type) else {
            return false;
        };
        let removed = handlers.remove(&id).is_some();
        if handlers.is_empty() {
            subscriptions.remove(event_type);
        }
        if removed {
            tracing::debug!(event_type = event_type, subscription = id, "Handler unsubscribed");
        }
        removed
    }

    fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.subscriptions
            .read()
            .get(event_type)
            .map(|handlers| handlers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Run every handler for `event` concurrently and settle all of them
    async fn deliver(&self, event: &DomainEvent) -> Result<usize, EventBusError> {
        let handlers = self.handlers_for(event.event_type());
        let total = handlers.len();
        if total == 0 {
            tracing::debug!(event_type = event.event_type(), "No subscribers for event");
            return Ok(0);
        }

        let outcomes = join_all(handlers.iter().map(|handler| async move {
            match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("handler '{}' panicked", handler.name())),
            }
        }))
        .await;

        let errors: Vec<anyhow::Error> = outcomes.into_iter().filter_map(Result::err).collect();
        for error in &errors {
            tracing::warn!(event = %event, error = %error, "Event handler failed");
        }

        match errors.first() {
            None => Ok(total),
            Some(first) => Err(EventBusError::DeliveryFailed {
                event_type: event.event_type().to_string(),
                failed: errors.len(),
                total,
                first: format!("{:#}", first),
            }),
        }
    }

    fn with_metrics(&self, f: impl FnOnce(&MetricsState)) {
        if let Some(ref metrics) = *self.metrics.read() {
            f(metrics);
        }
    }

    fn update_queue_depth(&self) {
        let depth = self.queue.lock().events.len();
        self.with_metrics(|m| m.event_queue_depth.set(depth as i64));
    }

    fn report_exhausted(&self, error: &EventBusError, event: &DomainEvent) {
        let handler = self.error_handler.read().clone();
        match handler {
            Some(handler) => handler(error, event),
            None => tracing::error!(event = %event, error = %error, "Event dropped without error handler"),
        }
    }
}

/// Drain loop; exactly one runs while `processing` is set
async fn drain(inner: Arc<Inner>) {
    loop {
        let next = {
            let mut queue = inner.queue.lock();
            let next = queue.events.pop_front();
            if next.is_none() {
                queue.processing = false;
            }
            next
        };
        inner.update_queue_depth();

        let Some(item) = next else {
            inner.idle.notify_waiters();
            return;
        };

        match inner.deliver(&item.event).await {
            Ok(_) => {
                inner.with_metrics(|m| m.events_delivered.inc());
            }
            Err(error) if item.retry_count < inner.config.max_retries => {
                let retry_count = item.retry_count + 1;
                let delay = inner.config.retry_delay * retry_count;
                tracing::warn!(
                    event = %item.event,
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Event delivery failed, retrying"
                );
                inner.with_metrics(|m| m.events_failed.inc());
                inner.queue.lock().events.push_front(QueuedEvent {
                    event: item.event,
                    retry_count,
                });
                inner.update_queue_depth();
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                tracing::error!(
                    event = %item.event,
                    retries = item.retry_count,
                    error = %error,
                    "Event delivery failed permanently, dropping"
                );
                inner.with_metrics(|m| {
                    m.events_failed.inc();
                    m.events_dropped.inc();
                });
                inner.report_exhausted(&error, &item.event);
            }
        }
    }
}
