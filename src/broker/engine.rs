//! Broker engine
//!
//! The [`Broker`] is a thin façade over the [`TopicRegistry`] that allocates
//! subscriber handles and fans published events out to them.
//!
//! Concurrency and usage notes:
//! - The broker is `Sync` and meant to be shared as `Arc<Broker<E>>` between
//!   connection tasks and whatever triggers publishes. There is no outer lock.
//! - `publish` invokes delivery callbacks synchronously on the caller's thread.
//!   Callbacks must be non-blocking and must not call back into the broker;
//!   the session callbacks only push onto an unbounded per-connection outbox.
//! - Once `unsubscribe(handle)` returns, that handle's callback is never
//!   invoked again, including by publishes that were already running.
//! - A failing callback is isolated: it is logged, its subscriber is
//!   unregistered, and delivery to the other subscribers continues.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use crate::broker::subscriber::{Subscriber, SubscriberHandle};
use crate::broker::topic::{TopicRegistry, validate_topic_name};
use crate::utils::error::{BrokerError, DeliveryError};

/// Point-in-time copy of the broker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub publishes: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub registrations: u64,
    pub unregistrations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    publishes: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    registrations: AtomicU64,
    unregistrations: AtomicU64,
}

#[derive(Debug)]
pub struct Broker<E> {
    registry: TopicRegistry<E>,
    counters: Counters,
}

impl<E> Broker<E> {
    pub fn new() -> Self {
        Self::with_subscriber_limit(0)
    }

    /// Broker whose topics accept at most `limit` subscribers each
    /// (0 = unlimited).
    pub fn with_subscriber_limit(limit: usize) -> Self {
        Self {
            registry: TopicRegistry::new(limit),
            counters: Counters::default(),
        }
    }

    /// Registers `deliver` on `topic`, creating the topic on first use.
    pub fn subscribe<F>(&self, topic: &str, deliver: F) -> Result<SubscriberHandle<E>, BrokerError>
    where
        F: Fn(E) -> Result<(), DeliveryError> + Send + Sync + 'static,
    {
        validate_topic_name(topic)?;

        let subscriber = Arc::new(Subscriber::new(Arc::from(topic), Box::new(deliver)));
        self.registry.subscribe(subscriber.clone())?;
        self.counters.registrations.fetch_add(1, Ordering::Relaxed);

        debug!(topic, subscriber = %subscriber.id(), "subscriber registered");
        Ok(SubscriberHandle { inner: subscriber })
    }

    /// Unregisters `handle`. Safe to call more than once; only the call that
    /// actually removed the registration returns `true`.
    pub fn unsubscribe(&self, handle: &SubscriberHandle<E>) -> bool {
        self.remove(&handle.inner)
    }

    fn remove(&self, subscriber: &Subscriber<E>) -> bool {
        // Waits for an in-flight delivery to this subscriber to finish.
        subscriber.deactivate();

        let removed = self
            .registry
            .unsubscribe(subscriber.topic(), &subscriber.id());
        if removed {
            self.counters.unregistrations.fetch_add(1, Ordering::Relaxed);
            debug!(topic = subscriber.topic(), subscriber = %subscriber.id(), "subscriber removed");
        }
        removed
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.registry.contains_topic(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.registry.topic_count()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.subscriber_count(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.registry.topic_names()
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            publishes: self.counters.publishes.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.counters.delivery_failures.load(Ordering::Relaxed),
            registrations: self.counters.registrations.load(Ordering::Relaxed),
            unregistrations: self.counters.unregistrations.load(Ordering::Relaxed),
        }
    }
}

impl<E: Clone> Broker<E> {
    /// Publishes `event` to every subscriber of `topic` and returns how many
    /// callbacks accepted it. Events for topics without subscribers are
    /// dropped.
    pub fn publish(&self, topic: &str, event: E) -> usize {
        self.counters.publishes.fetch_add(1, Ordering::Relaxed);

        let subscribers = self.registry.subscribers(topic);
        if subscribers.is_empty() {
            trace!(topic, "publish to topic without subscribers dropped");
            return 0;
        }

        let mut delivered = 0;
        let mut failed = Vec::new();

        for subscriber in &subscribers {
            match subscriber.deliver(event.clone()) {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        topic,
                        subscriber = %subscriber.id(),
                        error = %e,
                        "delivery failed, dropping subscriber"
                    );
                    failed.push(subscriber.clone());
                }
            }
        }

        for subscriber in &failed {
            self.remove(subscriber);
        }

        self.counters
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters
            .delivery_failures
            .fetch_add(failed.len() as u64, Ordering::Relaxed);

        trace!(topic, delivered, failed = failed.len(), "published");
        delivered
    }
}

impl<E> Default for Broker<E> {
    fn default() -> Self {
        Self::new()
    }
}
