//! Subscriber handles
//!
//! A [`Subscriber`] ties one delivery callback to one topic. The broker keeps
//! an `Arc<Subscriber>` in the topic's subscriber set; the subscription
//! session keeps the same allocation behind a [`SubscriberHandle`], which is
//! its capability to unsubscribe.
//!
//! Every `deliver` runs under the subscriber's own lock, and deactivation takes
//! the same lock. Once [`Subscriber::deactivate`] returns, no delivery is in
//! flight and none will start, whatever publishes are still iterating over a
//! snapshot that contains this subscriber.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::utils::error::DeliveryError;

pub type SubscriberId = Uuid;

pub(crate) type DeliverFn<E> = dyn Fn(E) -> Result<(), DeliveryError> + Send + Sync;

pub struct Subscriber<E> {
    id: SubscriberId,
    topic: Arc<str>,
    active: Mutex<bool>,
    deliver: Box<DeliverFn<E>>,
}

impl<E> Subscriber<E> {
    pub(crate) fn new(topic: Arc<str>, deliver: Box<DeliverFn<E>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            active: Mutex::new(true),
            deliver,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn topic_key(&self) -> Arc<str> {
        self.topic.clone()
    }

    pub fn is_active(&self) -> bool {
        *lock(&self.active)
    }

    /// Invokes the callback unless the subscriber was deactivated.
    ///
    /// Returns `Ok(false)` for the no-op case. A panicking callback is
    /// reported as [`DeliveryError::Panicked`] instead of unwinding into the
    /// publisher.
    pub(crate) fn deliver(&self, event: E) -> Result<bool, DeliveryError> {
        let active = lock(&self.active);
        if !*active {
            return Ok(false);
        }

        match panic::catch_unwind(AssertUnwindSafe(|| (self.deliver)(event))) {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeliveryError::Panicked),
        }
    }

    /// Marks the subscriber dead. Returns whether it was still active.
    pub(crate) fn deactivate(&self) -> bool {
        let mut active = lock(&self.active);
        std::mem::replace(&mut *active, false)
    }
}

impl<E> fmt::Debug for Subscriber<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Registration token returned by [`Broker::subscribe`](super::Broker::subscribe).
pub struct SubscriberHandle<E> {
    pub(crate) inner: Arc<Subscriber<E>>,
}

impl<E> SubscriberHandle<E> {
    pub fn id(&self) -> SubscriberId {
        self.inner.id()
    }

    pub fn topic(&self) -> &str {
        self.inner.topic()
    }

    /// `false` once the handle was unsubscribed, either explicitly or by the
    /// broker after a failed delivery.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }
}

impl<E> Clone for SubscriberHandle<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> fmt::Debug for SubscriberHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
