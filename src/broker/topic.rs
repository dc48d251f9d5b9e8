//! Topic management
//!
//! A `Topic` holds the subscribers registered against one topic name, and the
//! `TopicRegistry` maps names to topics. Topics are created lazily by the first
//! subscribe and removed as soon as their last subscriber leaves, so the
//! registry never holds an empty topic.
//!
//! The registry is the only globally shared mutable structure of the server.
//! It is backed by a `DashMap`; `publish` clones the subscriber set of a topic
//! and releases the shard lock before any callback runs, so concurrent
//! subscribe/unsubscribe calls never observe or corrupt a half-iterated set.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::broker::subscriber::{Subscriber, SubscriberId};
use crate::utils::error::BrokerError;

/// Longest accepted topic name, in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

/// Checks that `name` is a usable topic: 1..=256 ASCII alphanumerics or one
/// of `_ - . :`.
pub fn validate_topic_name(name: &str) -> Result<(), BrokerError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TOPIC_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));

    if valid {
        Ok(())
    } else {
        Err(BrokerError::InvalidTopic(name.to_string()))
    }
}

#[derive(Debug)]
pub struct Topic<E> {
    pub name: Arc<str>,
    subscribers: HashMap<SubscriberId, Arc<Subscriber<E>>>,
}

impl<E> Topic<E> {
    /// Create a new, empty topic with the given name.
    pub fn new(name: Arc<str>) -> Self {
        Self {
            name,
            subscribers: HashMap::new(),
        }
    }

    /// Add a subscriber. Duplicate adds of the same handle are ignored.
    pub fn subscribe(&mut self, subscriber: Arc<Subscriber<E>>) -> bool {
        let id = subscriber.id();
        if self.subscribers.contains_key(&id) {
            return false;
        }
        self.subscribers.insert(id, subscriber);
        true
    }

    /// Remove a subscriber. Absent ids are a no-op.
    pub fn unsubscribe(&mut self, id: &SubscriberId) -> bool {
        self.subscribers.remove(id).is_some()
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.subscribers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<Subscriber<E>>> {
        self.subscribers.values().cloned().collect()
    }
}

#[derive(Debug)]
pub struct TopicRegistry<E> {
    topics: DashMap<Arc<str>, Topic<E>>,
    max_subscribers: usize,
}

impl<E> TopicRegistry<E> {
    /// `max_subscribers` of 0 means unlimited.
    pub fn new(max_subscribers: usize) -> Self {
        Self {
            topics: DashMap::new(),
            max_subscribers,
        }
    }

    /// Inserts `subscriber` into its topic, creating the topic if absent.
    pub fn subscribe(&self, subscriber: Arc<Subscriber<E>>) -> Result<(), BrokerError> {
        let key = subscriber.topic_key();
        let mut topic = self
            .topics
            .entry(key.clone())
            .or_insert_with(|| Topic::new(key.clone()));

        if self.max_subscribers > 0
            && !topic.contains(&subscriber.id())
            && topic.len() >= self.max_subscribers
        {
            return Err(BrokerError::TopicFull {
                topic: key.to_string(),
                limit: self.max_subscribers,
            });
        }

        topic.subscribe(subscriber);
        Ok(())
    }

    /// Removes `id` from `topic` and drops the topic once it is empty.
    /// Unknown topics and ids are a no-op.
    pub fn unsubscribe(&self, topic: &str, id: &SubscriberId) -> bool {
        let removed = match self.topics.get_mut(topic) {
            Some(mut t) => t.unsubscribe(id),
            None => false,
        };

        if removed {
            self.topics.remove_if(topic, |_, t| t.is_empty());
        }
        removed
    }

    /// Snapshot of the subscribers of `topic`; empty when the topic does not
    /// exist.
    pub fn subscribers(&self, topic: &str) -> Vec<Arc<Subscriber<E>>> {
        match self.topics.get(topic) {
            Some(t) => t.snapshot(),
            None => Vec::new(),
        }
    }

    pub fn contains_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|t| t.len()).unwrap_or(0)
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|t| t.key().to_string()).collect()
    }
}

impl<E> Default for TopicRegistry<E> {
    fn default() -> Self {
        Self::new(0)
    }
}
