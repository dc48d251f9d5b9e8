use std::collections::HashMap;

use crate::broker::topic::validate_topic_name;
use crate::config::Settings;

/// Maps a subscription selector to the topic it listens on.
///
/// This is the boundary to the execution layer: how a selector is derived
/// from an operation is its business, the subscription core only needs the
/// topic name.
pub trait SelectorResolver: Send + Sync {
    fn resolve(&self, selector: &str) -> Option<String>;
}

impl<F> SelectorResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve(&self, selector: &str) -> Option<String> {
        self(selector)
    }
}

/// Static selector table, optionally falling back to the selector itself.
#[derive(Debug, Clone, Default)]
pub struct TopicMap {
    routes: HashMap<String, String>,
    passthrough: bool,
}

impl TopicMap {
    pub fn new(routes: HashMap<String, String>) -> Self {
        Self {
            routes,
            passthrough: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.selectors.clone())
            .with_passthrough(settings.protocol.passthrough_selectors)
    }

    pub fn with_passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn insert(&mut self, selector: impl Into<String>, topic: impl Into<String>) {
        self.routes.insert(selector.into(), topic.into());
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl SelectorResolver for TopicMap {
    fn resolve(&self, selector: &str) -> Option<String> {
        match self.routes.get(selector) {
            Some(topic) => Some(topic.clone()),
            None if self.passthrough && validate_topic_name(selector).is_ok() => {
                Some(selector.to_string())
            }
            None => None,
        }
    }
}
