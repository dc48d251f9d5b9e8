//! Session state machine
//!
//! ```text
//! Pending ──activate──► Active ──stop──► Stopping ──unsubscribed──► Terminated
//!    │                    │                                            ▲
//!    └── bad selector ────┼────────────────────────────────────────────┤
//!                         └── terminate (connection gone) ─────────────┘
//! ```
//!
//! Only [`Session::stop`] emits `complete`; it does so after the broker
//! unsubscribe returned, so no `next` can follow it. The forced path emits
//! nothing.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::broker::topic::validate_topic_name;
use crate::broker::{Broker, SubscriberHandle};
use crate::client::Client;
use crate::session::resolver::SelectorResolver;
use crate::transport::message::{OperationId, ServerMessage};
use crate::utils::error::{DeliveryError, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Stopping,
    Terminated,
}

#[derive(Debug)]
pub struct Session {
    id: OperationId,
    selector: String,
    state: SessionState,
    handle: Option<SubscriberHandle<Value>>,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: OperationId, selector: impl Into<String>) -> Self {
        Self {
            id,
            selector: selector.into(),
            state: SessionState::Pending,
            handle: None,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The topic this session is registered on, while it is registered.
    pub fn topic(&self) -> Option<&str> {
        self.handle.as_ref().map(|h| h.topic())
    }

    /// `false` when the session ended or the broker dropped its handle after a
    /// failed delivery.
    pub fn is_live(&self) -> bool {
        self.state == SessionState::Active && self.handle.as_ref().is_some_and(|h| h.is_active())
    }

    /// Drives `Pending -> Active`. On failure the session is `Terminated` and
    /// was never registered with the broker.
    pub fn activate(
        &mut self,
        broker: &Broker<Value>,
        resolver: &dyn SelectorResolver,
        outbox: &Client,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Pending {
            return Ok(());
        }

        match self.register(broker, resolver, outbox) {
            Ok(handle) => {
                debug!(id = %self.id, topic = handle.topic(), "session active");
                self.handle = Some(handle);
                self.state = SessionState::Active;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Terminated;
                Err(e)
            }
        }
    }

    fn register(
        &self,
        broker: &Broker<Value>,
        resolver: &dyn SelectorResolver,
        outbox: &Client,
    ) -> Result<SubscriberHandle<Value>, SessionError> {
        let topic = resolver
            .resolve(&self.selector)
            .ok_or_else(|| SessionError::UnknownSelector(self.selector.clone()))?;

        if validate_topic_name(&topic).is_err() {
            return Err(SessionError::InvalidTopic {
                selector: self.selector.clone(),
                topic,
            });
        }

        let sink = outbox.sink();
        let id = self.id.clone();
        let handle = broker.subscribe(&topic, move |payload| {
            sink.send(ServerMessage::Next {
                id: id.clone(),
                payload,
            })
            .map_err(|_| DeliveryError::SinkClosed)
        })?;

        Ok(handle)
    }

    /// Explicit stop: `Active -> Stopping -> Terminated`, then `complete`.
    /// Returns `false` if the session was not active.
    pub fn stop(&mut self, broker: &Broker<Value>, outbox: &Client) -> bool {
        if self.state != SessionState::Active {
            return false;
        }

        self.state = SessionState::Stopping;
        self.unregister(broker);
        self.state = SessionState::Terminated;

        if let Err(e) = outbox.send(ServerMessage::Complete {
            id: self.id.clone(),
        }) {
            debug!(id = %self.id, error = %e, "complete dropped");
        }
        debug!(id = %self.id, lifetime_ms = self.lifetime_ms(), "session stopped");
        true
    }

    /// Forced teardown from any state. Emits nothing.
    pub fn terminate(&mut self, broker: &Broker<Value>) -> bool {
        if self.state == SessionState::Terminated {
            return false;
        }

        self.unregister(broker);
        self.state = SessionState::Terminated;
        debug!(id = %self.id, lifetime_ms = self.lifetime_ms(), "session terminated");
        true
    }

    fn unregister(&mut self, broker: &Broker<Value>) {
        if let Some(handle) = self.handle.take() {
            broker.unsubscribe(&handle);
        }
    }

    fn lifetime_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}
