//! Connection multiplexer
//!
//! One [`Connection`] per physical socket. It owns the table of subscription
//! sessions keyed by operation id and dispatches every inbound control
//! message against it. The connection task is its only caller, so inbound
//! messages are handled one at a time in arrival order.
//!
//! Outbound traffic has a single writer: replies from this module and `next`
//! messages produced by broker callbacks all go through the client's outbox,
//! in the order they were produced.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::broker::Broker;
use crate::broker::topic::validate_topic_name;
use crate::client::Client;
use crate::config::ProtocolSettings;
use crate::session::{SelectorResolver, Session, SessionState};
use crate::transport::message::{ClientMessage, OperationId, ServerMessage, parse_client_message};
use crate::utils::error::{ProtocolError, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    HandshakePending,
    Ready,
    Closing,
    Closed,
}

/// What the connection task should do after a message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    Close,
}

pub struct Connection {
    client: Client,
    state: ConnectionState,
    sessions: HashMap<OperationId, Session>,
    broker: Arc<Broker<Value>>,
    resolver: Arc<dyn SelectorResolver>,
    settings: ProtocolSettings,
}

impl Connection {
    pub fn new(
        client: Client,
        broker: Arc<Broker<Value>>,
        resolver: Arc<dyn SelectorResolver>,
        settings: ProtocolSettings,
    ) -> Self {
        Self {
            client,
            state: ConnectionState::HandshakePending,
            sessions: HashMap::new(),
            broker,
            resolver,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.client.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_state(&self, id: &OperationId) -> Option<SessionState> {
        self.sessions.get(id).map(Session::state)
    }

    /// Handles one inbound text frame.
    pub fn on_message(&mut self, raw: &str) -> Dispatch {
        if self.is_closed() {
            return Dispatch::Close;
        }
        self.reap_dead_sessions();

        match parse_client_message(raw).and_then(|msg| self.dispatch(msg)) {
            Ok(dispatch) => dispatch,
            Err(e) => self.protocol_error(e),
        }
    }

    /// Handles one inbound binary frame, which the protocol does not use.
    pub fn on_binary(&mut self) -> Dispatch {
        if self.is_closed() {
            return Dispatch::Close;
        }
        self.protocol_error(ProtocolError::BinaryFrame)
    }

    /// Sends `ka` on a ready connection.
    pub fn keep_alive(&mut self) {
        self.reap_dead_sessions();
        if self.state == ConnectionState::Ready {
            self.send(ServerMessage::KeepAlive);
        }
    }

    /// Resolves once nothing drains the outbox any more. Every delivery fails
    /// from then on, so the caller closes the connection.
    pub async fn outbox_closed(&self) {
        self.client.closed().await
    }

    /// Terminates every session through the forced path and clears the
    /// table. Idempotent.
    pub fn on_close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state = ConnectionState::Closing;

        let count = self.sessions.len();
        for (_, mut session) in self.sessions.drain() {
            session.terminate(&self.broker);
        }

        self.state = ConnectionState::Closed;
        info!(
            connection = %self.client.id,
            sessions = count,
            lifetime_ms = (chrono::Utc::now() - self.client.connected_at).num_milliseconds(),
            "connection closed"
        );
    }

    /// Queues one outbound message. Dropped once the connection is closed.
    pub fn send(&self, msg: ServerMessage) {
        if self.state == ConnectionState::Closed {
            trace!(connection = %self.client.id, "dropping message on closed connection");
            return;
        }
        if let Err(e) = self.client.send(msg) {
            debug!(connection = %self.client.id, error = %e, "outbound message dropped");
        }
    }

    fn is_closed(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Closing | ConnectionState::Closed
        )
    }

    fn dispatch(&mut self, msg: ClientMessage) -> Result<Dispatch, ProtocolError> {
        match msg {
            ClientMessage::ConnectionInit { .. } => {
                if self.state == ConnectionState::HandshakePending {
                    self.state = ConnectionState::Ready;
                    debug!(connection = %self.client.id, "handshake complete");
                }
                self.send(ServerMessage::ConnectionAck);
            }
            ClientMessage::Ping { payload } => {
                self.send(ServerMessage::Pong { payload });
            }
            ClientMessage::Start { id, selector } => {
                self.require_ready("start")?;
                self.start(id, selector)?;
            }
            ClientMessage::Stop { id } => {
                self.require_ready("stop")?;
                self.stop(&id);
            }
            ClientMessage::Publish { topic, payload } => {
                self.require_ready("publish")?;
                self.publish(&topic, payload)?;
            }
            ClientMessage::ConnectionTerminate => {
                debug!(connection = %self.client.id, "client requested termination");
                return Ok(Dispatch::Close);
            }
        }
        Ok(Dispatch::Continue)
    }

    fn require_ready(&mut self, kind: &str) -> Result<(), ProtocolError> {
        if self.state == ConnectionState::HandshakePending {
            if self.settings.require_init {
                return Err(ProtocolError::HandshakeRequired(kind.to_string()));
            }
            self.state = ConnectionState::Ready;
        }
        Ok(())
    }

    fn start(&mut self, id: OperationId, selector: String) -> Result<(), ProtocolError> {
        if self.sessions.contains_key(&id) {
            return Err(ProtocolError::DuplicateOperation(id));
        }

        let limit = self.settings.max_subscriptions_per_connection;
        if limit > 0 && self.sessions.len() >= limit {
            let err = SessionError::SubscriptionLimit(limit);
            warn!(connection = %self.client.id, %id, error = %err, "subscription rejected");
            self.send(ServerMessage::error(Some(id), err));
            return Ok(());
        }

        let mut session = Session::new(id.clone(), selector);
        match session.activate(&self.broker, self.resolver.as_ref(), &self.client) {
            Ok(()) => {
                info!(
                    connection = %self.client.id,
                    %id,
                    selector = session.selector(),
                    topic = session.topic().unwrap_or_default(),
                    "subscription started"
                );
                self.sessions.insert(id, session);
            }
            Err(e) => {
                warn!(connection = %self.client.id, %id, error = %e, "subscription rejected");
                self.send(ServerMessage::error(Some(id), e));
            }
        }
        Ok(())
    }

    fn stop(&mut self, id: &OperationId) {
        match self.sessions.remove(id) {
            Some(mut session) => {
                session.stop(&self.broker, &self.client);
                info!(connection = %self.client.id, %id, "subscription stopped");
            }
            None => {
                debug!(connection = %self.client.id, %id, "stop for unknown operation ignored");
            }
        }
    }

    fn publish(&mut self, topic: &str, payload: Value) -> Result<(), ProtocolError> {
        if !self.settings.allow_client_publish {
            return Err(ProtocolError::PublishDisabled);
        }
        if let Err(e) = validate_topic_name(topic) {
            self.send(ServerMessage::error(None, e));
            return Ok(());
        }

        let delivered = self.broker.publish(topic, payload);
        debug!(connection = %self.client.id, topic, delivered, "client publish");
        Ok(())
    }

    /// Drops sessions whose handle the broker unregistered after a failed
    /// delivery. They are treated like a dead connection: no message.
    fn reap_dead_sessions(&mut self) {
        let broker = &self.broker;
        let connection = &self.client.id;
        self.sessions.retain(|id, session| {
            if session.is_live() {
                return true;
            }
            warn!(connection = %connection, %id, "reaping subscription after delivery failure");
            session.terminate(broker);
            false
        });
    }

    fn protocol_error(&mut self, err: ProtocolError) -> Dispatch {
        warn!(
            connection = %self.client.id,
            kind = err.as_label(),
            error = %err,
            "protocol violation"
        );

        let id = match &err {
            ProtocolError::DuplicateOperation(id) => Some(id.clone()),
            _ => None,
        };
        self.send(ServerMessage::error(id, &err));

        if err.is_fatal() && self.settings.close_on_protocol_error {
            Dispatch::Close
        } else {
            Dispatch::Continue
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.on_close();
    }
}
