use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;

use crate::transport::message::ServerMessage;
use crate::utils::error::DeliveryError;

/// Represents a connected client in the subscription server.
///
/// Each client is uniquely identified by an `id` and owns the outbox
/// (`sender`) its writer task serializes onto the socket.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for the connection.
    pub id: String,

    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,

    sender: UnboundedSender<ServerMessage>,
}

impl Client {
    /// Create a new client around an outbox. The `id` is a UUID used to
    /// identify the connection in logs.
    pub fn new(sender: UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: format!("client-{}", uuid::Uuid::new_v4()),
            connected_at: Utc::now(),
            sender,
        }
    }

    /// Queues one message for the writer. Never blocks.
    pub fn send(&self, msg: ServerMessage) -> Result<(), DeliveryError> {
        self.sender.send(msg).map_err(|_| DeliveryError::SinkClosed)
    }

    /// A cloned outbox handle for delivery callbacks.
    pub fn sink(&self) -> UnboundedSender<ServerMessage> {
        self.sender.clone()
    }

    /// `true` once the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Resolves once the receiving half of the outbox has been dropped.
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}
