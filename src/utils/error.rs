//! The `error` module defines the error types used within `livesub`.
//!
//! Errors are local to the operation or connection that caused them:
//! - [`BrokerError`] and [`SessionError`] end one subscription,
//! - [`ProtocolError`] is reported to the offending connection and, when
//!   [`ProtocolError::is_fatal`] says so, closes it,
//! - [`DeliveryError`] never leaves the broker; it only unregisters the
//!   subscriber whose sink failed.

use thiserror::Error;

use crate::transport::message::OperationId;

/// Registration failures raised by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("invalid topic name '{0}'")]
    InvalidTopic(String),

    #[error("topic '{topic}' reached its subscriber limit of {limit}")]
    TopicFull { topic: String, limit: usize },
}

/// A subscriber's delivery callback refused an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("delivery sink is closed")]
    SinkClosed,

    #[error("delivery callback panicked")]
    Panicked,
}

/// Per-operation failures. The session terminates without affecting its
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown subscription selector '{0}'")]
    UnknownSelector(String),

    #[error("selector '{selector}' resolved to an invalid topic '{topic}'")]
    InvalidTopic { selector: String, topic: String },

    #[error("too many subscriptions on this connection (limit {0})")]
    SubscriptionLimit(usize),

    #[error(transparent)]
    Registration(#[from] BrokerError),
}

/// Connection-level protocol violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unrecognized message type '{0}'")]
    UnknownKind(String),

    #[error("operation id {0} is not a string or a non-negative integer")]
    InvalidOperationId(String),

    #[error("operation id '{0}' is already in use")]
    DuplicateOperation(OperationId),

    #[error("connection_init is required before '{0}'")]
    HandshakeRequired(String),

    #[error("publishing is disabled on this server")]
    PublishDisabled,

    #[error("binary frames are not supported")]
    BinaryFrame,
}

impl ProtocolError {
    /// Whether the violation should close the connection after the error
    /// reply has been queued. Duplicate ids and disabled publishes only
    /// reject the single message, as does an unusable operation id.
    pub fn is_fatal(&self) -> bool {
        match self {
            ProtocolError::Malformed(_)
            | ProtocolError::UnknownKind(_)
            | ProtocolError::HandshakeRequired(_)
            | ProtocolError::BinaryFrame => true,
            ProtocolError::InvalidOperationId(_)
            | ProtocolError::DuplicateOperation(_)
            | ProtocolError::PublishDisabled => false,
        }
    }

    /// Short stable label for log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::UnknownKind(_) => "unknown_kind",
            ProtocolError::InvalidOperationId(_) => "invalid_operation_id",
            ProtocolError::DuplicateOperation(_) => "duplicate_operation",
            ProtocolError::HandshakeRequired(_) => "handshake_required",
            ProtocolError::PublishDisabled => "publish_disabled",
            ProtocolError::BinaryFrame => "binary_frame",
        }
    }
}

/// Failures of the WebSocket server itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
