//! Wire messages
//!
//! Control messages exchanged over one WebSocket connection, one JSON object
//! per text frame, discriminated by a `type` field:
//!
//! ```text
//! client -> server: connection_init, start, stop, ping, publish, connection_terminate
//! server -> client: connection_ack, next, complete, error, pong, ka
//! ```
//!
//! Operation ids are strings on the wire. Integer ids are accepted on input
//! and normalised to their decimal form, so `{"id": 1}` and `{"id": "1"}`
//! name the same operation.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::utils::error::ProtocolError;

/// Connection-scoped key of one logical subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for OperationId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for OperationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(id) => OperationId(id),
            Raw::Number(id) => OperationId(id.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Start {
        id: OperationId,
        selector: String,
    },
    Stop {
        id: OperationId,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Publish {
        topic: String,
        #[serde(default)]
        payload: Value,
    },
    ConnectionTerminate,
}

impl ClientMessage {
    /// Every `type` value the server understands.
    pub const KINDS: [&'static str; 6] = [
        "connection_init",
        "start",
        "stop",
        "ping",
        "publish",
        "connection_terminate",
    ];
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck,
    Next {
        id: OperationId,
        payload: Value,
    },
    Complete {
        id: OperationId,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<OperationId>,
        message: String,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    #[serde(rename = "ka")]
    KeepAlive,
}

impl ServerMessage {
    pub fn error(id: Option<OperationId>, message: impl fmt::Display) -> Self {
        ServerMessage::Error {
            id,
            message: message.to_string(),
        }
    }
}

/// Parses one inbound text frame.
///
/// Unknown `type` values are told apart from known messages with bad fields,
/// so the caller can report [`ProtocolError::UnknownKind`] precisely.
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing string field 'type'".to_string()))?;

    if !ClientMessage::KINDS.contains(&kind) {
        return Err(ProtocolError::UnknownKind(kind.to_string()));
    }

    // A bad id only sinks this message, not the whole connection.
    if matches!(kind, "start" | "stop") {
        if let Some(id) = value.get("id").filter(|id| !(id.is_string() || id.is_u64())) {
            return Err(ProtocolError::InvalidOperationId(id.to_string()));
        }
    }

    let kind = kind.to_string();
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(format!("{kind}: {e}")))
}
