//! The `transport` module is responsible for handling network communication
//! with clients over WebSockets.
//!
//! It defines the messaging protocol used between clients and the server,
//! the per-connection multiplexer that maps operation ids to subscription
//! sessions, and the WebSocket server itself.

pub mod connection;
pub mod message;
pub mod websocket;

pub use connection::{Connection, ConnectionState, Dispatch};
pub use message::{ClientMessage, OperationId, ServerMessage};
pub use websocket::{serve, start_websocket_server};
