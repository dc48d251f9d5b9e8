//! # LiveSub
//!
//! `livesub` is the transport core of a GraphQL-style subscription server.
//! Clients open a WebSocket, multiplex any number of subscription
//! operations over it, and receive the events published on the topics those
//! operations resolve to.
//!
//! ## Core Modules
//!
//! - `broker`: Topic registry and in-process fan-out of published events.
//! - `client`: The outbound half of a connected client.
//! - `config`: Loads server, protocol and selector settings.
//! - `session`: One subscription operation and its lifecycle.
//! - `transport`: Wire messages, the per-connection multiplexer and the
//!   WebSocket server.
//! - `utils`: Error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod session;
pub mod transport;
pub mod utils;

pub use broker::{Broker, BrokerStats, SubscriberHandle};
pub use session::{SelectorResolver, TopicMap};
pub use transport::{ClientMessage, OperationId, ServerMessage};
