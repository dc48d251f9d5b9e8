//! The `client` module defines the outbound side of one connected client.
//!
//! It provides the `Client` struct, which holds the connection's unique
//! identifier and the sending half of its outbox. Every message bound for the
//! socket (subscription events, acks, errors, pongs) goes through this one
//! channel, and a single writer task drains it.

pub mod pubsub_client;
pub use pubsub_client::Client;
