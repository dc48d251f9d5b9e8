//! Subscription sessions
//!
//! A [`Session`] is one client-initiated subscription on one connection. It
//! resolves the client's selector to a topic through a [`SelectorResolver`],
//! registers a delivery callback with the broker, and turns every delivered
//! event into a `next` message on the connection's outbox.

pub mod lifecycle;
pub mod resolver;

pub use lifecycle::{Session, SessionState};
pub use resolver::{SelectorResolver, TopicMap};

#[cfg(test)]
mod tests;
