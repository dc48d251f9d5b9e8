pub mod engine;
pub mod subscriber;
pub mod topic;

pub use engine::{Broker, BrokerStats};
pub use subscriber::{SubscriberHandle, SubscriberId};

#[cfg(test)]
mod tests;
