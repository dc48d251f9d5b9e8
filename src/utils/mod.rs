//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `livesub` server.
//!
//! - `error`: the error enums for every layer (broker, session, protocol, transport).
//! - `logging`: one-shot `tracing` subscriber initialisation.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests;
