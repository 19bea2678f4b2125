//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `relaybus` crate.
//!
//! It centralizes the error types, logging setup, the clock abstraction used
//! to stamp messages and the message logger sink.

pub mod clock;
pub mod error;
pub mod log_sink;
pub mod logging;

#[cfg(test)]
mod tests;
