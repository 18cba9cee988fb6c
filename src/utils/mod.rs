//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `connhub` crate.
//!
//! It centralizes the error taxonomy and logging setup so every component
//! reports failures and diagnostics the same way.

pub mod error;
pub mod logging;

pub use error::{AdmissionError, HubError, RegistryError, TransportError};
