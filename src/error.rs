//! Error types for the reqwest-rotating-proxy crate.

use thiserror::Error;

/// Error returned when the pool is empty even after a forced reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No proxy available in pool")]
pub struct PoolExhausted;
