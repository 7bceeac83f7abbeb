//! Error types for store operations.

use thiserror::Error;

/// Error type for store operations.
///
/// Backend errors fall into two groups so that callers (most importantly
/// the circuit breaker) can treat them appropriately.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Internal backend error, state or computation error.
    ///
    /// Any error not related to network interaction.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),

    /// Network interaction error.
    ///
    /// Errors occurring during communication with remote backends.
    #[error(transparent)]
    Connection(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps any error as an internal store error.
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Internal(Box::new(error))
    }

    /// Wraps any error as a connection error.
    pub fn connection<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Connection(Box::new(error))
    }
}
