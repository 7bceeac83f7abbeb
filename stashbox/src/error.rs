//! Error types for cache operations.

use thiserror::Error;

use stashbox_backend::StoreError;

use crate::queue::QueueError;
use crate::strategy::StrategyError;

/// Error type returned by the cache façade.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A value-transformation strategy failed and fallback was disabled.
    #[error("strategy failed: {0}")]
    Strategy(#[from] StrategyError),

    /// A serializable callback descriptor could not be parsed.
    #[error("invalid callback descriptor: {0}")]
    InvalidCallback(String),

    /// The external job queue rejected a dispatch.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A user-supplied producer failed.
    #[error("producer failed: {0}")]
    Producer(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CacheError {
    /// Wraps a producer failure.
    pub fn producer<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CacheError::Producer(Box::new(error))
    }
}
