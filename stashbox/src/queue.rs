//! Background refresh handoff to an external job queue.
//!
//! The engine never runs queued work itself. `refresh_async` and
//! `async_swr` validate a serializable callback descriptor, package it
//! into a [`RefreshJob`], and hand it to the host's [`JobQueue`]. The
//! worker on the other side resolves the descriptor, invokes the
//! producer, and writes the result back under the same key.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CacheError;

/// Default number of delivery attempts for a refresh job.
pub const DEFAULT_JOB_ATTEMPTS: u32 = 3;

/// Default backoff between delivery attempts.
pub const DEFAULT_JOB_BACKOFF: Duration = Duration::from_secs(10);

/// Error type for queue dispatch.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue rejected the job.
    #[error(transparent)]
    Dispatch(Box<dyn std::error::Error + Send + Sync>),
}

/// A serializable reference to a producer the worker can invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallbackDescriptor {
    /// A `Class@method` pair.
    ClassMethod {
        /// Fully qualified class or type path.
        class: String,
        /// Method name on the class.
        method: String,
    },
    /// An invokable class; the worker calls its call operator.
    Invokable {
        /// Fully qualified class or type path.
        class: String,
    },
}

impl CallbackDescriptor {
    /// Parses `"Class@method"` or a bare invokable class name.
    ///
    /// Fails fast on empty segments, embedded whitespace, or more than
    /// one `@`.
    pub fn parse(descriptor: &str) -> Result<Self, CacheError> {
        if descriptor.is_empty() || descriptor.chars().any(char::is_whitespace) {
            return Err(CacheError::InvalidCallback(descriptor.to_owned()));
        }
        let mut parts = descriptor.split('@');
        let class = parts.next().unwrap_or_default();
        match (class, parts.next(), parts.next()) {
            (class, None, _) if !class.is_empty() => Ok(CallbackDescriptor::Invokable {
                class: class.to_owned(),
            }),
            (class, Some(method), None) if !class.is_empty() && !method.is_empty() => {
                Ok(CallbackDescriptor::ClassMethod {
                    class: class.to_owned(),
                    method: method.to_owned(),
                })
            }
            _ => Err(CacheError::InvalidCallback(descriptor.to_owned())),
        }
    }

    /// Builds a descriptor from a `[class, method]` pair.
    pub fn from_pair(class: &str, method: &str) -> Result<Self, CacheError> {
        if class.is_empty()
            || method.is_empty()
            || class.chars().any(char::is_whitespace)
            || method.chars().any(char::is_whitespace)
        {
            return Err(CacheError::InvalidCallback(format!("[{class}, {method}]")));
        }
        Ok(CallbackDescriptor::ClassMethod {
            class: class.to_owned(),
            method: method.to_owned(),
        })
    }
}

/// A refresh job handed to the external queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshJob {
    /// Fully-prefixed target key.
    pub key: String,
    /// Producer the worker invokes.
    pub callback: CallbackDescriptor,
    /// TTL for the rewritten value.
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,
    /// Tags to attach to the rewritten value.
    pub tags: Vec<String>,
    /// Delivery attempts before the queue's failure path takes over.
    pub attempts: u32,
    /// Backoff between delivery attempts.
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
}

impl RefreshJob {
    /// Builds a job with the default retry policy.
    pub fn new(key: String, callback: CallbackDescriptor, ttl: Option<Duration>) -> Self {
        Self {
            key,
            callback,
            ttl,
            tags: Vec::new(),
            attempts: DEFAULT_JOB_ATTEMPTS,
            backoff: DEFAULT_JOB_BACKOFF,
        }
    }

    /// Attaches tags to the job.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// The host job queue the engine dispatches refresh jobs to.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues one job. Fire-and-forget from the engine's perspective;
    /// retry exhaustion surfaces through the queue's own failure path.
    async fn dispatch(&self, job: RefreshJob) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_method_descriptors_parse() {
        assert_eq!(
            CallbackDescriptor::parse("reports::Builder@rebuild").unwrap(),
            CallbackDescriptor::ClassMethod {
                class: "reports::Builder".into(),
                method: "rebuild".into(),
            }
        );
        assert_eq!(
            CallbackDescriptor::parse("reports::Rebuild").unwrap(),
            CallbackDescriptor::Invokable {
                class: "reports::Rebuild".into(),
            }
        );
    }

    #[test]
    fn malformed_descriptors_fail_fast() {
        for bad in ["", "@", "a@", "@b", "a@b@c", "with space@m"] {
            assert!(
                matches!(
                    CallbackDescriptor::parse(bad),
                    Err(CacheError::InvalidCallback(_))
                ),
                "{bad:?} should be rejected"
            );
        }
        assert!(CallbackDescriptor::from_pair("", "m").is_err());
        assert!(CallbackDescriptor::from_pair("C", "").is_err());
    }

    #[test]
    fn jobs_carry_the_default_retry_policy() {
        let job = RefreshJob::new(
            "k".into(),
            CallbackDescriptor::parse("C@m").unwrap(),
            Some(Duration::from_secs(60)),
        );
        assert_eq!(job.attempts, DEFAULT_JOB_ATTEMPTS);
        assert_eq!(job.backoff, DEFAULT_JOB_BACKOFF);
    }
}
