//! Request Context
//!
//! Per-call context carried through dispatch: the execution mode chosen by
//! the entry point, the effective deadline and tracing metadata.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport binding for one logical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Blocks the calling thread until the transport returns
    Sync,
    /// Suspends at the transport boundary
    Async,
}

impl ExecutionMode {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sync => "sync",
            ExecutionMode::Async => "async",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Context carried through one dispatch
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request ID for tracing
    pub request_id: Uuid,

    /// Resolved once at call entry
    pub mode: ExecutionMode,

    /// Caller-supplied bound on the whole operation
    pub deadline: Option<Duration>,

    /// Start time for duration tracking
    started_at: Instant,
}

impl RequestContext {
    /// Create a new request context
    pub fn new(mode: ExecutionMode, deadline: Option<Duration>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            mode,
            deadline,
            started_at: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    /// Absolute instant at which the deadline expires
    pub fn expires_at(&self) -> Option<Instant> {
        self.deadline.map(|d| self.started_at + d)
    }

    /// Whether the deadline has already passed
    pub fn is_expired(&self) -> bool {
        self.expires_at()
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!(ExecutionMode::Sync.to_string(), "sync");
        assert_eq!(ExecutionMode::Async.to_string(), "async");
    }

    #[test]
    fn test_unbounded_context_never_expires() {
        let ctx = RequestContext::new(ExecutionMode::Sync, None);
        assert!(ctx.expires_at().is_none());
        assert!(!ctx.is_expired());
    }

    #[test]
    fn test_zero_deadline_is_expired() {
        let ctx = RequestContext::new(ExecutionMode::Async, Some(Duration::ZERO));
        assert!(ctx.is_expired());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestContext::new(ExecutionMode::Async, None);
        let b = RequestContext::new(ExecutionMode::Async, None);
        assert_ne!(a.request_id, b.request_id);
    }
}
