//! # Transport Boundary
//!
//! The connection layer the dispatcher drives. Two connection kinds exist,
//! one per execution mode, and a connector opens either. Compiled commands
//! cross this boundary unchanged in both modes.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use crate::core::Command;

/// Boxed future returned by non-blocking connections
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw result of a transport call
pub type TransportResult<T> = Result<T, TransportError>;

/// Raw store reply, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawReply {
    /// Matched documents
    Documents(Vec<Value>),
    /// At most one document
    Document(Option<Value>),
    /// Ids of inserted documents
    Inserted { ids: Vec<Value> },
    /// Update outcome
    Updated { matched: u64, modified: u64 },
    /// Delete outcome
    Deleted { deleted: u64 },
    /// Count outcome
    Count(u64),
    /// Distinct values
    Values(Vec<Value>),
}

/// One batch read from a server-side cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorBatch {
    /// Server cursor id, 0 once the cursor is exhausted
    pub cursor_id: u64,
    pub documents: Vec<Value>,
}

impl CursorBatch {
    pub fn is_exhausted(&self) -> bool {
        self.cursor_id == 0
    }
}

/// Transport failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("transport deadline of {}ms exceeded", .0.as_millis())]
    Timeout(Duration),

    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("transport unreachable: {0}")]
    Unreachable(String),

    /// Failure reported by the store
    #[error("{message}")]
    Server { code: i32, message: String },

    /// Batch write interrupted after `affected` documents were written
    #[error("{message}")]
    Partial { affected: u64, message: String },

    #[error("{0}")]
    Other(String),
}

/// Connection used by the non-blocking path
pub trait AsyncConnection: Send {
    /// Run a command to completion
    fn execute<'a>(&'a mut self, command: &'a Command) -> TransportFuture<'a, TransportResult<RawReply>>;

    /// Open a server-side cursor and read its first batch
    fn open_cursor<'a>(
        &'a mut self,
        command: &'a Command,
        batch_size: u32,
    ) -> TransportFuture<'a, TransportResult<CursorBatch>>;

    /// Read the next batch; tailable cursors wait for new data
    fn get_more(
        &mut self,
        cursor_id: u64,
        batch_size: u32,
    ) -> TransportFuture<'_, TransportResult<CursorBatch>>;

    /// Release a server-side cursor, callable from `Drop`
    fn kill_cursor(&mut self, cursor_id: u64);

    /// Discard in-flight state so the connection can be reused
    fn reset(&mut self);

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Connection used by the blocking path
///
/// Blocking calls receive the caller's deadline and must return
/// [`TransportError::Timeout`] instead of waiting past it.
pub trait BlockingConnection: Send {
    fn execute(&mut self, command: &Command, deadline: Option<Instant>) -> TransportResult<RawReply>;

    fn open_cursor(
        &mut self,
        command: &Command,
        batch_size: u32,
        deadline: Option<Instant>,
    ) -> TransportResult<CursorBatch>;

    fn get_more(
        &mut self,
        cursor_id: u64,
        batch_size: u32,
        deadline: Option<Instant>,
    ) -> TransportResult<CursorBatch>;

    fn kill_cursor(&mut self, cursor_id: u64);

    fn reset(&mut self);

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Opens connections of either kind
pub trait Connector: Send + Sync {
    fn connect_async(&self) -> TransportFuture<'_, TransportResult<Box<dyn AsyncConnection>>>;

    fn connect_blocking(&self) -> TransportResult<Box<dyn BlockingConnection>>;
}
