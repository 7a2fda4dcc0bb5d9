//! # Dual-Mode Execution Dispatcher
//!
//! Transport traits, per-mode connection pools, the dispatcher and the
//! cursors it hands out.

mod cursor;
mod dispatcher;
mod pool;
mod transport;

pub use cursor::{BlockingCursor, Cursor};
pub use dispatcher::Dispatcher;
pub use pool::{AsyncPool, BlockingPool, PoolStats, PooledAsync, PooledBlocking};
pub use transport::{
    AsyncConnection, BlockingConnection, Connector, CursorBatch, RawReply, TransportError,
    TransportFuture, TransportResult,
};
