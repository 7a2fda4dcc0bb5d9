//! # In-Memory Reference Store
//!
//! A process-local document store implementing both connection kinds and
//! the wire vocabulary the compilers emit. Used as the fixture backend for
//! tests and for running without a server. Supports injected latency and
//! failures for deadline and error-path testing.

mod aggregate;
mod compare;
mod connection;
mod matcher;
mod store;
mod update;

pub use connection::{MemoryAsyncConnection, MemoryBlockingConnection};
pub use matcher::matches;
pub use store::{MemoryStats, MemoryStore, BAD_VALUE, DUPLICATE_KEY};
