//! doclite - declarative filters and aggregation pipelines for document
//! stores, executed through a blocking or a non-blocking transport
//!
//! Filters and pipelines compile to canonical wire documents. The same
//! compiled command runs unchanged through either mode and comes back as
//! the same [`Response`] envelope.

pub mod client;
pub mod core;
pub mod dispatch;
pub mod filter;
pub mod memory;
pub mod pipeline;
pub mod response;
pub mod schema;

pub use client::{Collection, Database, Find, Op};
pub use self::core::{ClientConfig, DbError, DbResult, ErrorKind, ExecutionMode, QueryHook};
pub use filter::{Filter, Node, Operator};
pub use pipeline::Pipeline;
pub use response::{Response, ResponseData};
pub use schema::{FieldType, Schema, SchemaRegistry};
