//! # Core Module
//!
//! Shared abstractions used by every layer: the command model, the error
//! taxonomy, per-call context, configuration and query hooks.

pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod operation;

pub use config::{ClientConfig, PoolConfig};
pub use context::{ExecutionMode, RequestContext};
pub use error::{DbError, DbResult, ErrorKind};
pub use hooks::{HookRegistry, QueryHook};
pub use operation::{
    AggregateCmd, Command, CountCmd, DeleteCmd, DistinctCmd, FindCmd, InsertCmd, UpdateCmd,
    WatchCmd,
};
