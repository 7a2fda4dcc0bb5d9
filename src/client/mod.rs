//! # Client Surface
//!
//! The explicit [`Database`] context and the operations reachable from it.

mod collection;
mod database;
mod op;

pub use collection::Collection;
pub use database::Database;
pub use op::{Find, Op};
