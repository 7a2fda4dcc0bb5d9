//! # Aggregation Pipeline
//!
//! Chainable builder for the supported stage subset
//! (`$match $group $sort $limit $skip $lookup $unwind $project`).

mod builder;
mod stage;

pub use builder::Pipeline;
pub use stage::{is_accumulator, Stage, ACCUMULATORS};
