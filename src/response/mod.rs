//! # Response Envelope & Error Normalizer
//!
//! Uniform `{success, data, count, message}` results and the mapping from
//! transport outcomes into them.

mod envelope;
mod normalize;

pub use envelope::{Response, ResponseData};
pub use normalize::{classify, normalize};
