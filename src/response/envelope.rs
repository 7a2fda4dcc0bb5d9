//! # Response Envelope
//!
//! The uniform result of every operation. Messages are built from counts
//! only, so the same outcome always serializes to the same bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{DbError, ErrorKind};

/// Envelope payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    /// No payload (writes, failures, empty single reads)
    #[default]
    Empty,
    /// Matched documents, inserted ids or distinct values
    Many(Vec<Value>),
    /// A single document
    One(Value),
}

impl ResponseData {
    pub fn len(&self) -> usize {
        match self {
            ResponseData::Empty => 0,
            ResponseData::Many(items) => items.len(),
            ResponseData::One(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Uniform operation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub data: ResponseData,
    /// Returned documents for reads, affected documents for writes. A
    /// `count` command is a tally like a write: `data` stays empty and the
    /// number of matching documents is carried here.
    pub count: u64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl Response {
    /// Create a read response carrying documents
    pub fn documents(docs: Vec<Value>) -> Self {
        let count = docs.len() as u64;
        Self::ok(
            ResponseData::Many(docs),
            count,
            format!("Found {}", plural(count, "document")),
        )
    }

    /// Create a read response for at most one document
    pub fn single(doc: Option<Value>) -> Self {
        match doc {
            Some(doc) => Self::ok(ResponseData::One(doc), 1, "Found 1 document".to_string()),
            None => Self::ok(ResponseData::Empty, 0, "No document found".to_string()),
        }
    }

    /// Create an insert response carrying the inserted ids
    pub fn inserted(ids: Vec<Value>) -> Self {
        let count = ids.len() as u64;
        Self::ok(
            ResponseData::Many(ids),
            count,
            format!("Inserted {}", plural(count, "document")),
        )
    }

    /// Create a write response with an affected count
    pub fn affected(count: u64, message: impl Into<String>) -> Self {
        Self::ok(ResponseData::Empty, count, message.into())
    }

    /// Create a count response; the tally lives in `count`, not `data`
    pub fn counted(count: u64) -> Self {
        Self::ok(
            ResponseData::Empty,
            count,
            format!("Counted {}", plural(count, "document")),
        )
    }

    /// Create a distinct response
    pub fn values(values: Vec<Value>) -> Self {
        let count = values.len() as u64;
        Self::ok(
            ResponseData::Many(values),
            count,
            format!("Found {}", plural(count, "distinct value")),
        )
    }

    /// Create a failed response; `affected` counts writes applied before
    /// the failure
    pub fn failure(error: &DbError, affected: u64) -> Self {
        Self {
            success: false,
            data: ResponseData::Empty,
            count: affected,
            message: error.to_string(),
            error: Some(error.kind()),
        }
    }

    fn ok(data: ResponseData, count: u64, message: String) -> Self {
        Self {
            success: true,
            data,
            count,
            message,
            error: None,
        }
    }

    /// Returned documents (empty for writes and failures)
    pub fn docs(&self) -> &[Value] {
        match &self.data {
            ResponseData::Empty => &[],
            ResponseData::Many(items) => items,
            ResponseData::One(doc) => std::slice::from_ref(doc),
        }
    }

    /// Take the returned documents
    pub fn into_docs(self) -> Vec<Value> {
        match self.data {
            ResponseData::Empty => Vec::new(),
            ResponseData::Many(items) => items,
            ResponseData::One(doc) => vec![doc],
        }
    }

    /// First returned document
    pub fn first(&self) -> Option<&Value> {
        self.docs().first()
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Error code of a failed response
    pub fn error_code(&self) -> Option<&'static str> {
        self.error.map(|kind| kind.code())
    }
}

pub(crate) fn plural(count: u64, noun: &str) -> String {
    if count == 1 {
        format!("1 {}", noun)
    } else {
        format!("{} {}s", count, noun)
    }
}
