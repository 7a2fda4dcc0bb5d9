//! # Error Normalizer
//!
//! The only place transport results become envelopes. Every failure is
//! classified into the error taxonomy; nothing raw escapes.

use super::envelope::{plural, Response};
use crate::core::DbError;
use crate::dispatch::{RawReply, TransportError};

/// Convert a raw transport outcome into an envelope
pub fn normalize(result: Result<RawReply, TransportError>) -> Response {
    match result {
        Ok(reply) => from_reply(reply),
        Err(err) => {
            let affected = match &err {
                TransportError::Partial { affected, .. } => *affected,
                _ => 0,
            };
            Response::failure(&classify(err), affected)
        }
    }
}

/// Map a transport failure into the error taxonomy
pub fn classify(err: TransportError) -> DbError {
    match err {
        TransportError::Timeout(after) => DbError::Timeout(after),
        TransportError::PoolExhausted => DbError::connection("connection pool exhausted"),
        TransportError::Unreachable(msg) => DbError::connection(msg),
        TransportError::Server { message, .. } => DbError::Store(message),
        TransportError::Partial { message, .. } => DbError::Store(message),
        TransportError::Other(message) => DbError::Store(message),
    }
}

fn from_reply(reply: RawReply) -> Response {
    match reply {
        RawReply::Documents(docs) => Response::documents(docs),
        RawReply::Document(doc) => Response::single(doc),
        RawReply::Inserted { ids } => Response::inserted(ids),
        RawReply::Updated { matched, modified } => Response::affected(
            modified,
            format!("Updated {} ({} matched)", plural(modified, "document"), matched),
        ),
        RawReply::Deleted { deleted } => {
            Response::affected(deleted, format!("Deleted {}", plural(deleted, "document")))
        }
        RawReply::Count(n) => Response::counted(n),
        RawReply::Values(values) => Response::values(values),
    }
}
