//! # Result Cursors
//!
//! Lazy, finite, single-pass sequences over a server-side cursor, read in
//! batches. A cursor owns its pooled connection until it is exhausted or
//! dropped; dropping early kills the server cursor and returns the
//! connection. Change streams use the same types with a tailable cursor.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use futures_util::stream::{self, Stream};
use serde_json::Value;

use super::dispatcher::within;
use super::pool::{PooledAsync, PooledBlocking};
use super::transport::{CursorBatch, TransportError};
use crate::core::{DbError, DbResult};
use crate::response::{classify, Response};

/// Non-blocking cursor
pub struct Cursor {
    conn: PooledAsync,
    cursor_id: u64,
    buffer: VecDeque<Value>,
    batch_size: u32,
    deadline: Option<Duration>,
    done: bool,
}

impl Cursor {
    pub(crate) fn new(
        conn: PooledAsync,
        first: CursorBatch,
        batch_size: u32,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            conn,
            cursor_id: first.cursor_id,
            buffer: first.documents.into(),
            batch_size,
            deadline,
            done: false,
        }
    }

    /// Next document, fetching another batch when the buffer runs dry
    pub async fn next(&mut self) -> Option<DbResult<Value>> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                return Some(Ok(doc));
            }
            if self.done || self.cursor_id == 0 {
                return None;
            }

            let (cursor_id, batch_size) = (self.cursor_id, self.batch_size);
            let conn = &mut self.conn;
            match within(self.deadline, conn.get_more(cursor_id, batch_size)).await {
                Ok(batch) => {
                    self.cursor_id = batch.cursor_id;
                    self.buffer.extend(batch.documents);
                }
                Err(e) => return Some(Err(self.fail(e))),
            }
        }
    }

    /// Server cursor id, 0 once exhausted
    pub fn id(&self) -> u64 {
        self.cursor_id
    }

    /// Convert into a stream of documents
    pub fn into_stream(self) -> impl Stream<Item = DbResult<Value>> {
        stream::unfold(self, |mut cursor| async move {
            cursor.next().await.map(|item| (item, cursor))
        })
    }

    /// Drain the cursor into an envelope
    pub async fn to_response(mut self) -> Response {
        let mut docs = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(doc) => docs.push(doc),
                Err(e) => return Response::failure(&e, 0),
            }
        }
        Response::documents(docs)
    }

    fn fail(&mut self, err: TransportError) -> DbError {
        self.done = true;
        classify(err)
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.cursor_id != 0 {
            self.conn.kill_cursor(self.cursor_id);
        }
    }
}

/// Blocking cursor
pub struct BlockingCursor {
    conn: PooledBlocking,
    cursor_id: u64,
    buffer: VecDeque<Value>,
    batch_size: u32,
    deadline: Option<Duration>,
    done: bool,
}

impl BlockingCursor {
    pub(crate) fn new(
        conn: PooledBlocking,
        first: CursorBatch,
        batch_size: u32,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            conn,
            cursor_id: first.cursor_id,
            buffer: first.documents.into(),
            batch_size,
            deadline,
            done: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.cursor_id
    }

    /// Drain the cursor into an envelope
    pub fn to_response(self) -> Response {
        let mut docs = Vec::new();
        for item in self {
            match item {
                Ok(doc) => docs.push(doc),
                Err(e) => return Response::failure(&e, 0),
            }
        }
        Response::documents(docs)
    }
}

impl Iterator for BlockingCursor {
    type Item = DbResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                return Some(Ok(doc));
            }
            if self.done || self.cursor_id == 0 {
                return None;
            }

            let started = Instant::now();
            let expires_at = self.deadline.map(|d| started + d);
            let result = self.conn.get_more(self.cursor_id, self.batch_size, expires_at);
            let late = expires_at.map(|at| Instant::now() >= at).unwrap_or(false);

            match (result, self.deadline) {
                (Err(TransportError::Timeout(_)), Some(limit)) => {
                    self.done = true;
                    return Some(Err(DbError::Timeout(limit)));
                }
                (Ok(batch), Some(limit)) if late => {
                    self.cursor_id = batch.cursor_id;
                    self.done = true;
                    return Some(Err(DbError::Timeout(limit)));
                }
                (Ok(batch), _) => {
                    self.cursor_id = batch.cursor_id;
                    self.buffer.extend(batch.documents);
                }
                (Err(e), _) => {
                    self.done = true;
                    return Some(Err(classify(e)));
                }
            }
        }
    }
}

impl Drop for BlockingCursor {
    fn drop(&mut self) {
        if self.cursor_id != 0 {
            self.conn.kill_cursor(self.cursor_id);
        }
    }
}
