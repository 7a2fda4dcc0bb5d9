//! In-memory document store
//!
//! Shared state behind both memory connection kinds. Every command is
//! executed by the same synchronous routine whichever connection kind
//! carries it; the kinds differ only in how they wait.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use super::aggregate::{project, run_pipeline, sort_documents};
use super::compare::{get_path, values_equal};
use super::matcher::matches;
use super::update::apply_update;
use crate::core::{
    AggregateCmd, Command, CountCmd, DeleteCmd, DistinctCmd, FindCmd, InsertCmd, UpdateCmd,
    WatchCmd,
};
use crate::dispatch::{CursorBatch, RawReply, TransportError, TransportResult};

/// Server error code for duplicate keys
pub const DUPLICATE_KEY: i32 = 11000;

/// Server error code for malformed commands
pub const BAD_VALUE: i32 = 2;

enum CursorState {
    /// Precomputed results not yet returned
    Buffered(VecDeque<Value>),
    /// Change stream positioned in the event log
    Tailing {
        collection: String,
        pipeline: Vec<Value>,
        position: usize,
    },
}

#[derive(Default)]
struct StoreState {
    collections: HashMap<String, Vec<Value>>,
    events: Vec<Value>,
    cursors: HashMap<u64, CursorState>,
    next_cursor: u64,
}

/// Counters exposed for tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub async_connections: u64,
    pub blocking_connections: u64,
    pub commands: u64,
    pub resets: u64,
    pub open_cursors: usize,
}

pub(crate) struct Inner {
    name: String,
    state: RwLock<StoreState>,
    faults: Mutex<VecDeque<TransportError>>,
    latency: Mutex<Option<Duration>>,
    unreachable: AtomicBool,
    /// Wakes tailing async cursors
    changed: Notify,
    /// Event-log generation, paired with `event_cv` for blocking waits
    generation: Mutex<u64>,
    event_cv: Condvar,
    pub(crate) async_connections: AtomicU64,
    pub(crate) blocking_connections: AtomicU64,
    commands: AtomicU64,
    pub(crate) resets: AtomicU64,
}

/// In-memory store implementing both connection kinds
#[derive(Clone)]
pub struct MemoryStore {
    pub(crate) inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("doclite")
    }
}

impl MemoryStore {
    /// Create an empty store for a database name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: RwLock::new(StoreState {
                    next_cursor: 1,
                    ..StoreState::default()
                }),
                faults: Mutex::new(VecDeque::new()),
                latency: Mutex::new(None),
                unreachable: AtomicBool::new(false),
                changed: Notify::new(),
                generation: Mutex::new(0),
                event_cv: Condvar::new(),
                async_connections: AtomicU64::new(0),
                blocking_connections: AtomicU64::new(0),
                commands: AtomicU64::new(0),
                resets: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // =========================================================================
    // Fixtures and fault injection
    // =========================================================================

    /// Load fixture documents directly, without events
    pub fn seed(&self, collection: &str, docs: impl IntoIterator<Item = Value>) {
        let mut state = self.write_state();
        let target = state.collections.entry(collection.to_string()).or_default();
        for mut doc in docs {
            ensure_id(&mut doc);
            target.push(doc);
        }
    }

    /// Snapshot of a collection in insertion order
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.read_state()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next command or cursor open with `err`
    pub fn fail_next(&self, err: TransportError) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    /// Delay every command and cursor read by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Refuse new connections and mark existing ones unhealthy
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            async_connections: self.inner.async_connections.load(Ordering::SeqCst),
            blocking_connections: self.inner.blocking_connections.load(Ordering::SeqCst),
            commands: self.inner.commands.load(Ordering::SeqCst),
            resets: self.inner.resets.load(Ordering::SeqCst),
            open_cursors: self.read_state().cursors.len(),
        }
    }

    pub(crate) fn is_unreachable(&self) -> bool {
        self.inner.unreachable.load(Ordering::SeqCst)
    }

    pub(crate) fn latency(&self) -> Option<Duration> {
        *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn take_fault(&self) -> Option<TransportError> {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Command execution
    // =========================================================================

    /// Execute a command to completion
    pub(crate) fn execute(&self, command: &Command) -> TransportResult<RawReply> {
        self.inner.commands.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        debug!(op = command.name(), collection = command.collection(), "memory store command");

        match command {
            Command::Insert(cmd) => self.insert(cmd),
            Command::Update(cmd) => self.update(cmd),
            Command::Delete(cmd) => self.delete(cmd),
            Command::Find(cmd) => self.find(cmd).map(RawReply::Documents),
            Command::Count(cmd) => self.count(cmd),
            Command::Distinct(cmd) => self.distinct(cmd),
            Command::Aggregate(cmd) => self.aggregate(cmd).map(RawReply::Documents),
            Command::Watch(_) => Err(bad_value("watch is only available through a cursor")),
        }
    }

    fn insert(&self, cmd: &InsertCmd) -> TransportResult<RawReply> {
        let mut ids = Vec::with_capacity(cmd.documents.len());
        let mut first_error = None;
        {
            let mut state = self.write_state();
            let mut events = Vec::new();
            let target = state.collections.entry(cmd.collection.clone()).or_default();

            for doc in &cmd.documents {
                let mut doc = doc.clone();
                if !doc.is_object() {
                    first_error.get_or_insert_with(|| bad_value("document must be an object"));
                    if cmd.ordered {
                        break;
                    }
                    continue;
                }
                let id = ensure_id(&mut doc);
                if target
                    .iter()
                    .any(|existing| existing.get("_id").map(|e| values_equal(e, &id)) == Some(true))
                {
                    first_error.get_or_insert_with(|| TransportError::Server {
                        code: DUPLICATE_KEY,
                        message: format!(
                            "E11000 duplicate key error collection: {}.{} dup key: {{ _id: {} }}",
                            self.inner.name, cmd.collection, id
                        ),
                    });
                    if cmd.ordered {
                        break;
                    }
                    continue;
                }
                events.push(change_event(&self.inner.name, &cmd.collection, "insert", &id, Some(&doc)));
                target.push(doc);
                ids.push(id);
            }
            state.events.extend(events);
        }
        self.notify_change();

        match first_error {
            None => Ok(RawReply::Inserted { ids }),
            Some(err) if ids.is_empty() => Err(err),
            Some(err) => Err(TransportError::Partial {
                affected: ids.len() as u64,
                message: err.to_string(),
            }),
        }
    }

    fn update(&self, cmd: &UpdateCmd) -> TransportResult<RawReply> {
        let (mut matched, mut modified) = (0u64, 0u64);
        let mut failure = None;
        {
            let mut state = self.write_state();
            let mut events = Vec::new();
            if let Some(docs) = state.collections.get_mut(&cmd.collection) {
                for doc in docs.iter_mut() {
                    match matches(doc, &cmd.filter) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                    matched += 1;
                    let mut next = doc.clone();
                    match apply_update(&mut next, &cmd.update) {
                        Ok(true) => {
                            let id = next.get("_id").cloned().unwrap_or(Value::Null);
                            events.push(change_event(
                                &self.inner.name,
                                &cmd.collection,
                                "update",
                                &id,
                                Some(&next),
                            ));
                            *doc = next;
                            modified += 1;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                    if !cmd.multi {
                        break;
                    }
                }
            }
            state.events.extend(events);
        }
        self.notify_change();

        match failure {
            None => Ok(RawReply::Updated { matched, modified }),
            Some(message) if modified > 0 => Err(TransportError::Partial {
                affected: modified,
                message,
            }),
            Some(message) => Err(bad_value(message)),
        }
    }

    fn delete(&self, cmd: &DeleteCmd) -> TransportResult<RawReply> {
        let mut removed = Vec::new();
        {
            let mut state = self.write_state();
            if let Some(docs) = state.collections.get_mut(&cmd.collection) {
                let mut hits = Vec::new();
                for (i, doc) in docs.iter().enumerate() {
                    if matches(doc, &cmd.filter).map_err(bad_value)? {
                        hits.push(i);
                        if !cmd.multi {
                            break;
                        }
                    }
                }
                for i in hits.into_iter().rev() {
                    removed.push(docs.remove(i));
                }
                removed.reverse();
            }
            let events: Vec<Value> = removed
                .iter()
                .map(|doc| {
                    let id = doc.get("_id").cloned().unwrap_or(Value::Null);
                    change_event(&self.inner.name, &cmd.collection, "delete", &id, None)
                })
                .collect();
            state.events.extend(events);
        }
        self.notify_change();
        Ok(RawReply::Deleted {
            deleted: removed.len() as u64,
        })
    }

    fn find(&self, cmd: &FindCmd) -> TransportResult<Vec<Value>> {
        let mut docs = self.matching(&cmd.collection, &cmd.filter)?;
        if let Some(sort) = &cmd.sort {
            sort_documents(&mut docs, sort).map_err(bad_value)?;
        }
        let docs = docs.into_iter().skip(cmd.skip as usize);
        let docs: Vec<Value> = match cmd.limit {
            Some(n) if n > 0 => docs.take(n as usize).collect(),
            _ => docs.collect(),
        };
        match &cmd.projection {
            Some(Value::Object(spec)) => docs
                .iter()
                .map(|doc| project(doc, spec))
                .collect::<Result<Vec<_>, _>>()
                .map_err(bad_value),
            Some(_) => Err(bad_value("projection must be an object")),
            None => Ok(docs),
        }
    }

    fn count(&self, cmd: &CountCmd) -> TransportResult<RawReply> {
        let n = self.matching(&cmd.collection, &cmd.filter)?.len();
        Ok(RawReply::Count(n as u64))
    }

    fn distinct(&self, cmd: &DistinctCmd) -> TransportResult<RawReply> {
        let mut values: Vec<Value> = Vec::new();
        for doc in self.matching(&cmd.collection, &cmd.filter)? {
            let found = match get_path(&doc, &cmd.field) {
                Some(Value::Array(items)) => items.clone(),
                Some(v) => vec![v.clone()],
                None => Vec::new(),
            };
            for v in found {
                if !values.iter().any(|seen| values_equal(seen, &v)) {
                    values.push(v);
                }
            }
        }
        Ok(RawReply::Values(values))
    }

    fn aggregate(&self, cmd: &AggregateCmd) -> TransportResult<Vec<Value>> {
        let docs = self.documents(&cmd.collection);
        let resolve = |name: &str| self.documents(name);
        run_pipeline(docs, &cmd.pipeline, &resolve).map_err(bad_value)
    }

    fn matching(&self, collection: &str, filter: &Value) -> TransportResult<Vec<Value>> {
        let state = self.read_state();
        let Some(docs) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for doc in docs {
            if matches(doc, filter).map_err(bad_value)? {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }

    fn notify_change(&self) {
        let mut generation = self
            .inner
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        self.inner.event_cv.notify_all();
        drop(generation);
        self.inner.changed.notify_waiters();
    }

    // =========================================================================
    // Cursors
    // =========================================================================

    /// Open a cursor and return its first batch
    pub(crate) fn open_cursor(&self, command: &Command, batch_size: u32) -> TransportResult<CursorBatch> {
        self.inner.commands.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }

        let state = match command {
            Command::Find(cmd) => CursorState::Buffered(self.find(cmd)?.into()),
            Command::Aggregate(cmd) => CursorState::Buffered(self.aggregate(cmd)?.into()),
            Command::Watch(WatchCmd {
                collection,
                pipeline,
            }) => {
                // Validate the pipeline before registering the stream
                run_pipeline(Vec::new(), pipeline, &no_collections).map_err(bad_value)?;
                CursorState::Tailing {
                    collection: collection.clone(),
                    pipeline: pipeline.clone(),
                    position: self.read_state().events.len(),
                }
            }
            other => {
                return Err(bad_value(format!(
                    "{} does not produce a cursor",
                    other.name()
                )))
            }
        };

        let mut store = self.write_state();
        let id = store.next_cursor;
        store.next_cursor += 1;
        store.cursors.insert(id, state);
        drop(store);

        self.next_batch(id, batch_size).map(|batch| {
            batch.unwrap_or(CursorBatch {
                cursor_id: id,
                documents: Vec::new(),
            })
        })
    }

    /// Read up to `batch_size` documents; `None` when a tailing cursor has
    /// nothing new yet
    pub(crate) fn next_batch(&self, cursor_id: u64, batch_size: u32) -> TransportResult<Option<CursorBatch>> {
        let mut store = self.write_state();
        let StoreState {
            cursors, events, ..
        } = &mut *store;
        let Some(cursor) = cursors.get_mut(&cursor_id) else {
            return Err(TransportError::Server {
                code: 43,
                message: format!("cursor id {} not found", cursor_id),
            });
        };
        let limit = batch_size.max(1) as usize;

        match cursor {
            CursorState::Buffered(buffer) => {
                let take = limit.min(buffer.len());
                let documents: Vec<Value> = buffer.drain(..take).collect();
                let id = if buffer.is_empty() {
                    cursors.remove(&cursor_id);
                    0
                } else {
                    cursor_id
                };
                Ok(Some(CursorBatch {
                    cursor_id: id,
                    documents,
                }))
            }
            CursorState::Tailing {
                collection,
                pipeline,
                position,
            } => {
                let mut documents = Vec::new();
                while *position < events.len() && documents.len() < limit {
                    let event = &events[*position];
                    *position += 1;
                    if event["ns"]["coll"] != Value::String(collection.clone()) {
                        continue;
                    }
                    let passed = run_pipeline(vec![event.clone()], pipeline, &no_collections)
                        .map_err(bad_value)?;
                    documents.extend(passed);
                }
                if documents.is_empty() {
                    return Ok(None);
                }
                Ok(Some(CursorBatch {
                    cursor_id,
                    documents,
                }))
            }
        }
    }

    /// Blocking read; tailing cursors wait for events until the deadline
    pub(crate) fn get_more_blocking(
        &self,
        cursor_id: u64,
        batch_size: u32,
        deadline: Option<Instant>,
    ) -> TransportResult<CursorBatch> {
        let started = Instant::now();
        let mut generation = self
            .inner
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(batch) = self.next_batch(cursor_id, batch_size)? {
                return Ok(batch);
            }
            generation = match deadline {
                None => self
                    .inner
                    .event_cv
                    .wait(generation)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(at) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(TransportError::Timeout(started.elapsed()));
                    }
                    self.inner
                        .event_cv
                        .wait_timeout(generation, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Non-blocking read; tailing cursors wait for events
    pub(crate) async fn get_more_async(&self, cursor_id: u64, batch_size: u32) -> TransportResult<CursorBatch> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(batch) = self.next_batch(cursor_id, batch_size)? {
                return Ok(batch);
            }
            notified.await;
        }
    }

    /// Release a cursor
    pub(crate) fn kill_cursor(&self, cursor_id: u64) {
        self.write_state().cursors.remove(&cursor_id);
    }
}

/// Ensure a document has an `_id`, returning it
fn ensure_id(doc: &mut Value) -> Value {
    if let Some(id) = doc.get("_id") {
        return id.clone();
    }
    let id = Value::String(Uuid::new_v4().to_string());
    if let Value::Object(map) = doc {
        map.insert("_id".to_string(), id.clone());
    }
    id
}

fn change_event(db: &str, collection: &str, operation: &str, id: &Value, full: Option<&Value>) -> Value {
    let mut event = json!({
        "operationType": operation,
        "ns": {"db": db, "coll": collection},
        "documentKey": {"_id": id},
        "wallTime": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    });
    if let (Some(full), Value::Object(map)) = (full, &mut event) {
        map.insert("fullDocument".to_string(), full.clone());
    }
    event
}

fn no_collections(_: &str) -> Vec<Value> {
    Vec::new()
}

fn bad_value(message: impl Into<String>) -> TransportError {
    TransportError::Server {
        code: BAD_VALUE,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(store: &MemoryStore, docs: Vec<Value>, ordered: bool) -> TransportResult<RawReply> {
        store.execute(&Command::Insert(InsertCmd {
            collection: "users".to_string(),
            documents: docs,
            ordered,
        }))
    }

    #[test]
    fn test_insert_assigns_ids() {
        let store = MemoryStore::default();
        let reply = insert(&store, vec![json!({"name": "a"}), json!({"_id": 7, "name": "b"})], true).unwrap();
        match reply {
            RawReply::Inserted { ids } => {
                assert_eq!(ids.len(), 2);
                assert!(ids[0].is_string());
                assert_eq!(ids[1], json!(7));
            }
            other => panic!("Expected Inserted, got {:?}", other),
        }
        assert_eq!(store.documents("users").len(), 2);
    }

    #[test]
    fn test_ordered_insert_partial_failure() {
        let store = MemoryStore::default();
        store.seed("users", vec![json!({"_id": 3})]);
        let err = insert(
            &store,
            vec![json!({"_id": 1}), json!({"_id": 2}), json!({"_id": 3}), json!({"_id": 4})],
            true,
        )
        .unwrap_err();
        match err {
            TransportError::Partial { affected, message } => {
                assert_eq!(affected, 2);
                assert!(message.starts_with("E11000 duplicate key error"));
            }
            other => panic!("Expected Partial, got {:?}", other),
        }
        assert_eq!(store.documents("users").len(), 3);
    }

    #[test]
    fn test_unordered_insert_continues() {
        let store = MemoryStore::default();
        store.seed("users", vec![json!({"_id": 1})]);
        let err = insert(&store, vec![json!({"_id": 1}), json!({"_id": 2})], false).unwrap_err();
        assert!(matches!(err, TransportError::Partial { affected: 1, .. }));
    }

    #[test]
    fn test_duplicate_only_is_server_error() {
        let store = MemoryStore::default();
        store.seed("users", vec![json!({"_id": 1})]);
        let err = insert(&store, vec![json!({"_id": 1})], true).unwrap_err();
        assert!(matches!(err, TransportError::Server { code: DUPLICATE_KEY, .. }));
    }

    #[test]
    fn test_fault_injection() {
        let store = MemoryStore::default();
        store.fail_next(TransportError::Other("boom".into()));
        assert!(insert(&store, vec![json!({})], true).is_err());
        assert!(insert(&store, vec![json!({})], true).is_ok());
    }

    #[test]
    fn test_buffered_cursor_batches() {
        let store = MemoryStore::default();
        store.seed("users", (0..5).map(|i| json!({"_id": i})));
        let find = Command::Find(FindCmd {
            collection: "users".to_string(),
            filter: json!({}),
            sort: None,
            projection: None,
            skip: 0,
            limit: None,
        });

        let first = store.open_cursor(&find, 2).unwrap();
        assert_eq!(first.documents.len(), 2);
        assert_ne!(first.cursor_id, 0);
        assert_eq!(store.stats().open_cursors, 1);

        let second = store.next_batch(first.cursor_id, 2).unwrap().unwrap();
        assert_eq!(second.documents.len(), 2);
        let last = store.next_batch(first.cursor_id, 2).unwrap().unwrap();
        assert_eq!(last.documents.len(), 1);
        assert_eq!(last.cursor_id, 0);
        assert_eq!(store.stats().open_cursors, 0);
    }

    #[test]
    fn test_watch_sees_later_writes_only() {
        let store = MemoryStore::default();
        insert(&store, vec![json!({"_id": "before"})], true).unwrap();

        let watch = Command::Watch(WatchCmd {
            collection: "users".to_string(),
            pipeline: vec![json!({"$match": {"operationType": "insert"}})],
        });
        let first = store.open_cursor(&watch, 10).unwrap();
        assert!(first.documents.is_empty());
        assert_ne!(first.cursor_id, 0);

        insert(&store, vec![json!({"_id": "after"})], true).unwrap();
        let batch = store
            .get_more_blocking(first.cursor_id, 10, Some(Instant::now() + Duration::from_secs(1)))
            .unwrap();
        assert_eq!(batch.documents.len(), 1);
        assert_eq!(batch.documents[0]["documentKey"]["_id"], json!("after"));
        assert_eq!(batch.documents[0]["fullDocument"]["_id"], json!("after"));
    }

    #[test]
    fn test_watch_blocking_times_out() {
        let store = MemoryStore::default();
        let watch = Command::Watch(WatchCmd {
            collection: "users".to_string(),
            pipeline: Vec::new(),
        });
        let first = store.open_cursor(&watch, 10).unwrap();
        let result = store.get_more_blocking(
            first.cursor_id,
            10,
            Some(Instant::now() + Duration::from_millis(20)),
        );
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }
}
