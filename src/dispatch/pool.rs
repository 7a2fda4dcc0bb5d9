//! # Connection Pools
//!
//! One pool per execution mode; a connection opened for one mode never
//! serves the other. Guards return their connection on drop. A guard whose
//! call was abandoned mid-flight (deadline, cancelled future) resets the
//! connection before it goes back to the idle list.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::transport::{
    AsyncConnection, BlockingConnection, Connector, CursorBatch, RawReply, TransportError,
    TransportResult,
};
use crate::core::{Command, PoolConfig};

// =============================================================================
// Pool Statistics
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    acquired: AtomicU64,
    resets: AtomicU64,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub acquired: u64,
    pub resets: u64,
    pub idle: usize,
    pub max_size: usize,
}

// =============================================================================
// Async Pool
// =============================================================================

/// Pool of non-blocking connections
pub struct AsyncPool {
    connector: Arc<dyn Connector>,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Box<dyn AsyncConnection>>>>,
    counters: Arc<Counters>,
    max_size: usize,
    acquire_timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl AsyncPool {
    /// Create a new pool; connections are opened lazily
    pub fn new(connector: Arc<dyn Connector>, config: &PoolConfig) -> Self {
        Self {
            connector,
            permits: Arc::new(Semaphore::new(config.max_size)),
            idle: Arc::new(Mutex::new(Vec::with_capacity(config.max_size))),
            counters: Arc::new(Counters::default()),
            max_size: config.max_size,
            acquire_timeout: config.acquire_timeout(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquire a connection, waiting up to the acquire timeout for a slot
    pub async fn acquire(&self) -> TransportResult<PooledAsync> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("pool is closed".to_string()));
        }

        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(TransportError::Unreachable("pool is closed".to_string())),
            Err(_) => return Err(TransportError::PoolExhausted),
        };

        let reused = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            idle.pop()
        };
        let conn = match reused {
            Some(conn) => conn,
            None => {
                let conn = self.connector.connect_async().await?;
                self.counters.created.fetch_add(1, Ordering::SeqCst);
                debug!(max_size = self.max_size, "opened async connection");
                conn
            }
        };
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(PooledAsync {
            conn: Some(conn),
            idle: Arc::clone(&self.idle),
            counters: Arc::clone(&self.counters),
            closed: Arc::clone(&self.closed),
            dirty: false,
            _permit: permit,
        })
    }

    /// Stop handing out connections and drop idle ones
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.counters.created.load(Ordering::SeqCst),
            acquired: self.counters.acquired.load(Ordering::SeqCst),
            resets: self.counters.resets.load(Ordering::SeqCst),
            idle: self.idle.lock().unwrap_or_else(PoisonError::into_inner).len(),
            max_size: self.max_size,
        }
    }
}

/// A non-blocking connection checked out of an [`AsyncPool`]
pub struct PooledAsync {
    conn: Option<Box<dyn AsyncConnection>>,
    idle: Arc<Mutex<Vec<Box<dyn AsyncConnection>>>>,
    counters: Arc<Counters>,
    closed: Arc<AtomicBool>,
    /// Set while a call is pending; still set on drop means it was abandoned
    dirty: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledAsync {
    fn conn(&mut self) -> TransportResult<&mut Box<dyn AsyncConnection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| TransportError::Other("connection already released".to_string()))
    }

    pub async fn execute(&mut self, command: &Command) -> TransportResult<RawReply> {
        self.dirty = true;
        let result = self.conn()?.execute(command).await;
        self.dirty = matches!(result, Err(TransportError::Timeout(_)));
        result
    }

    pub async fn open_cursor(
        &mut self,
        command: &Command,
        batch_size: u32,
    ) -> TransportResult<CursorBatch> {
        self.dirty = true;
        let result = self.conn()?.open_cursor(command, batch_size).await;
        self.dirty = matches!(result, Err(TransportError::Timeout(_)));
        result
    }

    pub async fn get_more(&mut self, cursor_id: u64, batch_size: u32) -> TransportResult<CursorBatch> {
        self.dirty = true;
        let result = self.conn()?.get_more(cursor_id, batch_size).await;
        self.dirty = matches!(result, Err(TransportError::Timeout(_)));
        result
    }

    pub fn kill_cursor(&mut self, cursor_id: u64) {
        if let Some(conn) = self.conn.as_mut() {
            conn.kill_cursor(cursor_id);
        }
    }
}

impl Drop for PooledAsync {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if self.dirty {
            warn!("resetting async connection after abandoned call");
            conn.reset();
            self.counters.resets.fetch_add(1, Ordering::SeqCst);
        }
        if !conn.is_healthy() {
            return;
        }
        // Checked under the idle lock so a concurrent close clears it
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.closed.load(Ordering::SeqCst) {
            idle.push(conn);
        }
    }
}

// =============================================================================
// Blocking Pool
// =============================================================================

struct BlockingState {
    idle: Vec<Box<dyn BlockingConnection>>,
    in_use: usize,
    closed: bool,
}

type SharedBlockingState = Arc<(Mutex<BlockingState>, Condvar)>;

/// Pool of blocking connections
pub struct BlockingPool {
    connector: Arc<dyn Connector>,
    state: SharedBlockingState,
    counters: Arc<Counters>,
    max_size: usize,
    acquire_timeout: Duration,
}

impl BlockingPool {
    /// Create a new pool; connections are opened lazily
    pub fn new(connector: Arc<dyn Connector>, config: &PoolConfig) -> Self {
        Self {
            connector,
            state: Arc::new((
                Mutex::new(BlockingState {
                    idle: Vec::with_capacity(config.max_size),
                    in_use: 0,
                    closed: false,
                }),
                Condvar::new(),
            )),
            counters: Arc::new(Counters::default()),
            max_size: config.max_size,
            acquire_timeout: config.acquire_timeout(),
        }
    }

    /// Acquire a connection, waiting until the acquire timeout or the call
    /// deadline, whichever comes first
    pub fn acquire(&self, deadline: Option<Instant>) -> TransportResult<PooledBlocking> {
        let mut wait_until = Instant::now() + self.acquire_timeout;
        if let Some(deadline) = deadline {
            wait_until = wait_until.min(deadline);
        }

        let (lock, available) = &*self.state;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if state.closed {
                return Err(TransportError::Unreachable("pool is closed".to_string()));
            }
            if state.in_use < self.max_size {
                break;
            }
            let now = Instant::now();
            if now >= wait_until {
                return Err(TransportError::PoolExhausted);
            }
            state = available
                .wait_timeout(state, wait_until - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.in_use += 1;
        let reused = state.idle.pop();
        drop(state);

        let conn = match reused {
            Some(conn) => conn,
            None => match self.connector.connect_blocking() {
                Ok(conn) => {
                    self.counters.created.fetch_add(1, Ordering::SeqCst);
                    debug!(max_size = self.max_size, "opened blocking connection");
                    conn
                }
                Err(e) => {
                    let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
                    state.in_use -= 1;
                    available.notify_one();
                    return Err(e);
                }
            },
        };
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(PooledBlocking {
            conn: Some(conn),
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
            dirty: false,
        })
    }

    /// Stop handing out connections and drop idle ones
    pub fn close(&self) {
        let (lock, available) = &*self.state;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.idle.clear();
        available.notify_all();
    }

    pub fn stats(&self) -> PoolStats {
        let (lock, _) = &*self.state;
        let idle = lock.lock().unwrap_or_else(PoisonError::into_inner).idle.len();
        PoolStats {
            created: self.counters.created.load(Ordering::SeqCst),
            acquired: self.counters.acquired.load(Ordering::SeqCst),
            resets: self.counters.resets.load(Ordering::SeqCst),
            idle,
            max_size: self.max_size,
        }
    }
}

/// A blocking connection checked out of a [`BlockingPool`]
pub struct PooledBlocking {
    conn: Option<Box<dyn BlockingConnection>>,
    state: SharedBlockingState,
    counters: Arc<Counters>,
    dirty: bool,
}

impl PooledBlocking {
    fn conn(&mut self) -> TransportResult<&mut Box<dyn BlockingConnection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| TransportError::Other("connection already released".to_string()))
    }

    pub fn execute(&mut self, command: &Command, deadline: Option<Instant>) -> TransportResult<RawReply> {
        self.dirty = true;
        let result = self.conn()?.execute(command, deadline);
        self.dirty = matches!(result, Err(TransportError::Timeout(_)));
        result
    }

    pub fn open_cursor(
        &mut self,
        command: &Command,
        batch_size: u32,
        deadline: Option<Instant>,
    ) -> TransportResult<CursorBatch> {
        self.dirty = true;
        let result = self.conn()?.open_cursor(command, batch_size, deadline);
        self.dirty = matches!(result, Err(TransportError::Timeout(_)));
        result
    }

    pub fn get_more(
        &mut self,
        cursor_id: u64,
        batch_size: u32,
        deadline: Option<Instant>,
    ) -> TransportResult<CursorBatch> {
        self.dirty = true;
        let result = self.conn()?.get_more(cursor_id, batch_size, deadline);
        self.dirty = matches!(result, Err(TransportError::Timeout(_)));
        result
    }

    pub fn kill_cursor(&mut self, cursor_id: u64) {
        if let Some(conn) = self.conn.as_mut() {
            conn.kill_cursor(cursor_id);
        }
    }
}

impl Drop for PooledBlocking {
    fn drop(&mut self) {
        let (lock, available) = &*self.state;
        let conn = self.conn.take().and_then(|mut conn| {
            if self.dirty {
                warn!("resetting blocking connection after abandoned call");
                conn.reset();
                self.counters.resets.fetch_add(1, Ordering::SeqCst);
            }
            conn.is_healthy().then_some(conn)
        });

        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_use = state.in_use.saturating_sub(1);
        if let Some(conn) = conn {
            if !state.closed {
                state.idle.push(conn);
            }
        }
        available.notify_one();
    }
}
