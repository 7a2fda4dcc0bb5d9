//! Memory store connections
//!
//! Both kinds delegate to the same [`MemoryStore`] routines. Injected
//! latency is awaited on the non-blocking kind and slept on the blocking
//! kind, which gives up at the caller's deadline.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use super::store::MemoryStore;
use crate::core::Command;
use crate::dispatch::{
    AsyncConnection, BlockingConnection, Connector, CursorBatch, RawReply, TransportError,
    TransportFuture, TransportResult,
};

/// Tracks cursors opened through one connection so `reset` can drop them
#[derive(Default)]
struct OpenCursors(Vec<u64>);

impl OpenCursors {
    fn record(&mut self, batch: &CursorBatch) {
        if batch.is_exhausted() {
            return;
        }
        if !self.0.contains(&batch.cursor_id) {
            self.0.push(batch.cursor_id);
        }
    }

    fn forget(&mut self, cursor_id: u64) {
        self.0.retain(|id| *id != cursor_id);
    }
}

fn unreachable() -> TransportError {
    TransportError::Unreachable("memory store is unreachable".to_string())
}

// =============================================================================
// Non-blocking
// =============================================================================

/// Non-blocking connection to a [`MemoryStore`]
pub struct MemoryAsyncConnection {
    store: MemoryStore,
    cursors: OpenCursors,
}

impl MemoryAsyncConnection {
    async fn delay(&self) -> TransportResult<()> {
        if self.store.is_unreachable() {
            return Err(unreachable());
        }
        if let Some(latency) = self.store.latency() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

impl AsyncConnection for MemoryAsyncConnection {
    fn execute<'a>(&'a mut self, command: &'a Command) -> TransportFuture<'a, TransportResult<RawReply>> {
        Box::pin(async move {
            self.delay().await?;
            self.store.execute(command)
        })
    }

    fn open_cursor<'a>(
        &'a mut self,
        command: &'a Command,
        batch_size: u32,
    ) -> TransportFuture<'a, TransportResult<CursorBatch>> {
        Box::pin(async move {
            self.delay().await?;
            let batch = self.store.open_cursor(command, batch_size)?;
            self.cursors.record(&batch);
            Ok(batch)
        })
    }

    fn get_more(&mut self, cursor_id: u64, batch_size: u32) -> TransportFuture<'_, TransportResult<CursorBatch>> {
        Box::pin(async move {
            self.delay().await?;
            let batch = self.store.get_more_async(cursor_id, batch_size).await?;
            if batch.is_exhausted() {
                self.cursors.forget(cursor_id);
            }
            Ok(batch)
        })
    }

    fn kill_cursor(&mut self, cursor_id: u64) {
        self.store.kill_cursor(cursor_id);
        self.cursors.forget(cursor_id);
    }

    fn reset(&mut self) {
        for id in self.cursors.0.drain(..) {
            self.store.kill_cursor(id);
        }
        self.store.inner.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn is_healthy(&self) -> bool {
        !self.store.is_unreachable()
    }
}

// =============================================================================
// Blocking
// =============================================================================

/// Blocking connection to a [`MemoryStore`]
pub struct MemoryBlockingConnection {
    store: MemoryStore,
    cursors: OpenCursors,
}

impl MemoryBlockingConnection {
    fn delay(&self, deadline: Option<Instant>) -> TransportResult<()> {
        if self.store.is_unreachable() {
            return Err(unreachable());
        }
        let Some(latency) = self.store.latency() else {
            return Ok(());
        };
        let started = Instant::now();
        match deadline {
            Some(at) if started + latency > at => {
                thread::sleep(at.saturating_duration_since(started));
                Err(TransportError::Timeout(started.elapsed()))
            }
            _ => {
                thread::sleep(latency);
                Ok(())
            }
        }
    }
}

impl BlockingConnection for MemoryBlockingConnection {
    fn execute(&mut self, command: &Command, deadline: Option<Instant>) -> TransportResult<RawReply> {
        self.delay(deadline)?;
        self.store.execute(command)
    }

    fn open_cursor(
        &mut self,
        command: &Command,
        batch_size: u32,
        deadline: Option<Instant>,
    ) -> TransportResult<CursorBatch> {
        self.delay(deadline)?;
        let batch = self.store.open_cursor(command, batch_size)?;
        self.cursors.record(&batch);
        Ok(batch)
    }

    fn get_more(
        &mut self,
        cursor_id: u64,
        batch_size: u32,
        deadline: Option<Instant>,
    ) -> TransportResult<CursorBatch> {
        self.delay(deadline)?;
        let batch = self.store.get_more_blocking(cursor_id, batch_size, deadline)?;
        if batch.is_exhausted() {
            self.cursors.forget(cursor_id);
        }
        Ok(batch)
    }

    fn kill_cursor(&mut self, cursor_id: u64) {
        self.store.kill_cursor(cursor_id);
        self.cursors.forget(cursor_id);
    }

    fn reset(&mut self) {
        for id in self.cursors.0.drain(..) {
            self.store.kill_cursor(id);
        }
        self.store.inner.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn is_healthy(&self) -> bool {
        !self.store.is_unreachable()
    }
}

// =============================================================================
// Connector
// =============================================================================

impl Connector for MemoryStore {
    fn connect_async(&self) -> TransportFuture<'_, TransportResult<Box<dyn AsyncConnection>>> {
        Box::pin(async move {
            if self.is_unreachable() {
                return Err(unreachable());
            }
            self.inner.async_connections.fetch_add(1, Ordering::SeqCst);
            let conn: Box<dyn AsyncConnection> = Box::new(MemoryAsyncConnection {
                store: self.clone(),
                cursors: OpenCursors::default(),
            });
            Ok(conn)
        })
    }

    fn connect_blocking(&self) -> TransportResult<Box<dyn BlockingConnection>> {
        if self.is_unreachable() {
            return Err(unreachable());
        }
        self.inner.blocking_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryBlockingConnection {
            store: self.clone(),
            cursors: OpenCursors::default(),
        }))
    }
}
