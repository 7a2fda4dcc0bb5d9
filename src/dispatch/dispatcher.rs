//! # Dual-Mode Dispatcher
//!
//! Routes compiled commands to the transport of the caller's mode. The
//! mode is chosen by the entry point (`run` or `run_blocking`), never
//! inferred. Both paths share hook invocation, deadline handling and
//! normalization, so the same command against the same store state yields
//! the same envelope in either mode.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::cursor::{BlockingCursor, Cursor};
use super::pool::{AsyncPool, BlockingPool, PoolStats};
use super::transport::{Connector, TransportError, TransportResult};
use crate::core::{ClientConfig, Command, ExecutionMode, HookRegistry, RequestContext};
use crate::response::{normalize, Response};

/// The single operation surface over both transports
pub struct Dispatcher {
    async_pool: AsyncPool,
    blocking_pool: BlockingPool,
    hooks: HookRegistry,
    batch_size: u32,
}

impl Dispatcher {
    /// Create a new dispatcher with one pool per mode
    pub fn new(connector: Arc<dyn Connector>, config: &ClientConfig, hooks: HookRegistry) -> Self {
        Self {
            async_pool: AsyncPool::new(Arc::clone(&connector), &config.pool),
            blocking_pool: BlockingPool::new(connector, &config.pool),
            hooks,
            batch_size: config.batch_size,
        }
    }

    // =========================================================================
    // Non-blocking path
    // =========================================================================

    /// Run a command to completion without blocking the calling thread
    pub async fn run(&self, command: &Command, deadline: Option<Duration>) -> Response {
        let ctx = self.begin(command, ExecutionMode::Async, deadline);

        let result = within(deadline, async {
            let mut conn = self.async_pool.acquire().await?;
            conn.execute(command).await
        })
        .await;

        self.finish(command, &ctx, normalize(result))
    }

    /// Open a server-side cursor without blocking the calling thread
    pub async fn open_cursor(
        &self,
        command: &Command,
        deadline: Option<Duration>,
    ) -> Result<Cursor, Response> {
        let ctx = self.begin(command, ExecutionMode::Async, deadline);

        let result = within(deadline, async {
            let mut conn = self.async_pool.acquire().await?;
            let batch = conn.open_cursor(command, self.batch_size).await?;
            Ok((conn, batch))
        })
        .await;

        match result {
            Ok((conn, batch)) => {
                self.finish(command, &ctx, Response::documents(batch.documents.clone()));
                Ok(Cursor::new(conn, batch, self.batch_size, deadline))
            }
            Err(e) => Err(self.finish(command, &ctx, normalize(Err(e)))),
        }
    }

    // =========================================================================
    // Blocking path
    // =========================================================================

    /// Run a command to completion on the calling thread
    pub fn run_blocking(&self, command: &Command, deadline: Option<Duration>) -> Response {
        let ctx = self.begin(command, ExecutionMode::Sync, deadline);
        let expires_at = ctx.expires_at();

        let result = self.blocking_pool.acquire(expires_at).and_then(|mut conn| {
            conn.execute(command, expires_at)
        });

        let result = settle(&ctx, result);
        self.finish(command, &ctx, normalize(result))
    }

    /// Open a server-side cursor on the calling thread
    pub fn open_cursor_blocking(
        &self,
        command: &Command,
        deadline: Option<Duration>,
    ) -> Result<BlockingCursor, Response> {
        let ctx = self.begin(command, ExecutionMode::Sync, deadline);
        let expires_at = ctx.expires_at();

        let result = self.blocking_pool.acquire(expires_at).and_then(|mut conn| {
            let batch = conn.open_cursor(command, self.batch_size, expires_at)?;
            Ok((conn, batch))
        });

        // A cursor opened past the deadline is released before reporting
        let result = match result {
            Ok((mut conn, batch)) if ctx.is_expired() => {
                if !batch.is_exhausted() {
                    conn.kill_cursor(batch.cursor_id);
                }
                Err(TransportError::Timeout(Duration::ZERO))
            }
            other => other,
        };

        match settle(&ctx, result) {
            Ok((conn, batch)) => {
                self.finish(command, &ctx, Response::documents(batch.documents.clone()));
                Ok(BlockingCursor::new(conn, batch, self.batch_size, deadline))
            }
            Err(e) => Err(self.finish(command, &ctx, normalize(Err(e)))),
        }
    }

    // =========================================================================
    // Shared
    // =========================================================================

    fn begin(&self, command: &Command, mode: ExecutionMode, deadline: Option<Duration>) -> RequestContext {
        let ctx = RequestContext::new(mode, deadline);
        debug!(
            request_id = %ctx.request_id,
            mode = %mode,
            op = command.name(),
            collection = command.collection(),
            "dispatching command"
        );
        self.hooks.pre_query(command, &ctx);
        ctx
    }

    fn finish(&self, command: &Command, ctx: &RequestContext, response: Response) -> Response {
        if response.success {
            info!(
                request_id = %ctx.request_id,
                mode = %ctx.mode,
                op = command.name(),
                collection = command.collection(),
                count = response.count,
                elapsed_ms = ctx.elapsed_ms() as u64,
                "command completed"
            );
        } else {
            warn!(
                request_id = %ctx.request_id,
                mode = %ctx.mode,
                op = command.name(),
                collection = command.collection(),
                error = response.error_code().unwrap_or("UNKNOWN"),
                elapsed_ms = ctx.elapsed_ms() as u64,
                message = %response.message,
                "command failed"
            );
        }
        self.hooks.post_query(command, ctx, &response);
        response
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub(crate) fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Pool counters as (async, blocking)
    pub fn pool_stats(&self) -> (PoolStats, PoolStats) {
        (self.async_pool.stats(), self.blocking_pool.stats())
    }

    /// Close both pools
    pub fn close(&self) {
        self.async_pool.close();
        self.blocking_pool.close();
    }
}

/// Bound a non-blocking transport call by the caller's deadline. Dropping
/// the pending future on expiry releases its pooled connection, which is
/// reset on the way back.
pub(crate) async fn within<T>(
    deadline: Option<Duration>,
    call: impl Future<Output = TransportResult<T>>,
) -> TransportResult<T> {
    match deadline {
        None => call.await,
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(Err(TransportError::Timeout(_))) | Err(_) => Err(TransportError::Timeout(limit)),
            Ok(result) => result,
        },
    }
}

/// Apply the deadline to a finished blocking call. A result that arrives
/// after the deadline counts as a timeout, as the non-blocking path would
/// have abandoned it.
pub(crate) fn settle<T>(ctx: &RequestContext, result: TransportResult<T>) -> TransportResult<T> {
    let Some(limit) = ctx.deadline else {
        return result;
    };
    match result {
        Err(TransportError::Timeout(_)) => Err(TransportError::Timeout(limit)),
        _ if ctx.is_expired() => Err(TransportError::Timeout(limit)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_within_times_out() {
        let result: TransportResult<()> = within(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(TransportError::Timeout(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_within_without_deadline() {
        let result = within(None, async { Ok::<_, TransportError>(5) }).await;
        assert_eq!(result, Ok(5));
    }

    #[test]
    fn test_settle_late_result_is_timeout() {
        let ctx = RequestContext::new(ExecutionMode::Sync, Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        let result = settle(&ctx, Ok(1));
        assert_eq!(result, Err(TransportError::Timeout(Duration::from_millis(1))));
    }

    #[test]
    fn test_settle_passes_errors_through() {
        let ctx = RequestContext::new(ExecutionMode::Sync, Some(Duration::from_secs(5)));
        let result: TransportResult<()> = settle(&ctx, Err(TransportError::PoolExhausted));
        assert_eq!(result, Err(TransportError::PoolExhausted));
    }
}
