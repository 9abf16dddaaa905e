//! Sealer worker pool with structured concurrency.
//!
//! Workers share one receiver of the seal queue and seal windows as they
//! arrive. Shutdown first lets workers drain the queue once every sender is
//! gone, then cancels whatever is still running when the timeout expires.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    accumulator::ClosedWindow,
    engine::EngineStats,
    error::{Result, StreamError},
    sealer::WindowSealer,
};

/// Pool of tasks sealing closed windows.
pub struct SealerPool {
    sealer: Arc<WindowSealer>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<ClosedWindow>>>,
    worker_count: usize,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl SealerPool {
    /// Creates a pool reading closed windows from `queue`.
    pub fn new(
        sealer: Arc<WindowSealer>,
        queue: mpsc::UnboundedReceiver<ClosedWindow>,
        worker_count: usize,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            sealer,
            queue: Arc::new(Mutex::new(queue)),
            worker_count,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
        }
    }

    /// Spawns the configured number of workers.
    ///
    /// Workers run until the queue is closed and empty, or until
    /// cancellation.
    pub async fn spawn_workers(&mut self) {
        info!(worker_count = self.worker_count, "spawning sealer workers");

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.worker_count;
        }

        for worker_id in 0..self.worker_count {
            let sealer = self.sealer.clone();
            let queue = self.queue.clone();
            let cancel = self.cancellation_token.clone();

            let handle = tokio::spawn(async move {
                debug!(worker_id, "sealer worker starting");
                run_worker(worker_id, &sealer, &queue, &cancel).await;
                debug!(worker_id, "sealer worker stopped");
            });
            self.worker_handles.push(handle);
        }
    }

    /// Waits for workers to drain the queue, cancelling them if `timeout`
    /// expires first.
    ///
    /// The queue only drains once every sender has been dropped; callers
    /// drop the accumulator before calling this.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::ShutdownTimeout` if the workers did not finish
    /// in time, or `StreamError::WorkerPanic` if a worker panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "draining sealer workers"
        );

        let handles = std::mem::take(&mut self.worker_handles);
        let drain = async {
            let mut first_panic = None;
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "sealer worker panicked");
                    first_panic.get_or_insert(StreamError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    });
                }
            }
            first_panic
        };

        let result = match tokio::time::timeout(timeout, drain).await {
            Ok(None) => {
                info!("sealer pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_elapsed) => {
                error!("sealer shutdown timed out, cancelling in-flight seals");
                self.cancellation_token.cancel();
                Err(StreamError::ShutdownTimeout { timeout })
            },
        };

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = 0;
        }
        result
    }
}

async fn run_worker(
    worker_id: usize,
    sealer: &WindowSealer,
    queue: &Mutex<mpsc::UnboundedReceiver<ClosedWindow>>,
    cancel: &CancellationToken,
) {
    loop {
        let next = {
            let mut receiver = queue.lock().await;
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                window = receiver.recv() => window,
            }
        };

        let Some(window) = next else {
            break;
        };

        let window_id = window.window_id.clone();
        match sealer.seal(window, cancel).await {
            Ok(sealed) => {
                debug!(
                    worker_id,
                    window_id = %sealed.window_id,
                    chain_length = sealed.chain.chain_length,
                    "window sealed by worker"
                );
            },
            Err(StreamError::Cancelled) => break,
            Err(e) => {
                debug!(
                    worker_id,
                    window_id = %window_id,
                    error = %e,
                    "worker moving past failed window"
                );
            },
        }
    }
}

impl Drop for SealerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            error!(
                active_workers = active_count,
                "SealerPool dropped with active workers, cancelling to prevent orphaned tasks"
            );
            self.cancellation_token.cancel();
            warn!("call shutdown_graceful() before dropping the pool to seal queued windows");
        }
    }
}

impl std::fmt::Debug for SealerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealerPool")
            .field("worker_count", &self.worker_count)
            .field("spawned", &self.worker_handles.len())
            .finish_non_exhaustive()
    }
}
