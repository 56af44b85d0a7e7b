//! Asynchronous worker pool for workflow instances.
//!
//! [`WorkerPool`] owns the sending half of every worker queue. Submissions are
//! spread round-robin; each worker runs its instances one after another, so
//! the pool size bounds how many instances are active at once.

use crate::server::{
    pool::request::{Inflight, WorkRequest},
    service::error::Error,
};
use core::time::Duration;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
    shutting_down: AtomicBool,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    inflight: Arc<Inflight>,
}

impl WorkerPool {
    pub const fn new(
        workers: Vec<mpsc::Sender<WorkRequest>>,
        shutdown_token: CancellationToken,
        shutdown_timeout: Duration,
        inflight: Arc<Inflight>,
    ) -> Self {
        Self {
            workers,
            next_worker: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            shutdown_token,
            shutdown_timeout,
            inflight,
        }
    }

    /// Returns the index of the next worker to receive work (round-robin).
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Queues `request` on the next worker, waiting while its queue is full.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The pool is shutting down.
    /// - The worker's channel is closed.
    pub async fn send_to_next_worker(&self, request: WorkRequest) -> Result<(), Error> {
        if self.is_shutting_down() || self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let worker_idx = self.next_worker_index();
        let worker = &self.workers[worker_idx];

        match worker.send(request).await {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::ChannelError {
                context: format!("Worker {worker_idx} channel closed"),
            }),
        }
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Refuses new submissions.
    /// - Waits up to the configured timeout for in-flight instances.
    /// - Cancels the shared [`CancellationToken`] so queued instances are
    ///   dropped instead of started.
    /// - Sends a [`WorkRequest::Shutdown`] to each worker and waits (up to 3
    ///   seconds per worker) for the acknowledgement.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new requests ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.shutting_down.store(true, Ordering::Release);

        // === Phase 1: Wait for in-flight instances to drain ===
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight workflows ({} active)",
            self.inflight.len()
        );
        let drain_result = timeout(self.shutdown_timeout, async {
            while !self.inflight.is_empty() {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight workflows drained successfully");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} workflows still active)",
                    self.inflight.len()
                );
            }
        }

        // === Phase 2: Cancel any remaining work ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.shutdown_token.cancel();

        // === Phase 3: Notify workers to shut down ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Notifying all workers to shut down");
        let mut shutdown_handles = Vec::with_capacity(self.workers.len());

        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            if let Err(_e) = worker.send(WorkRequest::Shutdown { response: tx }).await {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to send shutdown to worker {i}: {_e}");
            } else {
                shutdown_handles.push((i, rx));
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Waiting for up to 3s per worker for shutdown acknowledgements");

        let timeout_futures = shutdown_handles.into_iter().map(|(_i, rx)| async move {
            match timeout(Duration::from_secs(3), rx).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Worker {_i} shutdown acknowledged");
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {_i} returned error: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {_i} shutdown timed out");
                }
            }
        });

        futures::future::join_all(timeout_futures).await;

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutdown complete");

        Ok(())
    }
}
