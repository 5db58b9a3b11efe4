//! Bounded executor shared by all queue consumers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stellwerk_core::config::WorkerPoolConfig;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Returned by [`WorkerPool::try_execute`] when the backlog is full (or the
/// pool has shut down). The consumer turns this into a NACK, which is the
/// adapter's only backpressure signal towards SQS.
#[derive(Debug, Error)]
#[error("worker pool saturated")]
pub struct PoolSaturated;

/// Fixed-size pool of worker tasks pulling from a bounded backlog.
///
/// At most `max_threads` handler bodies run concurrently and at most
/// `max_backlog` submissions wait in the channel; anything beyond that is
/// rejected immediately — submission never blocks the caller.
///
/// Worker tasks parked on the channel cost nothing, so all `max_threads`
/// workers are spawned eagerly; `min_threads` is accepted for configuration
/// parity and logged.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(config: &WorkerPoolConfig) -> Self {
        let max_threads = config.max_threads.max(1);
        let max_backlog = config.max_backlog.max(1);
        debug!(
            min_threads = config.min_threads,
            max_threads, max_backlog, "starting worker pool"
        );

        let (sender, receiver) = mpsc::channel::<Task>(max_backlog);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..max_threads)
            .map(|worker_id| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only while waiting for a
                        // task, never while running one.
                        let task = { receiver.lock().await.recv().await };
                        match task {
                            Some(task) => task.await,
                            None => break,
                        }
                    }
                    debug!(worker_id, "pool worker exiting");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Submit a task. Rejects immediately when the backlog is full.
    pub async fn try_execute<F>(&self, task: F) -> Result<(), PoolSaturated>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock().await;
        let Some(sender) = sender.as_ref() else {
            return Err(PoolSaturated);
        };
        sender.try_send(Box::pin(task)).map_err(|_| PoolSaturated)
    }

    /// Stop accepting work and wait for queued and in-flight tasks to finish.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "pool worker panicked");
            }
        }
        debug!("worker pool shut down");
    }
}
