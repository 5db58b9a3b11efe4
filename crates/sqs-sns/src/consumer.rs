//! Per-queue long-poll consumer loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{QueueClient, ReceivedMessage};
use crate::error::MessagingError;
use crate::worker_pool::WorkerPool;

/// Seconds a NACKed message stays invisible before it is redelivered.
/// Short on purpose: a NACK redistributes the message to any consumer on
/// the same queue with low latency.
const NACK_VISIBILITY_SECS: u32 = 1;

/// Pause after a failed receive so a dead endpoint is not hot-polled.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), MessagingError>> + Send>>;

/// Boxed async callback invoked once per received message.
///
/// `Ok(())` acks the message, [`MessagingError::Nack`] nacks it, any other
/// error leaves it to the queue's visibility timeout.
pub type MessageHandler = Arc<dyn Fn(ReceivedMessage) -> HandlerFuture + Send + Sync>;

/// Owns one long-poll loop for one queue URL.
///
/// Stopping is two-phase: [`Consumer::signal_stop`] flags the loop without
/// waiting, [`Consumer::stop`] flags and joins. Stopping many consumers
/// means signalling them all first and joining afterwards, so the total
/// stop time is one long-poll interval instead of one per consumer.
pub struct Consumer {
    queue_url: String,
    stop_requested: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Consumer {
    /// Spawn the poll loop. With a pool, each message is submitted as a
    /// task and a pool rejection NACKs it; without one, messages are
    /// processed inline on the loop (the reply consumer runs this way so
    /// dispatch cannot be starved by application handlers).
    pub fn spawn(
        client: Arc<dyn QueueClient>,
        queue_url: String,
        read_timeout_secs: u32,
        pool: Option<Arc<WorkerPool>>,
        handler: MessageHandler,
    ) -> Self {
        let stop_requested = Arc::new(AtomicBool::new(false));
        let stop = stop_requested.clone();
        let url = queue_url.clone();
        let handle = tokio::spawn(async move {
            poll_loop(client, url, read_timeout_secs, pool, handler, stop).await;
        });
        Self {
            queue_url,
            stop_requested,
            handle,
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// First phase of the stop protocol: flag the loop and return. The
    /// outstanding long poll runs down once, then the loop exits.
    pub fn signal_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Flag the loop and join it.
    pub async fn stop(self) {
        self.signal_stop();
        if let Err(e) = self.handle.await {
            warn!(queue_url = %self.queue_url, error = %e, "consumer loop panicked");
        }
    }
}

async fn poll_loop(
    client: Arc<dyn QueueClient>,
    queue_url: String,
    read_timeout_secs: u32,
    pool: Option<Arc<WorkerPool>>,
    handler: MessageHandler,
    stop: Arc<AtomicBool>,
) {
    debug!(queue_url = %queue_url, "consumer loop started");
    while !stop.load(Ordering::SeqCst) {
        let batch = match client
            .receive_message(&queue_url, 1, read_timeout_secs)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(queue_url = %queue_url, error = %e, "receive failed");
                tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                continue;
            }
        };
        if batch.is_empty() {
            // Long-poll expiry.
            continue;
        }
        if batch.len() > 1 {
            // The receive asks for max=1; anything else is a protocol
            // anomaly. Logged, then every message is still processed.
            warn!(queue_url = %queue_url, count = batch.len(), "unexpected message count from receive");
        }
        for message in batch {
            dispatch(&client, &queue_url, pool.as_ref(), &handler, message).await;
        }
    }
    debug!(queue_url = %queue_url, "consumer loop stopped");
}

async fn dispatch(
    client: &Arc<dyn QueueClient>,
    queue_url: &str,
    pool: Option<&Arc<WorkerPool>>,
    handler: &MessageHandler,
    message: ReceivedMessage,
) {
    let receipt_handle = message.receipt_handle.clone();
    let work = process(
        client.clone(),
        queue_url.to_string(),
        handler.clone(),
        message,
    );
    match pool {
        Some(pool) => {
            if pool.try_execute(work).await.is_err() {
                debug!(queue_url = %queue_url, "worker pool saturated, nacking message");
                nack(client, queue_url, &receipt_handle).await;
            }
        }
        None => work.await,
    }
}

async fn process(
    client: Arc<dyn QueueClient>,
    queue_url: String,
    handler: MessageHandler,
    message: ReceivedMessage,
) {
    let receipt_handle = message.receipt_handle.clone();
    match handler(message).await {
        Ok(()) => {
            if let Err(e) = client.delete_message(&queue_url, &receipt_handle).await {
                warn!(queue_url = %queue_url, error = %e, "failed to ack message");
            }
        }
        Err(MessagingError::Nack) => nack(&client, &queue_url, &receipt_handle).await,
        Err(e) => {
            // Neither ack nor nack: the message redelivers after the queue's
            // server-side visibility timeout and ultimately reaches any
            // configured dead-letter queue.
            warn!(queue_url = %queue_url, error = %e, "handler failed, leaving message for redelivery");
        }
    }
}

async fn nack(client: &Arc<dyn QueueClient>, queue_url: &str, receipt_handle: &str) {
    if let Err(e) = client
        .change_message_visibility(queue_url, receipt_handle, NACK_VISIBILITY_SECS)
        .await
    {
        warn!(queue_url = %queue_url, error = %e, "failed to nack message");
    }
}
