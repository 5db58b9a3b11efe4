//! Reply-queue consumer and request/reply correlator.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use stellwerk_core::message::HEADER_REQUEST_ID;

use crate::client::{QueueClient, ReceivedMessage};
use crate::consumer::{Consumer, MessageHandler};
use crate::error::MessagingError;
use crate::registry::NameRegistry;
use crate::timeout_queue::TimeoutQueue;

type PendingMap = Arc<Mutex<HashMap<String, Arc<TimeoutQueue<ReceivedMessage>>>>>;

/// Consumes the process's private reply queue and routes each reply to the
/// query waiting on its request id.
///
/// The inner consumer runs without a worker pool: dispatch is trivial and
/// must not be starved by application handlers saturating the pool.
pub struct ReplyConsumer {
    queue_url: String,
    client: Arc<dyn QueueClient>,
    pending: PendingMap,
    consumer: Mutex<Option<Consumer>>,
}

impl ReplyConsumer {
    /// Create the ephemeral reply queue and start consuming it.
    pub async fn start(
        client: Arc<dyn QueueClient>,
        registry: &NameRegistry,
        queue_name: &str,
        read_timeout_secs: u32,
    ) -> Result<Self, MessagingError> {
        let queue_url = registry.create_queue(&*client, queue_name).await?;
        info!(queue_url = %queue_url, "reply queue created");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let handler = dispatch_handler(pending.clone());
        let consumer = Consumer::spawn(
            client.clone(),
            queue_url.clone(),
            read_timeout_secs,
            None,
            handler,
        );

        Ok(Self {
            queue_url,
            client,
            pending,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Register interest in a request id, returning the rendezvous the reply
    /// will be pushed onto. Set-if-absent: registering the same id twice
    /// returns the existing slot.
    pub async fn register(&self, request_id: &str) -> Arc<TimeoutQueue<ReceivedMessage>> {
        self.pending
            .lock()
            .await
            .entry(request_id.to_string())
            .or_insert_with(|| Arc::new(TimeoutQueue::new()))
            .clone()
    }

    /// Best-effort cleanup after a timed-out query or a failed send.
    pub async fn unregister(&self, request_id: &str) {
        self.pending.lock().await.remove(request_id);
    }

    /// Number of queries currently awaiting a reply.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Flag the reply loop to stop without waiting.
    pub async fn signal_stop(&self) {
        if let Some(consumer) = self.consumer.lock().await.as_ref() {
            consumer.signal_stop();
        }
    }

    /// Stop the reply loop and delete the reply queue. Pending waiters are
    /// left to fail with their own timeouts.
    pub async fn stop(&self) {
        if let Some(consumer) = self.consumer.lock().await.take() {
            consumer.stop().await;
        }
        if let Err(e) = self.client.delete_queue(&self.queue_url).await {
            warn!(queue_url = %self.queue_url, error = %e, "failed to delete reply queue");
        }
        self.pending.lock().await.clear();
    }
}

/// Handler run for every message arriving on the reply queue: remove the
/// pending entry atomically and push the message to the waiter. Replies are
/// always acked — an unknown or expired request id is dropped, not retried.
fn dispatch_handler(pending: PendingMap) -> MessageHandler {
    Arc::new(move |message: ReceivedMessage| {
        let pending = pending.clone();
        Box::pin(async move {
            let Some(request_id) = message.headers.get(HEADER_REQUEST_ID).cloned() else {
                warn!("reply message carries no request id header, dropping");
                return Ok(());
            };
            let waiter = pending.lock().await.remove(&request_id);
            match waiter {
                Some(waiter) => waiter.push(message).await,
                None => {
                    debug!(request_id = %request_id, "no waiter for reply (timed out or unknown), dropping")
                }
            }
            Ok(())
        })
    })
}
