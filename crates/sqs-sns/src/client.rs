//! Queue/topic client traits and wire-level message types.
//!
//! The adapter talks to SQS and SNS exclusively through these traits, so the
//! runtime can be driven by in-memory implementations in tests and by
//! LocalStack-style stacks through the standard AWS implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stellwerk_core::message::Headers;

use crate::error::MessagingError;

/// A raw message received from a queue.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Provider message id.
    pub id: String,
    /// Raw message body as sent over the wire (codec input).
    pub body: String,
    /// Message attributes, decoded to the header map.
    pub headers: Headers,
    /// Provider-specific handle for ack/nack.
    pub receipt_handle: String,
    /// When the message was sent to the queue, if the provider reports it.
    pub sent_at: Option<DateTime<Utc>>,
    /// Number of times this message has been received.
    pub receive_count: u32,
}

/// Attributes applied when creating queues and topics.
#[derive(Debug, Clone, Default)]
pub struct CreateAttributes {
    /// Enables server-side encryption at rest when set.
    pub kms_master_key_id: Option<String>,
}

/// Point-to-point queue service: long-poll receive, receipt handles,
/// visibility timeout, explicit delete as ACK.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Create a queue, returning its URL. Idempotent on the provider side.
    async fn create_queue(
        &self,
        name: &str,
        attrs: &CreateAttributes,
    ) -> Result<String, MessagingError>;

    /// Resolve a queue name to its URL. `Ok(None)` means the queue does not
    /// exist; any transport-level failure is an error.
    async fn get_queue_url(
        &self,
        name: &str,
        owner_account_id: Option<&str>,
    ) -> Result<Option<String>, MessagingError>;

    async fn delete_queue(&self, queue_url: &str) -> Result<(), MessagingError>;

    /// Long-poll receive: blocks up to `wait_time_secs` for messages.
    async fn receive_message(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_time_secs: u32,
    ) -> Result<Vec<ReceivedMessage>, MessagingError>;

    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<(), MessagingError>;

    /// ACK: remove the message from the queue.
    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), MessagingError>;

    /// Reset a message's visibility timeout (0/low = rapid redelivery).
    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_secs: u32,
    ) -> Result<(), MessagingError>;

    /// Read the queue's ARN, needed to subscribe it to a topic.
    async fn queue_arn(&self, queue_url: &str) -> Result<String, MessagingError>;
}

/// One page of a topic listing.
#[derive(Debug, Clone, Default)]
pub struct TopicPage {
    pub arns: Vec<String>,
    pub next_token: Option<String>,
}

/// Topic fan-out service.
#[async_trait]
pub trait TopicClient: Send + Sync {
    /// Create a topic, returning its ARN. Idempotent on the provider side.
    async fn create_topic(
        &self,
        name: &str,
        attrs: &CreateAttributes,
    ) -> Result<String, MessagingError>;

    /// List topic ARNs, one page at a time.
    async fn list_topics(&self, next_token: Option<&str>) -> Result<TopicPage, MessagingError>;

    async fn publish(
        &self,
        topic_arn: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<(), MessagingError>;

    /// Subscribe a queue (by ARN) to a topic with raw message delivery, so
    /// the body and attributes arrive at the queue without a JSON envelope.
    async fn subscribe(&self, topic_arn: &str, queue_arn: &str) -> Result<(), MessagingError>;
}
