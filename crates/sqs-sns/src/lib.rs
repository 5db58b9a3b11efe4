//! Three-verb messaging (COMMAND / QUERY / EVENT) over AWS SQS and SNS.
//!
//! Commands and queries are point-to-point through SQS queues; events fan
//! out through SNS topics subscribed to per-consumer queues. Queries are
//! correlated request/reply over a per-process ephemeral reply queue.

pub mod adapter;
pub mod aws;
pub mod client;
pub mod consumer;
pub mod error;
pub mod registry;
pub mod reply;
pub mod timeout_queue;
pub mod worker_pool;

pub use adapter::{
    create_adapter, MessageProcessor, MessagingAdapter, ProcessorOptions, QueryOptions,
    SendOptions, SqsSnsAdapter,
};
pub use aws::{AwsQueueClient, AwsTopicClient};
pub use client::{CreateAttributes, QueueClient, ReceivedMessage, TopicClient, TopicPage};
pub use consumer::{Consumer, MessageHandler};
pub use error::MessagingError;
pub use registry::NameRegistry;
pub use reply::ReplyConsumer;
pub use timeout_queue::TimeoutQueue;
pub use worker_pool::{PoolSaturated, WorkerPool};
