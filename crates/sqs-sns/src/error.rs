//! Messaging error taxonomy.

use std::time::Duration;

use thiserror::Error;

use stellwerk_core::error::{CodecError, TargetError};

#[derive(Debug, Error)]
pub enum MessagingError {
    /// Missing or invalid configuration (including adapter selection).
    #[error("config error: {0}")]
    Config(String),

    /// Malformed target address string.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// Any SQS/SNS-level failure: create, lookup, send, receive, subscribe,
    /// delete. Producer calls surface this to the caller; consumer loops log
    /// and continue.
    #[error("connection error: {0}")]
    Connection(String),

    /// A QUERY exceeded its deadline.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// Typed sentinel a handler returns to request redelivery of the
    /// message it is processing.
    #[error("message processing negatively acknowledged")]
    Nack,

    /// Any other handler failure. The consumer recovers by neither acking
    /// nor nacking, leaving redelivery to the queue's visibility timeout.
    #[error("handler error: {0}")]
    Handler(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
