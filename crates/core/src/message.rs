use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::TargetError;

/// Structured message body. Opaque to the adapter; the codec turns it into
/// the wire representation and back.
pub type Body = serde_json::Value;

/// Message headers: short identifier keys mapped to string values.
/// Transported as string-typed SQS/SNS message attributes.
pub type Headers = HashMap<String, String>;

// Reserved header keys driving the protocol. The double-underscore prefix
// keeps them out of the application header namespace.

/// Target method within a request queue.
pub const HEADER_METHOD: &str = "__method";
/// Fan-out discriminator on EVENT messages.
pub const HEADER_EVENT_TYPE: &str = "__event_type";
/// Correlation token tying a QUERY to its response.
pub const HEADER_REQUEST_ID: &str = "__request_id";
/// Destination queue URL for a QUERY response.
pub const HEADER_REPLY_QUEUE_URL: &str = "__reply_queue_url";

/// A decoded message as handed to processors: the codec-decoded body plus
/// the full header map (reserved keys included).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub body: Body,
    pub headers: Headers,
}

impl Message {
    pub fn new(body: Body, headers: Headers) -> Self {
        Self { body, headers }
    }

    /// Typed view of the reserved `__*` headers.
    pub fn reserved(&self) -> ReservedHeaders {
        ReservedHeaders::from_headers(&self.headers)
    }
}

/// The reserved protocol headers, pulled out of a header map.
///
/// All fields are optional: a COMMAND carries only `method`, an EVENT only
/// `event_type`, a QUERY all of `method`/`request_id`/`reply_queue_url`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservedHeaders {
    pub method: Option<String>,
    pub event_type: Option<String>,
    pub request_id: Option<String>,
    pub reply_queue_url: Option<String>,
}

impl ReservedHeaders {
    pub fn from_headers(headers: &Headers) -> Self {
        Self {
            method: headers.get(HEADER_METHOD).cloned(),
            event_type: headers.get(HEADER_EVENT_TYPE).cloned(),
            request_id: headers.get(HEADER_REQUEST_ID).cloned(),
            reply_queue_url: headers.get(HEADER_REPLY_QUEUE_URL).cloned(),
        }
    }
}

/// A parsed target address.
///
/// Commands and queries address `"<queue>/<method>"`; events address
/// `"<topic>#<event_type>"`. Names here are logical, before namespacing
/// and alphabet translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Queue { queue: String, method: String },
    Topic { topic: String, event_type: String },
}

impl Target {
    /// Parse a `"<queue>/<method>"` command/query target.
    pub fn parse_queue(target: &str) -> Result<(String, String), TargetError> {
        match target.split_once('/') {
            Some((queue, method)) if !queue.is_empty() && !method.is_empty() => {
                Ok((queue.to_string(), method.to_string()))
            }
            _ => Err(TargetError::InvalidQueueTarget(target.to_string())),
        }
    }

    /// Parse a `"<topic>#<event_type>"` event target.
    pub fn parse_topic(target: &str) -> Result<(String, String), TargetError> {
        match target.split_once('#') {
            Some((topic, event_type)) if !topic.is_empty() && !event_type.is_empty() => {
                Ok((topic.to_string(), event_type.to_string()))
            }
            _ => Err(TargetError::InvalidTopicTarget(target.to_string())),
        }
    }
}
