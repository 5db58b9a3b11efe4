//! In-memory queue/topic services for driving the adapter end-to-end.
//!
//! Models the parts of SQS/SNS the adapter depends on: long-poll receive,
//! receipt handles, visibility timeouts, delete-as-ack, topic fan-out with
//! raw delivery, and paginated topic listings.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use stellwerk_core::message::Headers;
use stellwerk_sqs_sns::{
    CreateAttributes, MessagingError, QueueClient, ReceivedMessage, TopicClient, TopicPage,
};

const ACCOUNT: &str = "000000000000";
const LIST_TOPICS_PAGE_SIZE: usize = 2;

struct StoredMessage {
    id: String,
    body: String,
    headers: Headers,
    receipt_handle: String,
    visible_at: Instant,
    receive_count: u32,
}

struct Queue {
    url: String,
    arn: String,
    kms_master_key_id: Option<String>,
    messages: Vec<StoredMessage>,
}

struct Topic {
    arn: String,
    /// Subscribed queue ARNs (always raw delivery).
    subscriptions: Vec<String>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, Queue>,
    topics: HashMap<String, Topic>,
    get_queue_url_calls: Vec<(String, Option<String>)>,
    deleted_queues: Vec<String>,
    next_id: u64,
}

impl BrokerState {
    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("msg-{}", self.next_id)
    }

    fn fresh_receipt(&mut self) -> String {
        self.next_id += 1;
        format!("receipt-{}", self.next_id)
    }

    fn add_queue(&mut self, name: &str, kms: Option<String>) -> String {
        let url = format!("https://sqs.test/{ACCOUNT}/{name}");
        let arn = format!("arn:aws:sqs:test:{ACCOUNT}:{name}");
        self.queues.entry(name.to_string()).or_insert(Queue {
            url: url.clone(),
            arn,
            kms_master_key_id: kms,
            messages: Vec::new(),
        });
        url
    }

    fn queue_by_url_mut(&mut self, url: &str) -> Option<&mut Queue> {
        self.queues.values_mut().find(|q| q.url == url)
    }

    fn queue_by_arn_mut(&mut self, arn: &str) -> Option<&mut Queue> {
        self.queues.values_mut().find(|q| q.arn == arn)
    }

    fn push_message(&mut self, queue_url: &str, body: &str, headers: &Headers) -> bool {
        let id = self.fresh_id();
        let receipt_handle = self.fresh_receipt();
        let Some(queue) = self.queue_by_url_mut(queue_url) else {
            return false;
        };
        queue.messages.push(StoredMessage {
            id,
            body: body.to_string(),
            headers: headers.clone(),
            receipt_handle,
            visible_at: Instant::now(),
            receive_count: 0,
        });
        true
    }

    fn sorted_topic_arns(&self) -> Vec<String> {
        let mut arns: Vec<String> = self.topics.values().map(|t| t.arn.clone()).collect();
        arns.sort();
        arns
    }
}

/// Shared in-memory broker handed to both client wrappers.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    /// Visibility timeout applied on every receive.
    visibility: Duration,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            visibility: Duration::from_secs(30),
        }
    }

    pub fn with_visibility(mut self, visibility: Duration) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn queue_client(&self) -> Arc<InMemoryQueueClient> {
        Arc::new(InMemoryQueueClient {
            broker: self.clone(),
        })
    }

    pub fn topic_client(&self) -> Arc<InMemoryTopicClient> {
        Arc::new(InMemoryTopicClient {
            broker: self.clone(),
        })
    }

    // ── Test seeding and assertion helpers ────────────────────

    pub fn seed_queue(&self, name: &str) -> String {
        self.state.lock().unwrap().add_queue(name, None)
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().unwrap().queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state.lock().unwrap().queues.contains_key(name)
    }

    pub fn queue_names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.queue_names()
            .into_iter()
            .filter(|n| n.starts_with(prefix))
            .collect()
    }

    /// (body, headers) of every message currently stored on a queue.
    pub fn messages_in(&self, name: &str) -> Vec<(String, Headers)> {
        let state = self.state.lock().unwrap();
        state
            .queues
            .get(name)
            .map(|q| {
                q.messages
                    .iter()
                    .map(|m| (m.body.clone(), m.headers.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn kms_key_of(&self, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .queues
            .get(name)
            .and_then(|q| q.kms_master_key_id.clone())
    }

    pub fn get_queue_url_calls(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().unwrap().get_queue_url_calls.clone()
    }

    pub fn deleted_queues(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_queues.clone()
    }

    pub fn subscriptions_of(&self, topic_name: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .topics
            .get(topic_name)
            .map(|t| t.subscriptions.clone())
            .unwrap_or_default()
    }
}

pub struct InMemoryQueueClient {
    broker: InMemoryBroker,
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn create_queue(
        &self,
        name: &str,
        attrs: &CreateAttributes,
    ) -> Result<String, MessagingError> {
        let mut state = self.broker.state.lock().unwrap();
        Ok(state.add_queue(name, attrs.kms_master_key_id.clone()))
    }

    async fn get_queue_url(
        &self,
        name: &str,
        owner_account_id: Option<&str>,
    ) -> Result<Option<String>, MessagingError> {
        let mut state = self.broker.state.lock().unwrap();
        state
            .get_queue_url_calls
            .push((name.to_string(), owner_account_id.map(String::from)));
        Ok(state.queues.get(name).map(|q| q.url.clone()))
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), MessagingError> {
        let mut state = self.broker.state.lock().unwrap();
        let Some(name) = state
            .queues
            .iter()
            .find(|(_, q)| q.url == queue_url)
            .map(|(name, _)| name.clone())
        else {
            return Err(MessagingError::Connection(format!(
                "no such queue: {queue_url}"
            )));
        };
        state.queues.remove(&name);
        state.deleted_queues.push(name);
        Ok(())
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_time_secs: u32,
    ) -> Result<Vec<ReceivedMessage>, MessagingError> {
        let deadline = Instant::now() + Duration::from_secs(wait_time_secs as u64);
        loop {
            {
                let mut state = self.broker.state.lock().unwrap();
                let visibility = self.broker.visibility;
                let mut receipts = Vec::new();
                let now = Instant::now();
                {
                    let Some(queue) = state.queue_by_url_mut(queue_url) else {
                        return Err(MessagingError::Connection(format!(
                            "no such queue: {queue_url}"
                        )));
                    };
                    for stored in queue.messages.iter_mut() {
                        if receipts.len() as u32 >= max_messages {
                            break;
                        }
                        if stored.visible_at <= now {
                            stored.receive_count += 1;
                            stored.visible_at = now + visibility;
                            receipts.push(stored.receipt_handle.clone());
                        }
                    }
                }
                // Re-issue receipt handles for this delivery.
                let mut received = Vec::new();
                for old_receipt in receipts {
                    let fresh = state.fresh_receipt();
                    let queue = state
                        .queue_by_url_mut(queue_url)
                        .expect("queue existed above");
                    if let Some(stored) = queue
                        .messages
                        .iter_mut()
                        .find(|m| m.receipt_handle == old_receipt)
                    {
                        stored.receipt_handle = fresh.clone();
                        received.push(ReceivedMessage {
                            id: stored.id.clone(),
                            body: stored.body.clone(),
                            headers: stored.headers.clone(),
                            receipt_handle: fresh,
                            sent_at: None,
                            receive_count: stored.receive_count,
                        });
                    }
                }
                if !received.is_empty() {
                    return Ok(received);
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<(), MessagingError> {
        let mut state = self.broker.state.lock().unwrap();
        if state.push_message(queue_url, body, headers) {
            Ok(())
        } else {
            Err(MessagingError::Connection(format!(
                "no such queue: {queue_url}"
            )))
        }
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), MessagingError> {
        let mut state = self.broker.state.lock().unwrap();
        let Some(queue) = state.queue_by_url_mut(queue_url) else {
            return Err(MessagingError::Connection(format!(
                "no such queue: {queue_url}"
            )));
        };
        queue.messages.retain(|m| m.receipt_handle != receipt_handle);
        Ok(())
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_secs: u32,
    ) -> Result<(), MessagingError> {
        let mut state = self.broker.state.lock().unwrap();
        let Some(queue) = state.queue_by_url_mut(queue_url) else {
            return Err(MessagingError::Connection(format!(
                "no such queue: {queue_url}"
            )));
        };
        if let Some(stored) = queue
            .messages
            .iter_mut()
            .find(|m| m.receipt_handle == receipt_handle)
        {
            stored.visible_at =
                Instant::now() + Duration::from_secs(visibility_timeout_secs as u64);
        }
        Ok(())
    }

    async fn queue_arn(&self, queue_url: &str) -> Result<String, MessagingError> {
        let state = self.broker.state.lock().unwrap();
        state
            .queues
            .values()
            .find(|q| q.url == queue_url)
            .map(|q| q.arn.clone())
            .ok_or_else(|| MessagingError::Connection(format!("no such queue: {queue_url}")))
    }
}

pub struct InMemoryTopicClient {
    broker: InMemoryBroker,
}

#[async_trait]
impl TopicClient for InMemoryTopicClient {
    async fn create_topic(
        &self,
        name: &str,
        _attrs: &CreateAttributes,
    ) -> Result<String, MessagingError> {
        let mut state = self.broker.state.lock().unwrap();
        let arn = format!("arn:aws:sns:test:{ACCOUNT}:{name}");
        state.topics.entry(name.to_string()).or_insert(Topic {
            arn: arn.clone(),
            subscriptions: Vec::new(),
        });
        Ok(arn)
    }

    async fn list_topics(&self, next_token: Option<&str>) -> Result<TopicPage, MessagingError> {
        let state = self.broker.state.lock().unwrap();
        let arns = state.sorted_topic_arns();
        let start: usize = next_token
            .map(|t| {
                t.parse().map_err(|_| {
                    MessagingError::Connection(format!("bad pagination token: {t}"))
                })
            })
            .transpose()?
            .unwrap_or(0);
        let end = (start + LIST_TOPICS_PAGE_SIZE).min(arns.len());
        Ok(TopicPage {
            arns: arns[start..end].to_vec(),
            next_token: (end < arns.len()).then(|| end.to_string()),
        })
    }

    async fn publish(
        &self,
        topic_arn: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<(), MessagingError> {
        let mut state = self.broker.state.lock().unwrap();
        let Some(topic) = state.topics.values().find(|t| t.arn == topic_arn) else {
            return Err(MessagingError::Connection(format!(
                "no such topic: {topic_arn}"
            )));
        };
        let subscriptions = topic.subscriptions.clone();
        for queue_arn in subscriptions {
            // Raw delivery: body and attributes land on the queue unchanged.
            let url = state.queue_by_arn_mut(&queue_arn).map(|q| q.url.clone());
            if let Some(url) = url {
                state.push_message(&url, body, headers);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic_arn: &str, queue_arn: &str) -> Result<(), MessagingError> {
        let mut state = self.broker.state.lock().unwrap();
        let Some(topic) = state.topics.values_mut().find(|t| t.arn == topic_arn) else {
            return Err(MessagingError::Connection(format!(
                "no such topic: {topic_arn}"
            )));
        };
        if !topic.subscriptions.iter().any(|s| s == queue_arn) {
            topic.subscriptions.push(queue_arn.to_string());
        }
        Ok(())
    }
}
