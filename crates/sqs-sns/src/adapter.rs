//! Adapter façade: the three-verb messaging API over SQS/SNS.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stellwerk_core::codec::{BodyCodec, JsonCodec};
use stellwerk_core::config::MessagingConfig;
use stellwerk_core::message::{
    Body, Headers, Message, ReservedHeaders, Target, HEADER_EVENT_TYPE, HEADER_METHOD,
    HEADER_REPLY_QUEUE_URL, HEADER_REQUEST_ID,
};

use crate::aws::{AwsQueueClient, AwsTopicClient};
use crate::client::{QueueClient, ReceivedMessage, TopicClient};
use crate::consumer::{Consumer, MessageHandler};
use crate::error::MessagingError;
use crate::registry::NameRegistry;
use crate::reply::ReplyConsumer;
use crate::worker_pool::WorkerPool;

/// 16 hex characters of randomness, used for request ids and the names of
/// per-process ephemeral queues.
pub(crate) fn random_token() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

// ── Handler seam ─────────────────────────────────────────────────────

/// Application-side handler for the three message verbs.
///
/// Errors follow the consumer contract: [`MessagingError::Nack`] requests
/// redelivery, any other error leaves the message to the queue's visibility
/// timeout. Unimplemented verbs default to a handler error.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Handle a COMMAND addressed to `method`.
    async fn call_command(&self, method: &str, message: Message) -> Result<(), MessagingError> {
        let _ = message;
        Err(MessagingError::Handler(format!(
            "command method `{method}` not implemented"
        )))
    }

    /// Handle a QUERY addressed to `method` and produce the response body.
    async fn call_query(&self, method: &str, message: Message) -> Result<Body, MessagingError> {
        let _ = message;
        Err(MessagingError::Handler(format!(
            "query method `{method}` not implemented"
        )))
    }

    /// Handle an EVENT of the given type.
    async fn call_event(&self, event_type: &str, message: Message) -> Result<(), MessagingError> {
        let _ = message;
        Err(MessagingError::Handler(format!(
            "event type `{event_type}` not implemented"
        )))
    }
}

// ── Options ──────────────────────────────────────────────────────────

/// Options for `command` and `event`.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Caller-supplied headers, merged under the reserved `__*` keys
    /// (reserved keys win).
    pub headers: Headers,
}

/// Options for `query`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub headers: Headers,
    /// Per-call timeout; defaults to `mq_default_query_timeout`.
    pub timeout: Option<Duration>,
}

/// Options for processor registration.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Run handlers on the shared worker pool (default). Disabling this
    /// processes messages inline on the consumer loop, for single-threaded
    /// deployments.
    pub use_worker_pool: bool,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            use_worker_pool: true,
        }
    }
}

// ── Adapter interface ────────────────────────────────────────────────

/// The messaging adapter interface: lifecycle, the three producer verbs,
/// and processor registration.
#[async_trait]
pub trait MessagingAdapter: Send + Sync {
    async fn start(&self) -> Result<(), MessagingError>;

    async fn stop(&self) -> Result<(), MessagingError>;

    /// Fire-and-forget point-to-point send to `"<queue>/<method>"`.
    /// The target queue must exist.
    async fn command(
        &self,
        target: &str,
        body: Body,
        opts: SendOptions,
    ) -> Result<(), MessagingError>;

    /// Request/reply against `"<queue>/<method>"` with a timeout.
    async fn query(
        &self,
        target: &str,
        body: Body,
        opts: QueryOptions,
    ) -> Result<Body, MessagingError>;

    /// Publish to `"<topic>#<event_type>"`; the topic is created if missing.
    async fn event(
        &self,
        target: &str,
        body: Body,
        opts: SendOptions,
    ) -> Result<(), MessagingError>;

    /// Consume a request queue (created if missing), dispatching QUERYs to
    /// `call_query` and COMMANDs to `call_command`.
    async fn start_request_processor(
        &self,
        queue_name: &str,
        processor: Arc<dyn MessageProcessor>,
        opts: ProcessorOptions,
    ) -> Result<(), MessagingError>;

    /// Consume a topic through a private per-process queue that is created,
    /// subscribed, and deleted again when processors stop.
    async fn start_event_processor(
        &self,
        topic_name: &str,
        processor: Arc<dyn MessageProcessor>,
        opts: ProcessorOptions,
    ) -> Result<(), MessagingError>;

    /// Consume a topic through a named, durable queue (both created if
    /// missing, queue subscribed to topic).
    async fn start_event_processor_with_queue(
        &self,
        topic_name: &str,
        queue_name: &str,
        processor: Arc<dyn MessageProcessor>,
        opts: ProcessorOptions,
    ) -> Result<(), MessagingError>;

    /// Signal every consumer first, then join them all, then stop the reply
    /// consumer — total stop time is one long-poll interval, not one per
    /// consumer.
    async fn stop_all_processors(&self) -> Result<(), MessagingError>;
}

/// Build the adapter selected by `mq_adapter`.
pub fn create_adapter(
    config: MessagingConfig,
) -> Result<Arc<dyn MessagingAdapter>, MessagingError> {
    match config.adapter.as_str() {
        "sqs_sns" => Ok(Arc::new(SqsSnsAdapter::new(config))),
        "" => Err(MessagingError::Config("mq_adapter is required".into())),
        other => Err(MessagingError::Config(format!(
            "unknown mq_adapter `{other}`"
        ))),
    }
}

// ── SQS/SNS adapter ──────────────────────────────────────────────────

/// Everything that only exists between `start` and `stop`.
struct Runtime {
    queue_client: Arc<dyn QueueClient>,
    topic_client: Arc<dyn TopicClient>,
    registry: NameRegistry,
    pool: Arc<WorkerPool>,
}

/// SQS/SNS implementation of [`MessagingAdapter`].
pub struct SqsSnsAdapter {
    config: MessagingConfig,
    codec: Arc<dyn BodyCodec>,
    /// Pre-built clients, when injected; otherwise `start` builds AWS ones.
    clients: Option<(Arc<dyn QueueClient>, Arc<dyn TopicClient>)>,
    runtime: tokio::sync::RwLock<Option<Arc<Runtime>>>,
    consumers: tokio::sync::Mutex<Vec<Consumer>>,
    reply: tokio::sync::Mutex<Option<Arc<ReplyConsumer>>>,
    /// URLs of private per-process event queues, deleted when processors stop.
    ephemeral_queue_urls: tokio::sync::Mutex<Vec<String>>,
}

impl SqsSnsAdapter {
    /// Adapter with the default JSON codec; AWS clients are built from the
    /// config at `start`.
    pub fn new(config: MessagingConfig) -> Self {
        Self::with_codec(config, Arc::new(JsonCodec))
    }

    pub fn with_codec(config: MessagingConfig, codec: Arc<dyn BodyCodec>) -> Self {
        Self {
            config,
            codec,
            clients: None,
            runtime: tokio::sync::RwLock::new(None),
            consumers: tokio::sync::Mutex::new(Vec::new()),
            reply: tokio::sync::Mutex::new(None),
            ephemeral_queue_urls: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Adapter over pre-built clients (LocalStack, in-memory test doubles).
    pub fn with_clients(
        config: MessagingConfig,
        codec: Arc<dyn BodyCodec>,
        queue_client: Arc<dyn QueueClient>,
        topic_client: Arc<dyn TopicClient>,
    ) -> Self {
        Self {
            clients: Some((queue_client, topic_client)),
            ..Self::with_codec(config, codec)
        }
    }

    async fn runtime(&self) -> Result<Arc<Runtime>, MessagingError> {
        self.runtime
            .read()
            .await
            .clone()
            .ok_or_else(|| MessagingError::Config("adapter not started".into()))
    }

    fn read_timeout_secs(&self) -> u32 {
        self.config.aws.sqs_read_timeout_secs
    }

    /// Lazily start the reply consumer; the construction lock makes the
    /// first N concurrent queries share one reply queue.
    async fn reply_consumer(
        &self,
        runtime: &Arc<Runtime>,
    ) -> Result<Arc<ReplyConsumer>, MessagingError> {
        let mut guard = self.reply.lock().await;
        if let Some(reply) = guard.as_ref() {
            return Ok(reply.clone());
        }
        let queue_name = format!("{}{}", self.config.reply_queue_prefix, random_token());
        let reply = Arc::new(
            ReplyConsumer::start(
                runtime.queue_client.clone(),
                &runtime.registry,
                &queue_name,
                self.read_timeout_secs(),
            )
            .await?,
        );
        *guard = Some(reply.clone());
        Ok(reply)
    }

    async fn ensure_queue(
        &self,
        runtime: &Arc<Runtime>,
        name: &str,
    ) -> Result<String, MessagingError> {
        match runtime
            .registry
            .queue_url(&*runtime.queue_client, name)
            .await?
        {
            Some(url) => Ok(url),
            None => {
                runtime
                    .registry
                    .create_queue(&*runtime.queue_client, name)
                    .await
            }
        }
    }

    async fn ensure_topic(
        &self,
        runtime: &Arc<Runtime>,
        name: &str,
    ) -> Result<String, MessagingError> {
        match runtime
            .registry
            .topic_arn(&*runtime.topic_client, name)
            .await?
        {
            Some(arn) => Ok(arn),
            None => {
                runtime
                    .registry
                    .create_topic(&*runtime.topic_client, name)
                    .await
            }
        }
    }

    /// Handler for request queues: QUERYs (reply queue header present) go to
    /// `call_query` and their response is sent back under the original
    /// request id; COMMANDs go to `call_command`.
    fn request_handler(
        &self,
        runtime: &Arc<Runtime>,
        processor: Arc<dyn MessageProcessor>,
    ) -> MessageHandler {
        let codec = self.codec.clone();
        let client = runtime.queue_client.clone();
        Arc::new(move |received: ReceivedMessage| {
            let codec = codec.clone();
            let client = client.clone();
            let processor = processor.clone();
            Box::pin(async move {
                let ReservedHeaders {
                    method,
                    request_id,
                    reply_queue_url,
                    ..
                } = ReservedHeaders::from_headers(&received.headers);
                let method = method.unwrap_or_default();
                let body = codec.decode(&received.body)?;
                let message = Message::new(body, received.headers);

                let Some(reply_queue_url) = reply_queue_url else {
                    return processor.call_command(&method, message).await;
                };

                let response = processor.call_query(&method, message).await?;

                // A failure past this point is logged and recovered: the
                // request is still acked and the caller observes a timeout.
                let mut reply_headers = Headers::new();
                if let Some(request_id) = request_id {
                    reply_headers.insert(HEADER_REQUEST_ID.to_string(), request_id);
                }
                match codec.encode(&response) {
                    Ok(raw) => {
                        if let Err(e) = client
                            .send_message(&reply_queue_url, &raw, &reply_headers)
                            .await
                        {
                            warn!(reply_queue_url = %reply_queue_url, error = %e, "failed to deliver query response");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to encode query response");
                    }
                }
                Ok(())
            })
        })
    }

    /// Handler for event queues: every message goes to `call_event` with the
    /// fan-out discriminator from its headers.
    fn event_handler(&self, processor: Arc<dyn MessageProcessor>) -> MessageHandler {
        let codec = self.codec.clone();
        Arc::new(move |received: ReceivedMessage| {
            let codec = codec.clone();
            let processor = processor.clone();
            Box::pin(async move {
                let event_type = received
                    .headers
                    .get(HEADER_EVENT_TYPE)
                    .cloned()
                    .unwrap_or_default();
                let body = codec.decode(&received.body)?;
                let message = Message::new(body, received.headers);
                processor.call_event(&event_type, message).await
            })
        })
    }

    async fn spawn_event_consumer(
        &self,
        runtime: &Arc<Runtime>,
        topic_name: &str,
        queue_name: &str,
        queue_url: String,
        processor: Arc<dyn MessageProcessor>,
        opts: &ProcessorOptions,
    ) -> Result<(), MessagingError> {
        let topic_arn = self.ensure_topic(runtime, topic_name).await?;
        runtime
            .registry
            .subscribe(
                &*runtime.queue_client,
                &*runtime.topic_client,
                &topic_arn,
                &queue_url,
            )
            .await?;

        let pool = opts.use_worker_pool.then(|| runtime.pool.clone());
        let handler = self.event_handler(processor);
        let consumer = Consumer::spawn(
            runtime.queue_client.clone(),
            queue_url.clone(),
            self.read_timeout_secs(),
            pool,
            handler,
        );
        self.consumers.lock().await.push(consumer);
        info!(topic = %topic_name, queue = %queue_name, url = %queue_url, "event processor started");
        Ok(())
    }
}

#[async_trait]
impl MessagingAdapter for SqsSnsAdapter {
    async fn start(&self) -> Result<(), MessagingError> {
        let mut slot = self.runtime.write().await;
        if slot.is_some() {
            return Err(MessagingError::Config("adapter already started".into()));
        }

        let (queue_client, topic_client) = match &self.clients {
            Some((queue, topic)) => (queue.clone(), topic.clone()),
            None => (
                Arc::new(AwsQueueClient::new(&self.config.aws)) as Arc<dyn QueueClient>,
                Arc::new(AwsTopicClient::new(&self.config.aws)) as Arc<dyn TopicClient>,
            ),
        };
        let registry = NameRegistry::new(&self.config);
        let pool = Arc::new(WorkerPool::new(&self.config.worker_pool));

        // Availability check: one no-op lookup against each service. Only a
        // transport-level failure is an error — "queue not found" is fine.
        queue_client
            .get_queue_url(&registry.fqn("availability-check"), None)
            .await
            .map_err(|e| {
                MessagingError::Connection(format!("SQS availability check failed: {e}"))
            })?;
        topic_client.list_topics(None).await.map_err(|e| {
            MessagingError::Connection(format!("SNS availability check failed: {e}"))
        })?;

        *slot = Some(Arc::new(Runtime {
            queue_client,
            topic_client,
            registry,
            pool,
        }));
        info!("sqs_sns messaging adapter started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), MessagingError> {
        self.stop_all_processors().await?;
        if let Some(runtime) = self.runtime.write().await.take() {
            runtime.pool.shutdown().await;
            runtime.registry.clear().await;
        }
        info!("sqs_sns messaging adapter stopped");
        Ok(())
    }

    async fn command(
        &self,
        target: &str,
        body: Body,
        opts: SendOptions,
    ) -> Result<(), MessagingError> {
        let (queue, method) = Target::parse_queue(target)?;
        let runtime = self.runtime().await?;
        let queue_url = runtime
            .registry
            .queue_url(&*runtime.queue_client, &queue)
            .await?
            .ok_or_else(|| {
                MessagingError::Connection(format!("command target queue does not exist: {queue}"))
            })?;

        let mut headers = opts.headers;
        headers.insert(HEADER_METHOD.to_string(), method);
        let raw = self.codec.encode(&body)?;
        runtime
            .queue_client
            .send_message(&queue_url, &raw, &headers)
            .await?;
        debug!(queue = %queue, "command sent");
        Ok(())
    }

    async fn query(
        &self,
        target: &str,
        body: Body,
        opts: QueryOptions,
    ) -> Result<Body, MessagingError> {
        let (queue, method) = Target::parse_queue(target)?;
        let runtime = self.runtime().await?;
        let queue_url = runtime
            .registry
            .queue_url(&*runtime.queue_client, &queue)
            .await?
            .ok_or_else(|| {
                MessagingError::Connection(format!("query target queue does not exist: {queue}"))
            })?;

        let reply = self.reply_consumer(&runtime).await?;
        let request_id = random_token();
        let waiter = reply.register(&request_id).await;

        let mut headers = opts.headers;
        headers.insert(HEADER_METHOD.to_string(), method);
        headers.insert(HEADER_REQUEST_ID.to_string(), request_id.clone());
        headers.insert(
            HEADER_REPLY_QUEUE_URL.to_string(),
            reply.queue_url().to_string(),
        );

        let raw = self.codec.encode(&body)?;
        if let Err(e) = runtime
            .queue_client
            .send_message(&queue_url, &raw, &headers)
            .await
        {
            reply.unregister(&request_id).await;
            return Err(e);
        }

        let timeout = opts
            .timeout
            .unwrap_or(Duration::from_secs(self.config.default_query_timeout_secs));
        match waiter.pop(Some(timeout)).await {
            Ok(response) => Ok(self.codec.decode(&response.body)?),
            Err(e) => {
                // Best-effort cleanup; a reply landing after this is dropped
                // by the dispatcher.
                reply.unregister(&request_id).await;
                debug!(queue = %queue, request_id = %request_id, "query timed out");
                Err(e)
            }
        }
    }

    async fn event(
        &self,
        target: &str,
        body: Body,
        opts: SendOptions,
    ) -> Result<(), MessagingError> {
        let (topic, event_type) = Target::parse_topic(target)?;
        let runtime = self.runtime().await?;
        let topic_arn = self.ensure_topic(&runtime, &topic).await?;

        let mut headers = opts.headers;
        headers.insert(HEADER_EVENT_TYPE.to_string(), event_type);
        let raw = self.codec.encode(&body)?;
        runtime
            .topic_client
            .publish(&topic_arn, &raw, &headers)
            .await?;
        debug!(topic = %topic, "event published");
        Ok(())
    }

    async fn start_request_processor(
        &self,
        queue_name: &str,
        processor: Arc<dyn MessageProcessor>,
        opts: ProcessorOptions,
    ) -> Result<(), MessagingError> {
        let runtime = self.runtime().await?;
        let queue_url = self.ensure_queue(&runtime, queue_name).await?;

        let pool = opts.use_worker_pool.then(|| runtime.pool.clone());
        let handler = self.request_handler(&runtime, processor);
        let consumer = Consumer::spawn(
            runtime.queue_client.clone(),
            queue_url.clone(),
            self.read_timeout_secs(),
            pool,
            handler,
        );
        self.consumers.lock().await.push(consumer);
        info!(queue = %queue_name, url = %queue_url, "request processor started");
        Ok(())
    }

    async fn start_event_processor(
        &self,
        topic_name: &str,
        processor: Arc<dyn MessageProcessor>,
        opts: ProcessorOptions,
    ) -> Result<(), MessagingError> {
        let runtime = self.runtime().await?;
        // Private per-process queue; deleted again when processors stop.
        let queue_name = format!("{topic_name}-listener-{}", random_token());
        let queue_url = runtime
            .registry
            .create_queue(&*runtime.queue_client, &queue_name)
            .await?;
        self.ephemeral_queue_urls
            .lock()
            .await
            .push(queue_url.clone());
        self.spawn_event_consumer(
            &runtime, topic_name, &queue_name, queue_url, processor, &opts,
        )
        .await
    }

    async fn start_event_processor_with_queue(
        &self,
        topic_name: &str,
        queue_name: &str,
        processor: Arc<dyn MessageProcessor>,
        opts: ProcessorOptions,
    ) -> Result<(), MessagingError> {
        let runtime = self.runtime().await?;
        let queue_url = self.ensure_queue(&runtime, queue_name).await?;
        self.spawn_event_consumer(
            &runtime, topic_name, queue_name, queue_url, processor, &opts,
        )
        .await
    }

    async fn stop_all_processors(&self) -> Result<(), MessagingError> {
        let consumers: Vec<Consumer> = self.consumers.lock().await.drain(..).collect();
        let reply = self.reply.lock().await.take();

        // Signal everything first so outstanding long polls run down in
        // parallel, then join.
        for consumer in &consumers {
            consumer.signal_stop();
        }
        if let Some(reply) = &reply {
            reply.signal_stop().await;
        }
        for consumer in consumers {
            consumer.stop().await;
        }
        if let Some(reply) = reply {
            reply.stop().await;
        }

        let ephemeral: Vec<String> = self.ephemeral_queue_urls.lock().await.drain(..).collect();
        if !ephemeral.is_empty() {
            let runtime = self.runtime().await?;
            for queue_url in ephemeral {
                if let Err(e) = runtime.queue_client.delete_queue(&queue_url).await {
                    warn!(queue_url = %queue_url, error = %e, "failed to delete private event queue");
                }
            }
        }
        Ok(())
    }
}
