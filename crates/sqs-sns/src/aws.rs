//! AWS SQS/SNS client implementations.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName};
use chrono::{TimeZone, Utc};
use tracing::{debug, info, warn};

use stellwerk_core::config::AwsConfig;
use stellwerk_core::message::Headers;

use crate::client::{CreateAttributes, QueueClient, ReceivedMessage, TopicClient, TopicPage};
use crate::error::MessagingError;

/// Ensure an endpoint override carries a scheme.
fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

fn static_credentials(aws: &AwsConfig) -> Option<Credentials> {
    match (&aws.access_key_id, &aws.secret_access_key) {
        (Some(key_id), Some(secret)) => Some(Credentials::new(
            key_id,
            secret,
            None,
            None,
            "stellwerk-static",
        )),
        _ => None,
    }
}

// ── SQS ───────────────────────────────────────────────────────

/// SQS-backed [`QueueClient`].
pub struct AwsQueueClient {
    client: aws_sdk_sqs::Client,
}

impl AwsQueueClient {
    /// Build an SQS client from messaging config.
    ///
    /// The client config is built directly — not via `aws_config::defaults()`
    /// — so a process-wide `AWS_ENDPOINT_URL` pointing at another service
    /// cannot hijack SQS requests.
    pub fn new(aws: &AwsConfig) -> Self {
        let region = aws_sdk_sqs::config::Region::new(aws.region.clone());
        let mut config = aws_sdk_sqs::Config::builder()
            .region(region)
            .behavior_version(aws_sdk_sqs::config::BehaviorVersion::latest());

        if let Some(creds) = static_credentials(aws) {
            config = config.credentials_provider(creds);
        }
        if let Some(endpoint) = &aws.sqs_endpoint {
            if !endpoint.is_empty() {
                config = config.endpoint_url(normalize_endpoint(endpoint));
            }
        }

        let client = aws_sdk_sqs::Client::from_conf(config.build());
        info!(region = %aws.region, "SQS client initialized");
        Self { client }
    }
}

#[async_trait]
impl QueueClient for AwsQueueClient {
    async fn create_queue(
        &self,
        name: &str,
        attrs: &CreateAttributes,
    ) -> Result<String, MessagingError> {
        let mut request = self.client.create_queue().queue_name(name);
        if let Some(kms_key) = &attrs.kms_master_key_id {
            request = request.attributes(QueueAttributeName::KmsMasterKeyId, kms_key);
        }
        let output = request
            .send()
            .await
            .map_err(|e| MessagingError::Connection(format!("SQS create_queue failed: {e:?}")))?;
        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| MessagingError::Connection("create_queue returned no URL".into()))
    }

    async fn get_queue_url(
        &self,
        name: &str,
        owner_account_id: Option<&str>,
    ) -> Result<Option<String>, MessagingError> {
        let result = self
            .client
            .get_queue_url()
            .queue_name(name)
            .set_queue_owner_aws_account_id(owner_account_id.map(str::to_string))
            .send()
            .await;
        match result {
            Ok(output) => Ok(output.queue_url().map(str::to_string)),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_queue_does_not_exist() {
                    Ok(None)
                } else {
                    Err(MessagingError::Connection(format!(
                        "SQS get_queue_url failed: {service_error:?}"
                    )))
                }
            }
        }
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), MessagingError> {
        self.client
            .delete_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|e| MessagingError::Connection(format!("SQS delete_queue failed: {e:?}")))?;
        Ok(())
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_time_secs: u32,
    ) -> Result<Vec<ReceivedMessage>, MessagingError> {
        // SQS caps at 10 messages and 20s wait per request.
        let response = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages.min(10) as i32)
            .wait_time_seconds(wait_time_secs.min(20) as i32)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| MessagingError::Connection(format!("SQS receive failed: {e:?}")))?;

        let sqs_messages = response.messages.unwrap_or_default();
        let mut messages = Vec::with_capacity(sqs_messages.len());
        for msg in sqs_messages {
            let Some(receipt_handle) = msg.receipt_handle().map(str::to_string) else {
                warn!(queue_url = %queue_url, "received message without receipt handle, skipping");
                continue;
            };

            let headers: Headers = msg
                .message_attributes()
                .map(|attrs| {
                    attrs
                        .iter()
                        .filter_map(|(key, value)| {
                            value.string_value().map(|v| (key.clone(), v.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default();

            let sent_at = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SentTimestamp))
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

            let receive_count = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(1);

            messages.push(ReceivedMessage {
                id: msg.message_id().unwrap_or("unknown").to_string(),
                body: msg.body().unwrap_or("").to_string(),
                headers,
                receipt_handle,
                sent_at,
                receive_count,
            });
        }
        debug!(queue_url = %queue_url, count = messages.len(), "received SQS messages");
        Ok(messages)
    }

    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<(), MessagingError> {
        let mut request = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body);
        for (key, value) in headers {
            let attribute = aws_sdk_sqs::types::MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| {
                    MessagingError::Connection(format!("invalid message attribute `{key}`: {e}"))
                })?;
            request = request.message_attributes(key, attribute);
        }
        request
            .send()
            .await
            .map_err(|e| MessagingError::Connection(format!("SQS send failed: {e:?}")))?;
        debug!(queue_url = %queue_url, "message sent");
        Ok(())
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), MessagingError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| MessagingError::Connection(format!("SQS delete failed: {e:?}")))?;
        Ok(())
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout_secs: u32,
    ) -> Result<(), MessagingError> {
        self.client
            .change_message_visibility()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(visibility_timeout_secs as i32)
            .send()
            .await
            .map_err(|e| {
                MessagingError::Connection(format!("SQS visibility change failed: {e:?}"))
            })?;
        Ok(())
    }

    async fn queue_arn(&self, queue_url: &str) -> Result<String, MessagingError> {
        let response = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| {
                MessagingError::Connection(format!("SQS get_queue_attributes failed: {e:?}"))
            })?;
        response
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::QueueArn))
            .map(String::from)
            .ok_or_else(|| {
                MessagingError::Connection(format!("queue {queue_url} reported no ARN"))
            })
    }
}

// ── SNS ───────────────────────────────────────────────────────

/// SNS-backed [`TopicClient`].
pub struct AwsTopicClient {
    client: aws_sdk_sns::Client,
}

impl AwsTopicClient {
    pub fn new(aws: &AwsConfig) -> Self {
        let region = aws_sdk_sns::config::Region::new(aws.region.clone());
        let mut config = aws_sdk_sns::Config::builder()
            .region(region)
            .behavior_version(aws_sdk_sns::config::BehaviorVersion::latest());

        if let Some(creds) = static_credentials(aws) {
            config = config.credentials_provider(creds);
        }
        if let Some(endpoint) = &aws.sns_endpoint {
            if !endpoint.is_empty() {
                config = config.endpoint_url(normalize_endpoint(endpoint));
            }
        }

        let client = aws_sdk_sns::Client::from_conf(config.build());
        info!(region = %aws.region, "SNS client initialized");
        Self { client }
    }
}

#[async_trait]
impl TopicClient for AwsTopicClient {
    async fn create_topic(
        &self,
        name: &str,
        attrs: &CreateAttributes,
    ) -> Result<String, MessagingError> {
        let mut request = self.client.create_topic().name(name);
        if let Some(kms_key) = &attrs.kms_master_key_id {
            request = request.attributes("KmsMasterKeyId", kms_key);
        }
        let output = request
            .send()
            .await
            .map_err(|e| MessagingError::Connection(format!("SNS create_topic failed: {e:?}")))?;
        output
            .topic_arn()
            .map(str::to_string)
            .ok_or_else(|| MessagingError::Connection("create_topic returned no ARN".into()))
    }

    async fn list_topics(&self, next_token: Option<&str>) -> Result<TopicPage, MessagingError> {
        let output = self
            .client
            .list_topics()
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| MessagingError::Connection(format!("SNS list_topics failed: {e:?}")))?;
        Ok(TopicPage {
            arns: output
                .topics()
                .iter()
                .filter_map(|t| t.topic_arn().map(str::to_string))
                .collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn publish(
        &self,
        topic_arn: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<(), MessagingError> {
        let mut request = self.client.publish().topic_arn(topic_arn).message(body);
        for (key, value) in headers {
            let attribute = aws_sdk_sns::types::MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| {
                    MessagingError::Connection(format!("invalid message attribute `{key}`: {e}"))
                })?;
            request = request.message_attributes(key, attribute);
        }
        request
            .send()
            .await
            .map_err(|e| MessagingError::Connection(format!("SNS publish failed: {e:?}")))?;
        debug!(topic_arn = %topic_arn, "event published");
        Ok(())
    }

    async fn subscribe(&self, topic_arn: &str, queue_arn: &str) -> Result<(), MessagingError> {
        // Raw delivery keeps body and attributes intact end-to-end instead of
        // wrapping them in the SNS JSON envelope.
        self.client
            .subscribe()
            .topic_arn(topic_arn)
            .protocol("sqs")
            .endpoint(queue_arn)
            .attributes("RawMessageDelivery", "true")
            .send()
            .await
            .map_err(|e| MessagingError::Connection(format!("SNS subscribe failed: {e:?}")))?;
        info!(topic_arn = %topic_arn, queue_arn = %queue_arn, "queue subscribed to topic");
        Ok(())
    }
}
