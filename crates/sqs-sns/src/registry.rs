//! Queue/topic name resolution and caching.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, info};

use stellwerk_core::config::MessagingConfig;

use crate::client::{CreateAttributes, QueueClient, TopicClient};
use crate::error::MessagingError;

/// Characters SQS/SNS reject in names, and what they are rewritten to.
const ALPHABET_MAP: &[(char, char)] = &[('.', '-')];

/// Resolves logical queue/topic names to URLs and ARNs.
///
/// Names are fully qualified first (namespace prefix, then alphabet
/// translation); the caches are keyed by the FQN. Entries are written once
/// per adapter lifecycle and cleared on stop. SDK calls happen outside the
/// cache locks, with a set-if-absent insert afterwards.
pub struct NameRegistry {
    namespace: String,
    kms_master_key_id: Option<String>,
    /// Original (pre-namespace) queue name → owning AWS account id.
    cross_account: HashMap<String, String>,
    queue_urls: Mutex<HashMap<String, String>>,
    topic_arns: Mutex<HashMap<String, String>>,
}

impl NameRegistry {
    pub fn new(config: &MessagingConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            kms_master_key_id: config.aws.kms_master_key_id.clone(),
            cross_account: config.aws.cross_account_mapping.clone(),
            queue_urls: Mutex::new(HashMap::new()),
            topic_arns: Mutex::new(HashMap::new()),
        }
    }

    /// Fully qualified name: namespace prefix, then alphabet translation.
    /// Applied before every lookup, creation and deletion.
    pub fn fqn(&self, name: &str) -> String {
        let mut full = format!("{}{}", self.namespace, name);
        for &(from, to) in ALPHABET_MAP {
            full = full.replace(from, &to.to_string());
        }
        full
    }

    fn create_attributes(&self) -> CreateAttributes {
        CreateAttributes {
            kms_master_key_id: self.kms_master_key_id.clone(),
        }
    }

    /// Resolve a queue URL. `Ok(None)` means the queue does not exist.
    ///
    /// For queues owned by another account (per the cross-account mapping,
    /// keyed by the original name) the owner account id is passed along;
    /// the lookup itself always uses the FQN.
    pub async fn queue_url(
        &self,
        client: &dyn QueueClient,
        name: &str,
    ) -> Result<Option<String>, MessagingError> {
        let fqn = self.fqn(name);
        if let Some(url) = self.queue_urls.lock().await.get(&fqn) {
            return Ok(Some(url.clone()));
        }
        let owner = self.cross_account.get(name).map(String::as_str);
        let Some(url) = client.get_queue_url(&fqn, owner).await? else {
            return Ok(None);
        };
        debug!(queue = %fqn, url = %url, "queue URL resolved");
        let mut cache = self.queue_urls.lock().await;
        Ok(Some(cache.entry(fqn).or_insert(url).clone()))
    }

    /// Create a queue (idempotent provider-side) and cache its URL.
    pub async fn create_queue(
        &self,
        client: &dyn QueueClient,
        name: &str,
    ) -> Result<String, MessagingError> {
        let fqn = self.fqn(name);
        let url = client.create_queue(&fqn, &self.create_attributes()).await?;
        info!(queue = %fqn, url = %url, "queue created");
        let mut cache = self.queue_urls.lock().await;
        Ok(cache.entry(fqn).or_insert(url).clone())
    }

    /// Resolve a topic ARN by scanning the paginated topic listing for an
    /// ARN whose suffix after the last `:` equals the FQN.
    pub async fn topic_arn(
        &self,
        client: &dyn TopicClient,
        name: &str,
    ) -> Result<Option<String>, MessagingError> {
        let fqn = self.fqn(name);
        if let Some(arn) = self.topic_arns.lock().await.get(&fqn) {
            return Ok(Some(arn.clone()));
        }
        let mut next_token: Option<String> = None;
        loop {
            let page = client.list_topics(next_token.as_deref()).await?;
            for arn in page.arns {
                if arn.rsplit(':').next() == Some(fqn.as_str()) {
                    debug!(topic = %fqn, arn = %arn, "topic ARN resolved");
                    let mut cache = self.topic_arns.lock().await;
                    return Ok(Some(cache.entry(fqn).or_insert(arn).clone()));
                }
            }
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(None),
            }
        }
    }

    /// Create a topic (idempotent provider-side) and cache its ARN.
    pub async fn create_topic(
        &self,
        client: &dyn TopicClient,
        name: &str,
    ) -> Result<String, MessagingError> {
        let fqn = self.fqn(name);
        let arn = client.create_topic(&fqn, &self.create_attributes()).await?;
        info!(topic = %fqn, arn = %arn, "topic created");
        let mut cache = self.topic_arns.lock().await;
        Ok(cache.entry(fqn).or_insert(arn).clone())
    }

    /// Subscribe a queue to a topic (raw message delivery).
    pub async fn subscribe(
        &self,
        queue_client: &dyn QueueClient,
        topic_client: &dyn TopicClient,
        topic_arn: &str,
        queue_url: &str,
    ) -> Result<(), MessagingError> {
        let queue_arn = queue_client.queue_arn(queue_url).await?;
        topic_client.subscribe(topic_arn, &queue_arn).await
    }

    /// Drop all cached mappings (adapter stop).
    pub async fn clear(&self) {
        self.queue_urls.lock().await.clear();
        self.topic_arns.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ReceivedMessage, TopicPage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use stellwerk_core::message::Headers;

    fn config_with_namespace(namespace: &str) -> MessagingConfig {
        MessagingConfig {
            namespace: namespace.to_string(),
            ..MessagingConfig::default()
        }
    }

    #[test]
    fn fqn_prefixes_namespace_and_translates_dots() {
        let registry = NameRegistry::new(&config_with_namespace("svc."));
        assert_eq!(registry.fqn("users.created"), "svc-users-created");
    }

    #[test]
    fn fqn_is_idempotent_without_namespace() {
        let registry = NameRegistry::new(&config_with_namespace(""));
        let once = registry.fqn("a.hello");
        assert_eq!(registry.fqn(&once), once);
        assert_eq!(once, "a-hello");
    }

    /// Counts lookups and records the owner account passed in.
    struct CountingQueueClient {
        lookups: AtomicUsize,
        seen: StdMutex<Vec<(String, Option<String>)>>,
        url: Option<String>,
    }

    impl CountingQueueClient {
        fn returning(url: Option<&str>) -> Self {
            Self {
                lookups: AtomicUsize::new(0),
                seen: StdMutex::new(Vec::new()),
                url: url.map(String::from),
            }
        }
    }

    #[async_trait]
    impl QueueClient for CountingQueueClient {
        async fn create_queue(
            &self,
            name: &str,
            _attrs: &CreateAttributes,
        ) -> Result<String, MessagingError> {
            Ok(format!("https://sqs.test/000000000000/{name}"))
        }

        async fn get_queue_url(
            &self,
            name: &str,
            owner_account_id: Option<&str>,
        ) -> Result<Option<String>, MessagingError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((name.to_string(), owner_account_id.map(String::from)));
            Ok(self.url.clone())
        }

        async fn delete_queue(&self, _queue_url: &str) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn receive_message(
            &self,
            _queue_url: &str,
            _max_messages: u32,
            _wait_time_secs: u32,
        ) -> Result<Vec<ReceivedMessage>, MessagingError> {
            Ok(Vec::new())
        }

        async fn send_message(
            &self,
            _queue_url: &str,
            _body: &str,
            _headers: &Headers,
        ) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn delete_message(
            &self,
            _queue_url: &str,
            _receipt_handle: &str,
        ) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn change_message_visibility(
            &self,
            _queue_url: &str,
            _receipt_handle: &str,
            _visibility_timeout_secs: u32,
        ) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn queue_arn(&self, queue_url: &str) -> Result<String, MessagingError> {
            Ok(format!("arn:aws:sqs:test:000000000000:{queue_url}"))
        }
    }

    /// Serves a fixed ARN list, one ARN per page.
    struct PagedTopicClient {
        arns: Vec<String>,
        pages_served: AtomicUsize,
    }

    #[async_trait]
    impl TopicClient for PagedTopicClient {
        async fn create_topic(
            &self,
            name: &str,
            _attrs: &CreateAttributes,
        ) -> Result<String, MessagingError> {
            Ok(format!("arn:aws:sns:test:000000000000:{name}"))
        }

        async fn list_topics(
            &self,
            next_token: Option<&str>,
        ) -> Result<TopicPage, MessagingError> {
            self.pages_served.fetch_add(1, Ordering::SeqCst);
            let index: usize = next_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let next = index + 1;
            Ok(TopicPage {
                arns: self.arns.get(index).cloned().into_iter().collect(),
                next_token: (next < self.arns.len()).then(|| next.to_string()),
            })
        }

        async fn publish(
            &self,
            _topic_arn: &str,
            _body: &str,
            _headers: &Headers,
        ) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            _topic_arn: &str,
            _queue_arn: &str,
        ) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn queue_url_caches_after_first_lookup() {
        let registry = NameRegistry::new(&config_with_namespace(""));
        let client = CountingQueueClient::returning(Some("https://sqs.test/q"));
        assert_eq!(
            registry.queue_url(&client, "orders").await.unwrap(),
            Some("https://sqs.test/q".to_string())
        );
        assert_eq!(
            registry.queue_url(&client, "orders").await.unwrap(),
            Some("https://sqs.test/q".to_string())
        );
        assert_eq!(client.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queue_url_miss_is_not_cached() {
        let registry = NameRegistry::new(&config_with_namespace(""));
        let client = CountingQueueClient::returning(None);
        assert_eq!(registry.queue_url(&client, "ghost").await.unwrap(), None);
        assert_eq!(registry.queue_url(&client, "ghost").await.unwrap(), None);
        assert_eq!(client.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cross_account_lookup_passes_owner_and_fqn() {
        let mut config = config_with_namespace("svc.");
        config
            .aws
            .cross_account_mapping
            .insert("shared".to_string(), "999".to_string());
        let registry = NameRegistry::new(&config);
        let client = CountingQueueClient::returning(Some("https://sqs.test/shared"));

        registry.queue_url(&client, "shared").await.unwrap();

        let seen = client.seen.lock().unwrap();
        // The mapping is keyed by the original name, but the lookup itself
        // must use the translated fully qualified name.
        assert_eq!(
            *seen,
            vec![("svc-shared".to_string(), Some("999".to_string()))]
        );
    }

    #[tokio::test]
    async fn topic_arn_scans_pages_until_suffix_match() {
        let registry = NameRegistry::new(&config_with_namespace(""));
        let client = PagedTopicClient {
            arns: vec![
                "arn:aws:sns:test:000000000000:alpha".to_string(),
                "arn:aws:sns:test:000000000000:beta".to_string(),
                "arn:aws:sns:test:000000000000:gamma".to_string(),
            ],
            pages_served: AtomicUsize::new(0),
        };
        let arn = registry.topic_arn(&client, "gamma").await.unwrap();
        assert_eq!(arn.as_deref(), Some("arn:aws:sns:test:000000000000:gamma"));
        assert_eq!(client.pages_served.load(Ordering::SeqCst), 3);

        // Second resolution is served from the cache.
        registry.topic_arn(&client, "gamma").await.unwrap();
        assert_eq!(client.pages_served.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn topic_arn_rejects_partial_suffix() {
        let registry = NameRegistry::new(&config_with_namespace(""));
        let client = PagedTopicClient {
            arns: vec!["arn:aws:sns:test:000000000000:orders-v2".to_string()],
            pages_served: AtomicUsize::new(0),
        };
        assert_eq!(registry.topic_arn(&client, "orders").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_empties_caches() {
        let registry = NameRegistry::new(&config_with_namespace(""));
        let client = CountingQueueClient::returning(Some("https://sqs.test/q"));
        registry.queue_url(&client, "orders").await.unwrap();
        registry.clear().await;
        registry.queue_url(&client, "orders").await.unwrap();
        assert_eq!(client.lookups.load(Ordering::SeqCst), 2);
    }
}
