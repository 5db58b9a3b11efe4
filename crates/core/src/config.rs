use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Messaging config ──────────────────────────────────────────

/// Configuration for the messaging layer, read from `MQ_*` environment
/// variables (call `load_dotenv()` first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Adapter selector (e.g. "sqs_sns"). Required by the adapter factory.
    pub adapter: String,
    /// Prefix applied to every queue and topic name (empty = none).
    pub namespace: String,
    /// Default QUERY timeout in seconds.
    pub default_query_timeout_secs: u64,
    /// Name prefix for the per-process ephemeral reply queue.
    pub reply_queue_prefix: String,
    pub worker_pool: WorkerPoolConfig,
    pub aws: AwsConfig,
}

impl MessagingConfig {
    pub fn from_env() -> Self {
        Self {
            adapter: env_or("MQ_ADAPTER", ""),
            namespace: env_or("MQ_NAMESPACE", ""),
            default_query_timeout_secs: env_u64("MQ_DEFAULT_QUERY_TIMEOUT", 15),
            reply_queue_prefix: env_or("MQ_REPLY_QUEUE_PREFIX", "reply-"),
            worker_pool: WorkerPoolConfig::from_env(),
            aws: AwsConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Messaging config loaded:");
        tracing::info!("  adapter:    {}", self.adapter);
        tracing::info!(
            "  namespace:  {}",
            if self.namespace.is_empty() {
                "(none)"
            } else {
                self.namespace.as_str()
            }
        );
        tracing::info!("  query timeout: {}s", self.default_query_timeout_secs);
        tracing::info!(
            "  worker pool: min={}, max={}, backlog={}",
            self.worker_pool.min_threads,
            self.worker_pool.max_threads,
            self.worker_pool.max_backlog
        );
        tracing::info!(
            "  aws: region={}, sqs_endpoint={}, sns_endpoint={}, kms={}",
            self.aws.region,
            self.aws.sqs_endpoint.as_deref().unwrap_or("(default)"),
            self.aws.sns_endpoint.as_deref().unwrap_or("(default)"),
            if self.aws.kms_master_key_id.is_some() { "on" } else { "off" }
        );
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            adapter: String::new(),
            namespace: String::new(),
            default_query_timeout_secs: 15,
            reply_queue_prefix: "reply-".to_string(),
            worker_pool: WorkerPoolConfig::default(),
            aws: AwsConfig::default(),
        }
    }
}

// ── Worker pool ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    pub max_backlog: usize,
}

impl WorkerPoolConfig {
    fn from_env() -> Self {
        Self {
            min_threads: env_usize("MQ_WORKER_POOL_MIN_THREADS", 1),
            max_threads: env_usize("MQ_WORKER_POOL_MAX_THREADS", 16),
            max_backlog: env_usize("MQ_WORKER_POOL_MAX_BACKLOG", 16),
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_threads: 1,
            max_threads: 16,
            max_backlog: 16,
        }
    }
}

// ── AWS / SQS / SNS ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Override URL for SQS (local stacks, VPC endpoints).
    pub sqs_endpoint: Option<String>,
    /// Override URL for SNS.
    pub sns_endpoint: Option<String>,
    /// When set, created queues and topics get server-side encryption.
    pub kms_master_key_id: Option<String>,
    /// Long-poll wait per receive call, in seconds (SQS caps this at 20).
    pub sqs_read_timeout_secs: u32,
    /// Queue name → owning account id, for cross-account URL resolution.
    pub cross_account_mapping: HashMap<String, String>,
}

impl AwsConfig {
    fn from_env() -> Self {
        Self {
            region: env_opt("MQ_AWS_REGION")
                .or_else(|| env_opt("AWS_REGION"))
                .unwrap_or_else(|| "us-east-1".to_string()),
            access_key_id: env_opt("MQ_AWS_ACCESS_KEY_ID")
                .or_else(|| env_opt("AWS_ACCESS_KEY_ID")),
            secret_access_key: env_opt("MQ_AWS_SECRET_ACCESS_KEY")
                .or_else(|| env_opt("AWS_SECRET_ACCESS_KEY")),
            sqs_endpoint: env_opt("MQ_AWS_SQS_ENDPOINT"),
            sns_endpoint: env_opt("MQ_AWS_SNS_ENDPOINT"),
            kms_master_key_id: env_opt("MQ_AWS_SQS_SNS_KMS_MASTER_KEY_ID"),
            sqs_read_timeout_secs: env_u32("MQ_AWS_SQS_READ_TIMEOUT", 20),
            cross_account_mapping: parse_cross_account_mapping(&env_or(
                "MQ_AWS_SQS_CROSS_ACCOUNT_MAPPING",
                "",
            )),
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            sqs_endpoint: None,
            sns_endpoint: None,
            kms_master_key_id: None,
            sqs_read_timeout_secs: 20,
            cross_account_mapping: HashMap::new(),
        }
    }
}

/// Parse the `"queue1:account1,queue2:account2"` cross-account mapping format.
///
/// Malformed entries (missing `:`, empty name or account) are skipped with a
/// warning rather than failing the whole config.
pub fn parse_cross_account_mapping(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once(':') {
            Some((name, account)) if !name.is_empty() && !account.is_empty() => {
                map.insert(name.trim().to_string(), account.trim().to_string());
            }
            _ => {
                tracing::warn!(entry = %entry, "skipping malformed cross-account mapping entry");
            }
        }
    }
    map
}
