//! Engine configuration.

use std::env;
use std::time::Duration;

use crate::error::WebhookError;

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default bound on concurrent in-flight HTTP deliveries.
const DEFAULT_MAX_CONCURRENT: usize = 16;

/// Default active-subscription cap per tenant.
const DEFAULT_MAX_SUBSCRIPTIONS: i64 = 25;

/// Retry worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// How often the worker scans for due retries.
    pub poll_interval_ms: u64,
    /// Maximum due retries claimed per scan.
    pub batch_size: i64,
    /// Concurrent retry pipelines per worker.
    pub concurrency: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 20,
            concurrency: 8,
        }
    }
}

/// Configuration for the webhook engine.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// 32-byte AES-256-GCM key for secrets at rest.
    pub encryption_key: Vec<u8>,
    /// Upper bound on one delivery attempt.
    pub request_timeout: Duration,
    /// User-Agent sent on every delivery.
    pub user_agent: String,
    /// Bound on concurrent in-flight HTTP calls across all pipelines.
    pub max_concurrent_deliveries: usize,
    /// Accept plain-HTTP subscription URLs (dev/test only).
    pub allow_http: bool,
    /// Active-subscription cap per tenant.
    pub max_subscriptions: i64,
    pub worker: WorkerSettings,
}

impl WebhookConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FISCA_WEBHOOK_ENCRYPTION_KEY`: 64 hex chars (32 bytes)
    ///
    /// Optional:
    /// - `FISCA_WEBHOOK_TIMEOUT_SECS` (default 30)
    /// - `FISCA_WEBHOOK_MAX_CONCURRENT` (default 16)
    /// - `FISCA_WEBHOOK_ALLOW_HTTP` (default false)
    /// - `FISCA_WEBHOOK_MAX_SUBSCRIPTIONS` (default 25)
    /// - `FISCA_WEBHOOK_POLL_INTERVAL_MS` (default 1000)
    /// - `FISCA_WEBHOOK_BATCH_SIZE` (default 20)
    /// - `FISCA_WEBHOOK_WORKER_CONCURRENCY` (default 8)
    pub fn from_env() -> Result<Self, WebhookError> {
        let key_hex =
            env::var("FISCA_WEBHOOK_ENCRYPTION_KEY").map_err(|_| WebhookError::ConfigMissing {
                var: "FISCA_WEBHOOK_ENCRYPTION_KEY".to_string(),
            })?;
        let encryption_key = decode_key(&key_hex)?;

        let request_timeout = Duration::from_secs(parse_var(
            "FISCA_WEBHOOK_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
        )?);
        let max_concurrent_deliveries =
            parse_var("FISCA_WEBHOOK_MAX_CONCURRENT", DEFAULT_MAX_CONCURRENT)?;
        let allow_http = matches!(
            env::var("FISCA_WEBHOOK_ALLOW_HTTP").as_deref(),
            Ok("1") | Ok("true")
        );
        let max_subscriptions = parse_var(
            "FISCA_WEBHOOK_MAX_SUBSCRIPTIONS",
            DEFAULT_MAX_SUBSCRIPTIONS,
        )?;

        let worker = WorkerSettings {
            poll_interval_ms: parse_var("FISCA_WEBHOOK_POLL_INTERVAL_MS", 1000)?,
            batch_size: parse_var("FISCA_WEBHOOK_BATCH_SIZE", 20)?,
            concurrency: parse_var("FISCA_WEBHOOK_WORKER_CONCURRENCY", 8)?,
        };

        Ok(Self {
            encryption_key,
            request_timeout,
            user_agent: default_user_agent(),
            max_concurrent_deliveries,
            allow_http,
            max_subscriptions,
            worker,
        })
    }

    /// Build a configuration programmatically (tests, embedded use).
    #[must_use]
    pub fn builder(encryption_key: Vec<u8>) -> WebhookConfigBuilder {
        WebhookConfigBuilder {
            encryption_key,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: default_user_agent(),
            max_concurrent_deliveries: DEFAULT_MAX_CONCURRENT,
            allow_http: false,
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
            worker: WorkerSettings::default(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("fisca-webhooks/", env!("CARGO_PKG_VERSION")).to_string()
}

fn decode_key(hex_str: &str) -> Result<Vec<u8>, WebhookError> {
    let key = hex::decode(hex_str.trim()).map_err(|e| WebhookError::ConfigInvalid {
        var: "FISCA_WEBHOOK_ENCRYPTION_KEY".to_string(),
        reason: format!("not valid hex: {e}"),
    })?;
    if key.len() != 32 {
        return Err(WebhookError::ConfigInvalid {
            var: "FISCA_WEBHOOK_ENCRYPTION_KEY".to_string(),
            reason: format!("expected 32 bytes, got {}", key.len()),
        });
    }
    Ok(key)
}

fn parse_var<T: std::str::FromStr>(var: &str, default: T) -> Result<T, WebhookError> {
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| WebhookError::ConfigInvalid {
            var: var.to_string(),
            reason: format!("cannot parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

/// Builder for `WebhookConfig`.
#[derive(Debug)]
pub struct WebhookConfigBuilder {
    encryption_key: Vec<u8>,
    request_timeout: Duration,
    user_agent: String,
    max_concurrent_deliveries: usize,
    allow_http: bool,
    max_subscriptions: i64,
    worker: WorkerSettings,
}

impl WebhookConfigBuilder {
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    #[must_use]
    pub fn max_concurrent_deliveries(mut self, max: usize) -> Self {
        self.max_concurrent_deliveries = max;
        self
    }

    #[must_use]
    pub fn allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    #[must_use]
    pub fn max_subscriptions(mut self, max: i64) -> Self {
        self.max_subscriptions = max;
        self
    }

    #[must_use]
    pub fn worker(mut self, worker: WorkerSettings) -> Self {
        self.worker = worker;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<WebhookConfig, WebhookError> {
        if self.encryption_key.len() != 32 {
            return Err(WebhookError::ConfigInvalid {
                var: "encryption_key".to_string(),
                reason: format!("expected 32 bytes, got {}", self.encryption_key.len()),
            });
        }
        if self.max_concurrent_deliveries == 0 {
            return Err(WebhookError::ConfigInvalid {
                var: "max_concurrent_deliveries".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(WebhookConfig {
            encryption_key: self.encryption_key,
            request_timeout: self.request_timeout,
            user_agent: self.user_agent,
            max_concurrent_deliveries: self.max_concurrent_deliveries,
            allow_http: self.allow_http,
            max_subscriptions: self.max_subscriptions,
            worker: self.worker,
        })
    }
}
