//! Shared fixtures for fisca-webhooks integration tests.
//!
//! Provides wiremock responders, an engine harness wired to the in-memory
//! store, and signature helpers for verifying delivered requests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

use fisca_webhooks::{
    crypto, DeliveryService, MemoryWebhookStore, RetryPolicy, RetryWorker, SubscriptionService,
    WebhookConfig, WebhookDelivery, WebhookStore, WebhookSubscription, WorkerSettings,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const ENCRYPTION_KEY: [u8; 32] = [0x42u8; 32];

pub const TENANT_A: Uuid = Uuid::from_bytes([
    0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

pub const TENANT_B: Uuid = Uuid::from_bytes([
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
]);

pub const SECRET_1: &str = "whsec_test_secret_key_12345";

/// Engine wired to a fresh in-memory store.
pub struct TestHarness {
    pub store: Arc<MemoryWebhookStore>,
    pub delivery: DeliveryService,
    pub subscriptions: SubscriptionService,
}

/// Default test configuration: short timeout, plain HTTP allowed so the
/// dispatcher can reach wiremock.
pub fn test_config() -> WebhookConfig {
    WebhookConfig::builder(ENCRYPTION_KEY.to_vec())
        .allow_http(true)
        .request_timeout(Duration::from_secs(5))
        .build()
        .expect("test config is valid")
}

pub fn harness() -> TestHarness {
    harness_with(test_config())
}

pub fn harness_with(config: WebhookConfig) -> TestHarness {
    let store = Arc::new(MemoryWebhookStore::new());
    let delivery =
        DeliveryService::new(store.clone(), &config).expect("delivery service builds");
    let subscriptions = SubscriptionService::new(store.clone(), &config);
    TestHarness {
        store,
        delivery,
        subscriptions,
    }
}

/// Build a valid subscription aimed at `url`, bypassing service
/// validation (tests drive the pipeline directly).
pub fn subscription(tenant_id: Uuid, url: &str, events: &[&str]) -> WebhookSubscription {
    let now = Utc::now();
    WebhookSubscription {
        id: Uuid::new_v4(),
        tenant_id,
        name: "test-endpoint".to_string(),
        url: url.to_string(),
        secret_encrypted: crypto::encrypt_secret(SECRET_1, &ENCRYPTION_KEY)
            .expect("test secret encrypts"),
        events: events.iter().map(|e| (*e).to_string()).collect(),
        active: true,
        headers: HashMap::new(),
        retry_policy: RetryPolicy::default(),
        last_triggered_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Retry policy with short delays so worker-driven tests finish quickly.
pub fn fast_policy(max_retries: i32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay_ms: 50,
        backoff_multiplier: 1.0,
    }
}

/// Start a retry worker with a tight poll interval. Call
/// `worker.shutdown()` at the end of the test.
pub fn start_worker(service: &DeliveryService) -> (Arc<RetryWorker>, JoinHandle<()>) {
    let worker = Arc::new(RetryWorker::new(
        service.clone(),
        WorkerSettings {
            poll_interval_ms: 25,
            batch_size: 20,
            concurrency: 4,
        },
    ));
    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };
    (worker, handle)
}

// ---------------------------------------------------------------------------
// Polling helpers
// ---------------------------------------------------------------------------

/// Poll the store until a delivery matches the predicate, panicking after
/// `timeout_ms`.
pub async fn wait_for_delivery<F>(
    store: &MemoryWebhookStore,
    tenant_id: Uuid,
    delivery_id: Uuid,
    timeout_ms: u64,
    predicate: F,
) -> WebhookDelivery
where
    F: Fn(&WebhookDelivery) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Some(delivery) = store
            .get_delivery(tenant_id, delivery_id)
            .await
            .expect("store read")
        {
            if predicate(&delivery) {
                return delivery;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for delivery {delivery_id}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll a condition until it holds, panicking after `timeout_ms`.
pub async fn wait_until<F>(timeout_ms: u64, what: &str, predicate: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Total number of ledger entries for a tenant.
pub async fn delivery_count(store: &MemoryWebhookStore, tenant_id: Uuid) -> i64 {
    let (_, total) = store
        .list_deliveries(tenant_id, Default::default(), 100, 0)
        .await
        .expect("store read");
    total
}

// ---------------------------------------------------------------------------
// Responders
// ---------------------------------------------------------------------------

/// A captured HTTP request.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("captured body is JSON")
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }
}

/// Responder that records incoming requests and answers with a fixed
/// status.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code)
    }
}

/// Responder that only counts requests.
#[derive(Clone)]
pub struct CountingResponder {
    count: Arc<AtomicU32>,
    response_code: u16,
}

impl CountingResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            response_code: status,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code)
    }
}

/// Responder that fails `n` times with 500, then answers 200.
#[derive(Clone)]
pub struct FailingResponder {
    attempts: Arc<AtomicU32>,
    failures_before_success: u32,
}

impl FailingResponder {
    pub fn fail_times(n: u32) -> Self {
        Self {
            attempts: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

/// Responder that delays before answering.
#[derive(Clone)]
pub struct DelayedResponder {
    delay_ms: u64,
    response_code: u16,
}

impl DelayedResponder {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            response_code: 200,
        }
    }
}

impl Respond for DelayedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(self.response_code)
            .set_delay(Duration::from_millis(self.delay_ms))
    }
}

// ---------------------------------------------------------------------------
// Signature verification
// ---------------------------------------------------------------------------

/// Independently computed HMAC-SHA256 over `{timestamp}.{body}`, hex.
pub fn compute_reference_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the signature headers of a captured delivery.
pub fn verify_captured_signature(request: &CapturedRequest, secret: &str) -> bool {
    let Some(signature) = request.header("x-webhook-signature") else {
        return false;
    };
    let Some(timestamp) = request.header("x-webhook-timestamp") else {
        return false;
    };
    signature
        == format!(
            "sha256={}",
            compute_reference_signature(secret, timestamp, &request.body)
        )
}
