//! Storage interface consumed by the engine.
//!
//! The engine never talks to a database directly; everything durable goes
//! through [`WebhookStore`]. `PgWebhookStore` backs it with Postgres via
//! `fisca-db`; `MemoryWebhookStore` keeps everything in process for tests
//! and embedded use.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{DeliveryStatus, RetryPolicy, WebhookDelivery, WebhookSubscription};

pub mod memory;
pub mod postgres;

pub use memory::MemoryWebhookStore;
pub use postgres::PgWebhookStore;

/// Input for subscription creation.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub tenant_id: Uuid,
    pub name: String,
    pub url: String,
    pub secret_encrypted: String,
    pub events: Vec<String>,
    pub headers: HashMap<String, String>,
    pub retry_policy: RetryPolicy,
}

/// Partial subscription update; `None` fields are left unchanged. The
/// secret is intentionally not here — see
/// [`WebhookStore::update_subscription_secret`].
#[derive(Debug, Clone, Default)]
pub struct UpdateSubscription {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub active: Option<bool>,
    pub headers: Option<HashMap<String, String>>,
    pub retry_policy: Option<RetryPolicy>,
}

/// Input for ledger entry creation; status starts as `pending`.
#[derive(Debug, Clone)]
pub struct CreateDelivery {
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event: String,
    pub payload: Value,
}

/// Full set of mutable delivery fields, written once per attempt.
#[derive(Debug, Clone)]
pub struct DeliveryUpdate {
    pub status: DeliveryStatus,
    pub status_code: Option<i16>,
    pub latency_ms: Option<i32>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Delivery history filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryFilter {
    pub subscription_id: Option<Uuid>,
    pub status: Option<DeliveryStatus>,
}

/// Durable state consumed and mutated by the webhook engine.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    // --- subscription registry ---

    /// Active subscriptions of a tenant whose event set contains `event`.
    async fn get_active_subscriptions_for_event(
        &self,
        tenant_id: Uuid,
        event: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError>;

    async fn get_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError>;

    async fn create_subscription(
        &self,
        input: CreateSubscription,
    ) -> Result<WebhookSubscription, WebhookError>;

    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        update: UpdateSubscription,
    ) -> Result<Option<WebhookSubscription>, WebhookError>;

    /// Replace the stored secret ciphertext (rotation). Returns false if
    /// the subscription does not exist.
    async fn update_subscription_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: String,
    ) -> Result<bool, WebhookError>;

    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, WebhookError>;

    async fn list_subscriptions(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
        active: Option<bool>,
    ) -> Result<(Vec<WebhookSubscription>, i64), WebhookError>;

    async fn count_subscriptions(&self, tenant_id: Uuid) -> Result<i64, WebhookError>;

    /// Last-writer-wins timestamp set; safe under concurrent callers.
    async fn touch_subscription_last_triggered(
        &self,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<(), WebhookError>;

    // --- delivery ledger ---

    async fn create_delivery(
        &self,
        input: CreateDelivery,
    ) -> Result<WebhookDelivery, WebhookError>;

    async fn get_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError>;

    /// Write the outcome of one attempt.
    async fn update_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        update: DeliveryUpdate,
    ) -> Result<(), WebhookError>;

    async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        filter: DeliveryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<WebhookDelivery>, i64), WebhookError>;

    /// Atomically claim failed deliveries whose retry time has arrived,
    /// clearing `next_attempt_at` so no other worker fires them.
    async fn claim_due_deliveries(
        &self,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError>;
}
