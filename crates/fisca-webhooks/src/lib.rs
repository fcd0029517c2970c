//! Outbound webhook delivery engine for the fisca platform.
//!
//! Fans business events out to tenant-registered HTTP endpoints with
//! HMAC-SHA256 signed canonical payloads, records every attempt in a
//! durable delivery ledger, and retries failures with bounded exponential
//! backoff driven by a restart-safe worker.

pub mod canonical;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod retry;
pub mod services;
pub mod store;
pub mod validation;
pub mod worker;

pub use config::{WebhookConfig, WorkerSettings};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{WebhookError, WebhookResult};
pub use models::{
    DeliveryStatus, RetryPolicy, WebhookDelivery, WebhookEventType, WebhookSubscription,
};
pub use services::delivery_service::DeliveryService;
pub use services::event_publisher::{spawn_event_consumer, BusinessEvent, EventPublisher};
pub use services::subscription_service::SubscriptionService;
pub use store::{MemoryWebhookStore, PgWebhookStore, WebhookStore};
pub use worker::RetryWorker;
