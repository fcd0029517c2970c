//! Delivery pipeline: event fan-out, attempt execution, retry scheduling.
//!
//! `trigger` resolves matching subscriptions and starts one independent
//! pipeline per subscription. Each pipeline owns a single ledger record;
//! every error it hits is written to that record and never escapes to the
//! caller or to sibling pipelines.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::WebhookError;
use crate::models::{
    payload_snapshot, DeliveryPage, DeliveryStatus, WebhookDelivery, WebhookSubscription,
};
use crate::retry::{next_action, DeliveryState, NextAction};
use crate::store::{CreateDelivery, DeliveryFilter, DeliveryUpdate, WebhookStore};

/// Event name used by synchronous test deliveries.
const TEST_EVENT: &str = "webhook.test";

/// Webhook delivery engine.
#[derive(Clone)]
pub struct DeliveryService {
    store: Arc<dyn WebhookStore>,
    dispatcher: Arc<Dispatcher>,
    /// Bounds concurrent in-flight HTTP calls across all pipelines.
    limiter: Arc<Semaphore>,
}

impl DeliveryService {
    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(store: Arc<dyn WebhookStore>, config: &WebhookConfig) -> Result<Self, WebhookError> {
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), config)?);
        Ok(Self {
            store,
            dispatcher,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_deliveries)),
        })
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Fan an event out to every matching active subscription.
    ///
    /// Creates one pending ledger entry per match (with an immutable
    /// payload snapshot), spawns one pipeline per entry, and returns the
    /// created delivery ids without waiting for attempts to finish. With
    /// no matching subscriptions this is a complete no-op: no ledger
    /// entries are created.
    pub async fn trigger(&self, tenant_id: Uuid, event: &str, data: &Value) -> Vec<Uuid> {
        let subscriptions = match self
            .store
            .get_active_subscriptions_for_event(tenant_id, event)
            .await
        {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    tenant_id = %tenant_id,
                    event = %event,
                    error = %e,
                    "Failed to resolve subscriptions for event"
                );
                return Vec::new();
            }
        };

        if subscriptions.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                tenant_id = %tenant_id,
                event = %event,
                "No active subscriptions match event"
            );
            return Vec::new();
        }

        tracing::info!(
            target: "webhook_delivery",
            tenant_id = %tenant_id,
            event = %event,
            subscription_count = subscriptions.len(),
            "Fanning event out to subscriptions"
        );

        let payload = payload_snapshot(event, Utc::now().timestamp(), data);

        let mut delivery_ids = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let delivery = match self
                .store
                .create_delivery(CreateDelivery {
                    tenant_id,
                    subscription_id: subscription.id,
                    event: event.to_string(),
                    payload: payload.clone(),
                })
                .await
            {
                Ok(d) => d,
                Err(e) => {
                    // Contained to this subscription; siblings still fire.
                    tracing::error!(
                        target: "webhook_delivery",
                        tenant_id = %tenant_id,
                        subscription_id = %subscription.id,
                        event = %event,
                        error = %e,
                        "Failed to create delivery record"
                    );
                    continue;
                }
            };

            delivery_ids.push(delivery.id);

            let service = self.clone();
            tokio::spawn(async move {
                service.execute_delivery(delivery, subscription).await;
            });
        }

        delivery_ids
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    /// Run one attempt for a delivery record and persist the outcome.
    pub async fn execute_delivery(
        &self,
        delivery: WebhookDelivery,
        subscription: WebhookSubscription,
    ) {
        let _permit = match self.limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // engine shutting down
        };

        let outcome = self.dispatcher.attempt(&subscription, &delivery.payload).await;

        if outcome.success {
            self.record_success(&delivery, &outcome).await;
        } else {
            self.record_failure(&delivery, &subscription, &outcome).await;
        }
    }

    /// Run a claimed due retry: re-check the subscription before touching
    /// the network. Deactivated or deleted subscriptions abandon the
    /// record instead of dispatching.
    pub async fn process_claimed(&self, delivery: WebhookDelivery) {
        let subscription = match self
            .store
            .get_subscription(delivery.tenant_id, delivery.subscription_id)
            .await
        {
            Ok(Some(sub)) => sub,
            Ok(None) => {
                self.abandon(&delivery, "subscription deleted before retry fired")
                    .await;
                return;
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to load subscription for due retry"
                );
                return;
            }
        };

        match next_action(
            &DeliveryState::Pending,
            &subscription.retry_policy,
            subscription.active,
        ) {
            NextAction::Dispatch => self.execute_delivery(delivery, subscription).await,
            _ => {
                self.abandon(&delivery, "subscription deactivated before retry fired")
                    .await;
            }
        }
    }

    async fn record_success(&self, delivery: &WebhookDelivery, outcome: &DispatchOutcome) {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            tenant_id = %delivery.tenant_id,
            event = %delivery.event,
            status_code = outcome.status_code.unwrap_or_default(),
            latency_ms = outcome.latency_ms,
            retry_count = delivery.retry_count,
            "Webhook delivered"
        );

        self.persist(
            delivery,
            DeliveryUpdate {
                status: DeliveryStatus::Success,
                status_code: outcome.status_code,
                latency_ms: Some(outcome.latency_ms),
                error: None,
                retry_count: delivery.retry_count,
                next_attempt_at: None,
                last_retry_at: delivery.last_retry_at,
                delivered_at: Some(Utc::now()),
            },
        )
        .await;
    }

    async fn record_failure(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        outcome: &DispatchOutcome,
    ) {
        let state = DeliveryState::FailedRetryable {
            retry_count: delivery.retry_count,
        };
        let action = next_action(&state, &subscription.retry_policy, subscription.active);

        let (retry_count, next_attempt_at, last_retry_at) = match action {
            NextAction::ScheduleRetry(delay) => {
                let fire_at = Utc::now()
                    + ChronoDuration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);
                (delivery.retry_count + 1, Some(fire_at), Some(Utc::now()))
            }
            _ => (delivery.retry_count, None, delivery.last_retry_at),
        };

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            event = %delivery.event,
            error = outcome.error.as_deref().unwrap_or("unknown"),
            retry_count,
            retry_scheduled = next_attempt_at.is_some(),
            "Webhook delivery failed"
        );

        self.persist(
            delivery,
            DeliveryUpdate {
                status: DeliveryStatus::Failed,
                status_code: outcome.status_code,
                latency_ms: Some(outcome.latency_ms),
                error: outcome.error.clone(),
                retry_count,
                next_attempt_at,
                last_retry_at,
                delivered_at: None,
            },
        )
        .await;
    }

    /// Mark a record terminally failed without a dispatch attempt.
    async fn abandon(&self, delivery: &WebhookDelivery, reason: &str) {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            reason = %reason,
            "Abandoning delivery"
        );

        self.persist(
            delivery,
            DeliveryUpdate {
                status: DeliveryStatus::Failed,
                status_code: delivery.status_code,
                latency_ms: delivery.latency_ms,
                error: Some(reason.to_string()),
                retry_count: delivery.retry_count,
                next_attempt_at: None,
                last_retry_at: delivery.last_retry_at,
                delivered_at: None,
            },
        )
        .await;
    }

    async fn persist(&self, delivery: &WebhookDelivery, update: DeliveryUpdate) {
        if let Err(e) = self
            .store
            .update_delivery(delivery.tenant_id, delivery.id, update)
            .await
        {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to persist delivery outcome"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Management surface
    // -----------------------------------------------------------------------

    /// Manually re-attempt a delivery.
    ///
    /// Rejected if the record already succeeded. Otherwise the retry count
    /// is incremented exactly as a scheduled retry would and the record
    /// runs the ordinary pipeline (including the subscription re-check).
    /// Returns the record as it stands after the attempt resolves.
    pub async fn retry_delivery(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<WebhookDelivery, WebhookError> {
        let delivery = self
            .store
            .get_delivery(tenant_id, delivery_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound)?;

        if delivery.status == DeliveryStatus::Success {
            return Err(WebhookError::DeliveryAlreadySucceeded);
        }

        let retry_count = delivery.retry_count + 1;
        let last_retry_at = Some(Utc::now());

        self.store
            .update_delivery(
                tenant_id,
                delivery_id,
                DeliveryUpdate {
                    status: DeliveryStatus::Failed,
                    status_code: delivery.status_code,
                    latency_ms: delivery.latency_ms,
                    error: delivery.error.clone(),
                    retry_count,
                    next_attempt_at: None,
                    last_retry_at,
                    delivered_at: None,
                },
            )
            .await?;

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery_id,
            tenant_id = %tenant_id,
            retry_count,
            "Manual retry requested"
        );

        let attempt_record = WebhookDelivery {
            retry_count,
            last_retry_at,
            ..delivery
        };
        self.process_claimed(attempt_record).await;

        self.store
            .get_delivery(tenant_id, delivery_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound)
    }

    /// Run one synchronous attempt against a subscription endpoint with a
    /// test payload. No ledger entry is created and nothing is scheduled.
    pub async fn send_test(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<DispatchOutcome, WebhookError> {
        let subscription = self
            .store
            .get_subscription(tenant_id, subscription_id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)?;

        let payload = payload_snapshot(
            TEST_EVENT,
            Utc::now().timestamp(),
            &serde_json::json!({ "test": true }),
        );

        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WebhookError::Internal("delivery limiter closed".to_string()))?;

        Ok(self.dispatcher.attempt(&subscription, &payload).await)
    }

    /// Fetch a single delivery record.
    pub async fn get_delivery(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<WebhookDelivery, WebhookError> {
        self.store
            .get_delivery(tenant_id, delivery_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound)
    }

    /// Paginated delivery history with optional subscription/status filters.
    pub async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        filter: DeliveryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<DeliveryPage, WebhookError> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);

        let (items, total) = self
            .store
            .list_deliveries(tenant_id, filter, limit, offset)
            .await?;

        Ok(DeliveryPage {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Claim and return deliveries whose retry time has arrived.
    pub(crate) async fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        self.store.claim_due_deliveries(now, batch).await
    }
}
