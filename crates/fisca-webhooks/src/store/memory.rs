//! In-memory store for tests and embedded use.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{DeliveryStatus, WebhookDelivery, WebhookSubscription};
use crate::store::{
    CreateDelivery, CreateSubscription, DeliveryFilter, DeliveryUpdate, UpdateSubscription,
    WebhookStore,
};

/// `WebhookStore` backed by in-process maps.
#[derive(Default)]
pub struct MemoryWebhookStore {
    subscriptions: RwLock<HashMap<Uuid, WebhookSubscription>>,
    deliveries: RwLock<HashMap<Uuid, WebhookDelivery>>,
}

impl MemoryWebhookStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed subscription, bypassing service validation.
    /// Test seams only.
    pub async fn insert_subscription(&self, subscription: WebhookSubscription) {
        self.subscriptions
            .write()
            .await
            .insert(subscription.id, subscription);
    }
}

#[async_trait]
impl WebhookStore for MemoryWebhookStore {
    async fn get_active_subscriptions_for_event(
        &self,
        tenant_id: Uuid,
        event: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        let subs = self.subscriptions.read().await;
        let mut matching: Vec<WebhookSubscription> = subs
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.active && s.events.iter().any(|e| e == event))
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.created_at);
        Ok(matching)
    }

    async fn get_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let subs = self.subscriptions.read().await;
        Ok(subs
            .get(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn create_subscription(
        &self,
        input: CreateSubscription,
    ) -> Result<WebhookSubscription, WebhookError> {
        let now = Utc::now();
        let subscription = WebhookSubscription {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            name: input.name,
            url: input.url,
            secret_encrypted: input.secret_encrypted,
            events: input.events,
            active: true,
            headers: input.headers,
            retry_policy: input.retry_policy,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };
        self.subscriptions
            .write()
            .await
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        update: UpdateSubscription,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let mut subs = self.subscriptions.write().await;
        let Some(sub) = subs.get_mut(&id).filter(|s| s.tenant_id == tenant_id) else {
            return Ok(None);
        };

        if let Some(name) = update.name {
            sub.name = name;
        }
        if let Some(url) = update.url {
            sub.url = url;
        }
        if let Some(events) = update.events {
            sub.events = events;
        }
        if let Some(active) = update.active {
            sub.active = active;
        }
        if let Some(headers) = update.headers {
            sub.headers = headers;
        }
        if let Some(policy) = update.retry_policy {
            sub.retry_policy = policy;
        }
        sub.updated_at = Utc::now();

        Ok(Some(sub.clone()))
    }

    async fn update_subscription_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: String,
    ) -> Result<bool, WebhookError> {
        let mut subs = self.subscriptions.write().await;
        match subs.get_mut(&id).filter(|s| s.tenant_id == tenant_id) {
            Some(sub) => {
                sub.secret_encrypted = secret_encrypted;
                sub.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, WebhookError> {
        let mut subs = self.subscriptions.write().await;
        match subs.get(&id) {
            Some(sub) if sub.tenant_id == tenant_id => {
                subs.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_subscriptions(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
        active: Option<bool>,
    ) -> Result<(Vec<WebhookSubscription>, i64), WebhookError> {
        let subs = self.subscriptions.read().await;
        let mut matching: Vec<WebhookSubscription> = subs
            .values()
            .filter(|s| s.tenant_id == tenant_id && active.map_or(true, |a| s.active == a))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn count_subscriptions(&self, tenant_id: Uuid) -> Result<i64, WebhookError> {
        let subs = self.subscriptions.read().await;
        Ok(subs.values().filter(|s| s.tenant_id == tenant_id).count() as i64)
    }

    async fn touch_subscription_last_triggered(
        &self,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let mut subs = self.subscriptions.write().await;
        if let Some(sub) = subs.get_mut(&id) {
            sub.last_triggered_at = Some(timestamp);
        }
        Ok(())
    }

    async fn create_delivery(
        &self,
        input: CreateDelivery,
    ) -> Result<WebhookDelivery, WebhookError> {
        let delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            subscription_id: input.subscription_id,
            event: input.event,
            payload: input.payload,
            status: DeliveryStatus::Pending,
            status_code: None,
            latency_ms: None,
            error: None,
            retry_count: 0,
            next_attempt_at: None,
            last_retry_at: None,
            delivered_at: None,
            created_at: Utc::now(),
        };
        self.deliveries
            .write()
            .await
            .insert(delivery.id, delivery.clone());
        Ok(delivery)
    }

    async fn get_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries
            .get(&id)
            .filter(|d| d.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        update: DeliveryUpdate,
    ) -> Result<(), WebhookError> {
        let mut deliveries = self.deliveries.write().await;
        if let Some(delivery) = deliveries.get_mut(&id).filter(|d| d.tenant_id == tenant_id) {
            delivery.status = update.status;
            delivery.status_code = update.status_code;
            delivery.latency_ms = update.latency_ms;
            delivery.error = update.error;
            delivery.retry_count = update.retry_count;
            delivery.next_attempt_at = update.next_attempt_at;
            delivery.last_retry_at = update.last_retry_at;
            delivery.delivered_at = update.delivered_at;
        }
        Ok(())
    }

    async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        filter: DeliveryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<WebhookDelivery>, i64), WebhookError> {
        let deliveries = self.deliveries.read().await;
        let mut matching: Vec<WebhookDelivery> = deliveries
            .values()
            .filter(|d| {
                d.tenant_id == tenant_id
                    && filter
                        .subscription_id
                        .map_or(true, |id| d.subscription_id == id)
                    && filter.status.map_or(true, |s| d.status == s)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn claim_due_deliveries(
        &self,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let mut deliveries = self.deliveries.write().await;

        let mut due: Vec<(Uuid, DateTime<Utc>)> = deliveries
            .values()
            .filter_map(|d| match d.next_attempt_at {
                Some(at) if d.status == DeliveryStatus::Failed && at <= now => Some((d.id, at)),
                _ => None,
            })
            .collect();
        due.sort_by_key(|(_, at)| *at);
        due.truncate(batch.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for (id, _) in due {
            if let Some(delivery) = deliveries.get_mut(&id) {
                delivery.next_attempt_at = None;
                claimed.push(delivery.clone());
            }
        }
        Ok(claimed)
    }
}
