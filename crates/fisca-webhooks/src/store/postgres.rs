//! Postgres-backed store, delegating to the `fisca-db` models.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use fisca_db::models::{
    CreateWebhookDeliveryRow, CreateWebhookSubscriptionRow, UpdateWebhookSubscriptionRow,
    WebhookDeliveryRow, WebhookDeliveryRowUpdate, WebhookSubscriptionRow,
};
use fisca_db::{DbError, DbPool};

use crate::error::WebhookError;
use crate::models::{DeliveryStatus, RetryPolicy, WebhookDelivery, WebhookSubscription};
use crate::store::{
    CreateDelivery, CreateSubscription, DeliveryFilter, DeliveryUpdate, UpdateSubscription,
    WebhookStore,
};

/// `WebhookStore` backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgWebhookStore {
    pool: DbPool,
}

impl PgWebhookStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookStore for PgWebhookStore {
    async fn get_active_subscriptions_for_event(
        &self,
        tenant_id: Uuid,
        event: &str,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        let rows =
            WebhookSubscriptionRow::find_active_by_event(self.pool.inner(), tenant_id, event)
                .await
                .map_err(db_err)?;
        rows.into_iter().map(subscription_from_row).collect()
    }

    async fn get_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let row = WebhookSubscriptionRow::find_by_id(self.pool.inner(), tenant_id, id)
            .await
            .map_err(db_err)?;
        row.map(subscription_from_row).transpose()
    }

    async fn create_subscription(
        &self,
        input: CreateSubscription,
    ) -> Result<WebhookSubscription, WebhookError> {
        let row = WebhookSubscriptionRow::create(
            self.pool.inner(),
            CreateWebhookSubscriptionRow {
                tenant_id: input.tenant_id,
                name: input.name,
                url: input.url,
                secret_encrypted: input.secret_encrypted,
                events: input.events,
                headers: headers_to_json(&input.headers),
                max_retries: input.retry_policy.max_retries,
                initial_delay_ms: input.retry_policy.initial_delay_ms,
                backoff_multiplier: input.retry_policy.backoff_multiplier,
            },
        )
        .await
        .map_err(db_err)?;
        subscription_from_row(row)
    }

    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        update: UpdateSubscription,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let row = WebhookSubscriptionRow::update(
            self.pool.inner(),
            tenant_id,
            id,
            UpdateWebhookSubscriptionRow {
                name: update.name,
                url: update.url,
                events: update.events,
                active: update.active,
                headers: update.headers.as_ref().map(|h| headers_to_json(h)),
                max_retries: update.retry_policy.map(|p| p.max_retries),
                initial_delay_ms: update.retry_policy.map(|p| p.initial_delay_ms),
                backoff_multiplier: update.retry_policy.map(|p| p.backoff_multiplier),
            },
        )
        .await
        .map_err(db_err)?;
        row.map(subscription_from_row).transpose()
    }

    async fn update_subscription_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: String,
    ) -> Result<bool, WebhookError> {
        WebhookSubscriptionRow::update_secret(self.pool.inner(), tenant_id, id, &secret_encrypted)
            .await
            .map_err(db_err)
    }

    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, WebhookError> {
        WebhookSubscriptionRow::delete(self.pool.inner(), tenant_id, id)
            .await
            .map_err(db_err)
    }

    async fn list_subscriptions(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
        active: Option<bool>,
    ) -> Result<(Vec<WebhookSubscription>, i64), WebhookError> {
        let rows = WebhookSubscriptionRow::list_by_tenant(
            self.pool.inner(),
            tenant_id,
            limit,
            offset,
            active,
        )
        .await
        .map_err(db_err)?;
        let total = WebhookSubscriptionRow::count_by_tenant(self.pool.inner(), tenant_id, active)
            .await
            .map_err(db_err)?;

        let subs = rows
            .into_iter()
            .map(subscription_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((subs, total))
    }

    async fn count_subscriptions(&self, tenant_id: Uuid) -> Result<i64, WebhookError> {
        WebhookSubscriptionRow::count_by_tenant(self.pool.inner(), tenant_id, None)
            .await
            .map_err(db_err)
    }

    async fn touch_subscription_last_triggered(
        &self,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        WebhookSubscriptionRow::touch_last_triggered(self.pool.inner(), id, timestamp)
            .await
            .map_err(db_err)
    }

    async fn create_delivery(
        &self,
        input: CreateDelivery,
    ) -> Result<WebhookDelivery, WebhookError> {
        let row = WebhookDeliveryRow::create(
            self.pool.inner(),
            CreateWebhookDeliveryRow {
                tenant_id: input.tenant_id,
                subscription_id: input.subscription_id,
                event: input.event,
                payload: input.payload,
            },
        )
        .await
        .map_err(db_err)?;
        delivery_from_row(row)
    }

    async fn get_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        let row = WebhookDeliveryRow::find_by_id(self.pool.inner(), tenant_id, id)
            .await
            .map_err(db_err)?;
        row.map(delivery_from_row).transpose()
    }

    async fn update_delivery(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        update: DeliveryUpdate,
    ) -> Result<(), WebhookError> {
        WebhookDeliveryRow::update(
            self.pool.inner(),
            tenant_id,
            id,
            WebhookDeliveryRowUpdate {
                status: update.status.as_str().to_string(),
                status_code: update.status_code,
                latency_ms: update.latency_ms,
                error: update.error,
                retry_count: update.retry_count,
                next_attempt_at: update.next_attempt_at,
                last_retry_at: update.last_retry_at,
                delivered_at: update.delivered_at,
            },
        )
        .await
        .map_err(db_err)
    }

    async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        filter: DeliveryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<WebhookDelivery>, i64), WebhookError> {
        let status = filter.status.map(|s| s.as_str());
        let rows = WebhookDeliveryRow::list_by_tenant(
            self.pool.inner(),
            tenant_id,
            filter.subscription_id,
            status,
            limit,
            offset,
        )
        .await
        .map_err(db_err)?;
        let total = WebhookDeliveryRow::count_by_tenant(
            self.pool.inner(),
            tenant_id,
            filter.subscription_id,
            status,
        )
        .await
        .map_err(db_err)?;

        let deliveries = rows
            .into_iter()
            .map(delivery_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((deliveries, total))
    }

    async fn claim_due_deliveries(
        &self,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let rows = WebhookDeliveryRow::claim_due(self.pool.inner(), now, batch)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(delivery_from_row).collect()
    }
}

fn db_err(e: sqlx::Error) -> WebhookError {
    WebhookError::Storage(DbError::QueryFailed(e))
}

fn headers_to_json(headers: &HashMap<String, String>) -> serde_json::Value {
    serde_json::Value::Object(
        headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    )
}

fn headers_from_json(value: &serde_json::Value) -> HashMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn subscription_from_row(row: WebhookSubscriptionRow) -> Result<WebhookSubscription, WebhookError> {
    Ok(WebhookSubscription {
        id: row.id,
        tenant_id: row.tenant_id,
        name: row.name,
        url: row.url,
        secret_encrypted: row.secret_encrypted,
        events: row.events,
        active: row.active,
        headers: headers_from_json(&row.headers),
        retry_policy: RetryPolicy {
            max_retries: row.max_retries,
            initial_delay_ms: row.initial_delay_ms,
            backoff_multiplier: row.backoff_multiplier,
        },
        last_triggered_at: row.last_triggered_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn delivery_from_row(row: WebhookDeliveryRow) -> Result<WebhookDelivery, WebhookError> {
    let status = DeliveryStatus::parse(&row.status).ok_or_else(|| {
        WebhookError::Storage(DbError::InvalidColumn {
            column: "status".to_string(),
            reason: format!("unknown delivery status {:?}", row.status),
        })
    })?;

    Ok(WebhookDelivery {
        id: row.id,
        tenant_id: row.tenant_id,
        subscription_id: row.subscription_id,
        event: row.event,
        payload: row.payload,
        status,
        status_code: row.status_code,
        latency_ms: row.latency_ms,
        error: row.error,
        retry_count: row.retry_count,
        next_attempt_at: row.next_attempt_at,
        last_retry_at: row.last_retry_at,
        delivered_at: row.delivered_at,
        created_at: row.created_at,
    })
}
