//! `WebhookSubscriptionRow` model: tenant-registered external endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A webhook subscription row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookSubscriptionRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub url: String,
    /// AES-256-GCM ciphertext, never exposed through read APIs.
    pub secret_encrypted: String,
    pub events: Vec<String>,
    pub active: bool,
    /// Flat string map of extra static headers.
    pub headers: serde_json::Value,
    pub max_retries: i32,
    pub initial_delay_ms: i64,
    pub backoff_multiplier: f64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to insert a new subscription.
#[derive(Debug, Clone)]
pub struct CreateWebhookSubscriptionRow {
    pub tenant_id: Uuid,
    pub name: String,
    pub url: String,
    pub secret_encrypted: String,
    pub events: Vec<String>,
    pub headers: serde_json::Value,
    pub max_retries: i32,
    pub initial_delay_ms: i64,
    pub backoff_multiplier: f64,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateWebhookSubscriptionRow {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub active: Option<bool>,
    pub headers: Option<serde_json::Value>,
    pub max_retries: Option<i32>,
    pub initial_delay_ms: Option<i64>,
    pub backoff_multiplier: Option<f64>,
}

impl WebhookSubscriptionRow {
    /// Insert a new subscription.
    pub async fn create(
        pool: &sqlx::PgPool,
        input: CreateWebhookSubscriptionRow,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r"
            INSERT INTO webhook_subscriptions
                (tenant_id, name, url, secret_encrypted, events, headers,
                 max_retries, initial_delay_ms, backoff_multiplier)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            ",
        )
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.url)
        .bind(&input.secret_encrypted)
        .bind(&input.events)
        .bind(&input.headers)
        .bind(input.max_retries)
        .bind(input.initial_delay_ms)
        .bind(input.backoff_multiplier)
        .fetch_one(pool)
        .await
    }

    /// Find a subscription by id within a tenant.
    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1 AND id = $2
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Find all active subscriptions of a tenant whose event set contains
    /// the given event name.
    pub async fn find_active_by_event(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        event: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1 AND active AND $2 = ANY(events)
            ORDER BY created_at
            ",
        )
        .bind(tenant_id)
        .bind(event)
        .fetch_all(pool)
        .await
    }

    /// List subscriptions for a tenant with pagination and an optional
    /// active filter.
    pub async fn list_by_tenant(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
        active: Option<bool>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1 AND ($2::boolean IS NULL OR active = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(tenant_id)
        .bind(active)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// Count subscriptions for a tenant with an optional active filter.
    pub async fn count_by_tenant(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        active: Option<bool>,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM webhook_subscriptions
            WHERE tenant_id = $1 AND ($2::boolean IS NULL OR active = $2)
            ",
        )
        .bind(tenant_id)
        .bind(active)
        .fetch_one(pool)
        .await?;

        Ok(row.0)
    }

    /// Apply a partial update. Returns the updated row, or `None` if the
    /// subscription does not exist in the tenant.
    pub async fn update(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
        input: UpdateWebhookSubscriptionRow,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r"
            UPDATE webhook_subscriptions SET
                name = COALESCE($3, name),
                url = COALESCE($4, url),
                events = COALESCE($5, events),
                active = COALESCE($6, active),
                headers = COALESCE($7, headers),
                max_retries = COALESCE($8, max_retries),
                initial_delay_ms = COALESCE($9, initial_delay_ms),
                backoff_multiplier = COALESCE($10, backoff_multiplier),
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .bind(&input.name)
        .bind(&input.url)
        .bind(&input.events)
        .bind(input.active)
        .bind(&input.headers)
        .bind(input.max_retries)
        .bind(input.initial_delay_ms)
        .bind(input.backoff_multiplier)
        .fetch_optional(pool)
        .await
    }

    /// Replace the stored secret ciphertext. Returns false if the
    /// subscription does not exist in the tenant.
    pub async fn update_secret(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET secret_encrypted = $3, updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .bind(secret_encrypted)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a subscription. Past delivery rows are intentionally left
    /// untouched.
    pub async fn delete(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            DELETE FROM webhook_subscriptions
            WHERE tenant_id = $1 AND id = $2
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set `last_triggered_at`. A plain SET: concurrent successful
    /// deliveries race harmlessly, last writer wins.
    pub async fn touch_last_triggered(
        pool: &sqlx::PgPool,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET last_triggered_at = $2
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(timestamp)
        .execute(pool)
        .await?;

        Ok(())
    }
}
