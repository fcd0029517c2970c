//! `WebhookDeliveryRow` model: the append-only delivery ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One delivery record: a single subscription/event occurrence and its
/// retry history.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDeliveryRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event: String,
    /// Immutable payload snapshot taken at trigger time.
    pub payload: serde_json::Value,
    /// One of `pending`, `success`, `failed`.
    pub status: String,
    pub status_code: Option<i16>,
    pub latency_ms: Option<i32>,
    pub error: Option<String>,
    pub retry_count: i32,
    /// When set, a retry is scheduled; a failed row without it is terminal.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Data needed to insert a new (pending) delivery record.
#[derive(Debug, Clone)]
pub struct CreateWebhookDeliveryRow {
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Full set of mutable columns, written once per attempt.
#[derive(Debug, Clone)]
pub struct WebhookDeliveryRowUpdate {
    pub status: String,
    pub status_code: Option<i16>,
    pub latency_ms: Option<i32>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl WebhookDeliveryRow {
    /// Insert a new delivery record with status `pending`.
    pub async fn create(
        pool: &sqlx::PgPool,
        input: CreateWebhookDeliveryRow,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r"
            INSERT INTO webhook_deliveries (tenant_id, subscription_id, event, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(input.tenant_id)
        .bind(input.subscription_id)
        .bind(&input.event)
        .bind(&input.payload)
        .fetch_one(pool)
        .await
    }

    /// Find a delivery by id within a tenant.
    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_deliveries
            WHERE tenant_id = $1 AND id = $2
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// List deliveries for a tenant, newest first, with optional
    /// subscription and status filters.
    pub async fn list_by_tenant(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        subscription_id: Option<Uuid>,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r"
            SELECT * FROM webhook_deliveries
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR subscription_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            ",
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// Count deliveries matching the same filters as `list_by_tenant`.
    pub async fn count_by_tenant(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        subscription_id: Option<Uuid>,
        status: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM webhook_deliveries
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR subscription_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ",
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .bind(status)
        .fetch_one(pool)
        .await?;

        Ok(row.0)
    }

    /// Write the outcome of one attempt.
    pub async fn update(
        pool: &sqlx::PgPool,
        tenant_id: Uuid,
        id: Uuid,
        update: WebhookDeliveryRowUpdate,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE webhook_deliveries SET
                status = $3,
                status_code = $4,
                latency_ms = $5,
                error = $6,
                retry_count = $7,
                next_attempt_at = $8,
                last_retry_at = $9,
                delivered_at = $10
            WHERE tenant_id = $1 AND id = $2
            ",
        )
        .bind(tenant_id)
        .bind(id)
        .bind(&update.status)
        .bind(update.status_code)
        .bind(update.latency_ms)
        .bind(&update.error)
        .bind(update.retry_count)
        .bind(update.next_attempt_at)
        .bind(update.last_retry_at)
        .bind(update.delivered_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Atomically claim due retries: clears `next_attempt_at` on up to
    /// `batch` failed rows whose retry time has arrived and returns them.
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent workers from firing the
    /// same retry twice.
    pub async fn claim_due(
        pool: &sqlx::PgPool,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r"
            UPDATE webhook_deliveries SET next_attempt_at = NULL
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status = 'failed'
                  AND next_attempt_at IS NOT NULL
                  AND next_attempt_at <= $1
                ORDER BY next_attempt_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(now)
        .bind(batch)
        .fetch_all(pool)
        .await
    }
}
