//! Domain types for the webhook engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Business events that subscriptions can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookEventType {
    FilingSubmitted,
    FilingAccepted,
    FilingRejected,
    ReturnCalculated,
    PaymentRecorded,
    InvoiceIssued,
    DocumentUploaded,
    CompanyUpdated,
}

impl WebhookEventType {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FilingSubmitted => "filing.submitted",
            Self::FilingAccepted => "filing.accepted",
            Self::FilingRejected => "filing.rejected",
            Self::ReturnCalculated => "return.calculated",
            Self::PaymentRecorded => "payment.recorded",
            Self::InvoiceIssued => "invoice.issued",
            Self::DocumentUploaded => "document.uploaded",
            Self::CompanyUpdated => "company.updated",
        }
    }

    /// Parse a wire name; `None` for unknown events.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "filing.submitted" => Some(Self::FilingSubmitted),
            "filing.accepted" => Some(Self::FilingAccepted),
            "filing.rejected" => Some(Self::FilingRejected),
            "return.calculated" => Some(Self::ReturnCalculated),
            "payment.recorded" => Some(Self::PaymentRecorded),
            "invoice.issued" => Some(Self::InvoiceIssued),
            "document.uploaded" => Some(Self::DocumentUploaded),
            "company.updated" => Some(Self::CompanyUpdated),
            _ => None,
        }
    }

    /// All known event types.
    #[must_use]
    pub fn all() -> &'static [WebhookEventType] {
        &[
            Self::FilingSubmitted,
            Self::FilingAccepted,
            Self::FilingRejected,
            Self::ReturnCalculated,
            Self::PaymentRecorded,
            Self::InvoiceIssued,
            Self::DocumentUploaded,
            Self::CompanyUpdated,
        ]
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Per-subscription retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; 0 disables retries.
    pub max_retries: i32,
    /// Delay before the first retry.
    pub initial_delay_ms: i64,
    /// Multiplier applied per consumed retry.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

/// A tenant-registered webhook subscription.
#[derive(Debug, Clone)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub url: String,
    /// AES-256-GCM ciphertext; plaintext never leaves the engine.
    pub secret_encrypted: String,
    pub events: Vec<String>,
    pub active: bool,
    /// Extra static headers sent with every delivery.
    pub headers: HashMap<String, String>,
    pub retry_policy: RetryPolicy,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Delivery ledger
// ---------------------------------------------------------------------------

/// Persisted delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One delivery record: a single subscription/event occurrence and its
/// retry history.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event: String,
    /// Immutable `{event, timestamp, data}` snapshot taken at trigger time.
    pub payload: Value,
    pub status: DeliveryStatus,
    pub status_code: Option<i16>,
    pub latency_ms: Option<i32>,
    pub error: Option<String>,
    pub retry_count: i32,
    /// When set, a retry is scheduled for that instant.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WebhookDelivery {
    /// A failed record with no scheduled retry is terminal.
    #[must_use]
    pub fn is_terminal_failure(&self) -> bool {
        self.status == DeliveryStatus::Failed && self.next_attempt_at.is_none()
    }
}

/// Build the payload snapshot delivered on the wire.
///
/// Exactly three keys: `event`, `timestamp` (unix seconds at trigger
/// time), `data`. The snapshot is copied into the ledger so later changes
/// to the triggering data cannot alter a recorded attempt.
#[must_use]
pub fn payload_snapshot(event: &str, timestamp: i64, data: &Value) -> Value {
    serde_json::json!({
        "event": event,
        "timestamp": timestamp,
        "data": data,
    })
}

// ---------------------------------------------------------------------------
// Service request/response DTOs
// ---------------------------------------------------------------------------

/// Request to register a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub name: String,
    pub url: String,
    /// Caller-supplied secret; generated when absent.
    pub secret: Option<String>,
    pub events: Vec<String>,
    pub headers: Option<HashMap<String, String>>,
    pub retry_policy: Option<RetryPolicy>,
}

/// Partial subscription update. The secret is deliberately absent:
/// rotation is its own operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub active: Option<bool>,
    pub headers: Option<HashMap<String, String>>,
    pub retry_policy: Option<RetryPolicy>,
}

/// Subscription view returned by read APIs. Carries no secret material.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub active: bool,
    pub headers: HashMap<String, String>,
    pub retry_policy: RetryPolicy,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookSubscription> for SubscriptionResponse {
    fn from(sub: WebhookSubscription) -> Self {
        Self {
            id: sub.id,
            tenant_id: sub.tenant_id,
            name: sub.name,
            url: sub.url,
            events: sub.events,
            active: sub.active,
            headers: sub.headers,
            retry_policy: sub.retry_policy,
            last_triggered_at: sub.last_triggered_at,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

/// Result of a secret rotation. The plaintext is returned exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct SecretRotation {
    pub id: Uuid,
    pub secret: String,
}

/// Paginated subscription listing.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionPage {
    pub items: Vec<SubscriptionResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Paginated delivery history.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryPage {
    pub items: Vec<WebhookDelivery>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        for et in WebhookEventType::all() {
            assert_eq!(WebhookEventType::parse(et.as_str()), Some(*et));
        }
    }

    #[test]
    fn test_event_type_unknown() {
        assert_eq!(WebhookEventType::parse("filing.shredded"), None);
        assert_eq!(WebhookEventType::parse(""), None);
    }

    #[test]
    fn test_delivery_status_roundtrip() {
        for s in [
            DeliveryStatus::Pending,
            DeliveryStatus::Success,
            DeliveryStatus::Failed,
        ] {
            assert_eq!(DeliveryStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(DeliveryStatus::parse("abandoned"), None);
    }

    #[test]
    fn test_payload_snapshot_shape() {
        let data = serde_json::json!({"filing_id": "f-77", "period": "2026-Q2"});
        let snapshot = payload_snapshot("filing.submitted", 1722945600, &data);

        let obj = snapshot.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["event"], "filing.submitted");
        assert_eq!(obj["timestamp"], 1722945600);
        assert_eq!(obj["data"], data);
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay_ms, 5000);
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }
}
