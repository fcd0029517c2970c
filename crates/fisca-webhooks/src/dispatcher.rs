//! Single-attempt HTTP dispatch.
//!
//! The dispatcher performs exactly one delivery attempt and classifies the
//! outcome; it knows nothing about retries. Any 2xx response is success,
//! everything else (non-2xx status, timeout, connection failure, signing
//! fault) is failure with a recorded reason.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;

use crate::canonical;
use crate::config::WebhookConfig;
use crate::crypto;
use crate::error::WebhookError;
use crate::models::WebhookSubscription;
use crate::store::WebhookStore;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub success: bool,
    /// HTTP status when a response was received.
    pub status_code: Option<i16>,
    pub latency_ms: i32,
    /// Failure reason; `None` on success.
    pub error: Option<String>,
}

impl DispatchOutcome {
    fn failed(error: impl Into<String>, status_code: Option<i16>, latency_ms: i32) -> Self {
        Self {
            success: false,
            status_code,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// Performs signed HTTP POST attempts against subscription endpoints.
pub struct Dispatcher {
    http_client: Client,
    store: Arc<dyn WebhookStore>,
    encryption_key: Vec<u8>,
    timeout: Duration,
}

impl Dispatcher {
    /// Build a dispatcher with a shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(store: Arc<dyn WebhookStore>, config: &WebhookConfig) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            store,
            encryption_key: config.encryption_key.clone(),
            timeout: config.request_timeout,
        })
    }

    /// Perform one delivery attempt.
    ///
    /// On success, the subscription's `last_triggered_at` is set (plain
    /// last-writer-wins timestamp). Signing faults never raise: they are
    /// folded into a failed outcome so the caller records them on the
    /// delivery ledger.
    pub async fn attempt(
        &self,
        subscription: &WebhookSubscription,
        payload: &serde_json::Value,
    ) -> DispatchOutcome {
        let body = canonical::to_canonical_bytes(payload);
        let timestamp = Utc::now().timestamp().to_string();

        let signature = match self.sign(subscription, &timestamp, &body) {
            Ok(sig) => sig,
            Err(e) => {
                // Internal-consistency fault: an active subscription should
                // always carry a usable secret.
                tracing::error!(
                    target: "webhook_delivery",
                    subscription_id = %subscription.id,
                    tenant_id = %subscription.tenant_id,
                    error = %e,
                    "Cannot sign webhook payload"
                );
                return DispatchOutcome::failed(format!("signing failed: {e}"), None, 0);
            }
        };

        let headers = self.build_headers(subscription, &timestamp, &signature);

        let start = Instant::now();
        let result = self
            .http_client
            .post(&subscription.url)
            .headers(headers)
            .body(body)
            .send()
            .await;
        let latency_ms = start.elapsed().as_millis() as i32;

        match result {
            Ok(response) => {
                let status_code = response.status().as_u16() as i16;
                if (200..300).contains(&response.status().as_u16()) {
                    self.touch_last_triggered(subscription).await;
                    DispatchOutcome {
                        success: true,
                        status_code: Some(status_code),
                        latency_ms,
                        error: None,
                    }
                } else {
                    DispatchOutcome::failed(
                        format!("HTTP {status_code}"),
                        Some(status_code),
                        latency_ms,
                    )
                }
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("request timed out after {}s", self.timeout.as_secs())
                } else if e.is_connect() {
                    format!("connection failed: {e}")
                } else {
                    format!("request error: {e}")
                };
                DispatchOutcome::failed(reason, None, latency_ms)
            }
        }
    }

    fn sign(
        &self,
        subscription: &WebhookSubscription,
        timestamp: &str,
        body: &[u8],
    ) -> Result<String, WebhookError> {
        if subscription.secret_encrypted.is_empty() {
            return Err(WebhookError::MissingSecret);
        }
        let secret = crypto::decrypt_secret(&subscription.secret_encrypted, &self.encryption_key)?;
        crypto::sign_payload(&secret, timestamp, body)
    }

    /// Subscription static headers first, engine headers second so the
    /// engine's own headers always win.
    fn build_headers(
        &self,
        subscription: &WebhookSubscription,
        timestamp: &str,
        signature: &str,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in &subscription.headers {
            let parsed_name = HeaderName::from_bytes(name.as_bytes());
            let parsed_value = HeaderValue::from_str(value);
            match (parsed_name, parsed_value) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => {
                    tracing::warn!(
                        target: "webhook_delivery",
                        subscription_id = %subscription.id,
                        header = %name,
                        "Skipping unparseable static header"
                    );
                }
            }
        }

        if let Ok(v) = HeaderValue::from_str("application/json") {
            headers.insert(reqwest::header::CONTENT_TYPE, v);
        }
        if let Ok(v) = HeaderValue::from_str(timestamp) {
            headers.insert("X-Webhook-Timestamp", v);
        }
        if let Ok(v) = HeaderValue::from_str(&format!("sha256={signature}")) {
            headers.insert("X-Webhook-Signature", v);
        }
        if let Ok(v) = HeaderValue::from_str(&subscription.id.to_string()) {
            headers.insert("X-Webhook-ID", v);
        }

        headers
    }

    async fn touch_last_triggered(&self, subscription: &WebhookSubscription) {
        if let Err(e) = self
            .store
            .touch_subscription_last_triggered(subscription.id, Utc::now())
            .await
        {
            tracing::error!(
                target: "webhook_delivery",
                subscription_id = %subscription.id,
                error = %e,
                "Failed to update last_triggered_at"
            );
        }
    }
}
