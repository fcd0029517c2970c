//! Subscription registry operations.
//!
//! Business logic behind the management surface: create, list, update,
//! delete, and secret rotation. All configuration errors are rejected
//! here so the dispatch pipeline only ever sees valid subscriptions.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::crypto;
use crate::error::WebhookError;
use crate::models::{
    CreateSubscriptionRequest, SecretRotation, SubscriptionPage, SubscriptionResponse,
    UpdateSubscriptionRequest,
};
use crate::store::{CreateSubscription, UpdateSubscription, WebhookStore};
use crate::validation;

/// Service for webhook subscription CRUD and secret management.
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn WebhookStore>,
    encryption_key: Vec<u8>,
    max_subscriptions: i64,
    allow_http: bool,
}

impl SubscriptionService {
    #[must_use]
    pub fn new(store: Arc<dyn WebhookStore>, config: &WebhookConfig) -> Self {
        Self {
            store,
            encryption_key: config.encryption_key.clone(),
            max_subscriptions: config.max_subscriptions,
            allow_http: config.allow_http,
        }
    }

    /// Register a subscription.
    ///
    /// A secret is generated when the caller does not supply one; either
    /// way only the ciphertext is stored and the response never carries
    /// secret material (callers that need the generated plaintext rotate
    /// immediately after creation).
    pub async fn create_subscription(
        &self,
        tenant_id: Uuid,
        request: CreateSubscriptionRequest,
    ) -> Result<SubscriptionResponse, WebhookError> {
        if request.name.trim().is_empty() {
            return Err(WebhookError::Validation(
                "subscription name must not be empty".to_string(),
            ));
        }
        validation::validate_url(&request.url, self.allow_http)?;
        validation::validate_events(&request.events)?;

        let headers = request.headers.unwrap_or_default();
        validation::validate_headers(&headers)?;

        let retry_policy = request.retry_policy.unwrap_or_default();
        validation::validate_retry_policy(&retry_policy)?;

        let count = self.store.count_subscriptions(tenant_id).await?;
        if count >= self.max_subscriptions {
            return Err(WebhookError::SubscriptionLimitExceeded {
                limit: self.max_subscriptions,
            });
        }

        let secret = match request.secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => crypto::generate_secret(),
        };
        let secret_encrypted = crypto::encrypt_secret(&secret, &self.encryption_key)?;

        let subscription = self
            .store
            .create_subscription(CreateSubscription {
                tenant_id,
                name: request.name,
                url: request.url,
                secret_encrypted,
                events: request.events,
                headers,
                retry_policy,
            })
            .await?;

        tracing::info!(
            target: "webhook_subscriptions",
            subscription_id = %subscription.id,
            tenant_id = %tenant_id,
            url = %subscription.url,
            "Webhook subscription created"
        );

        Ok(subscription.into())
    }

    /// Fetch one subscription.
    pub async fn get_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<SubscriptionResponse, WebhookError> {
        let subscription = self
            .store
            .get_subscription(tenant_id, id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)?;
        Ok(subscription.into())
    }

    /// Paginated subscription listing with an optional active filter.
    pub async fn list_subscriptions(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
        active: Option<bool>,
    ) -> Result<SubscriptionPage, WebhookError> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);

        let (subs, total) = self
            .store
            .list_subscriptions(tenant_id, limit, offset, active)
            .await?;

        Ok(SubscriptionPage {
            items: subs.into_iter().map(Into::into).collect(),
            total,
            limit,
            offset,
        })
    }

    /// Apply a partial update.
    ///
    /// The secret cannot be changed here; `rotate_secret` is the only
    /// path that touches it.
    pub async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        request: UpdateSubscriptionRequest,
    ) -> Result<SubscriptionResponse, WebhookError> {
        if let Some(ref name) = request.name {
            if name.trim().is_empty() {
                return Err(WebhookError::Validation(
                    "subscription name must not be empty".to_string(),
                ));
            }
        }
        if let Some(ref url) = request.url {
            validation::validate_url(url, self.allow_http)?;
        }
        if let Some(ref events) = request.events {
            validation::validate_events(events)?;
        }
        if let Some(ref headers) = request.headers {
            validation::validate_headers(headers)?;
        }
        if let Some(ref policy) = request.retry_policy {
            validation::validate_retry_policy(policy)?;
        }

        let subscription = self
            .store
            .update_subscription(
                tenant_id,
                id,
                UpdateSubscription {
                    name: request.name,
                    url: request.url,
                    events: request.events,
                    active: request.active,
                    headers: request.headers,
                    retry_policy: request.retry_policy,
                },
            )
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)?;

        Ok(subscription.into())
    }

    /// Delete a subscription. Past delivery records are untouched.
    pub async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> Result<(), WebhookError> {
        let deleted = self.store.delete_subscription(tenant_id, id).await?;
        if !deleted {
            return Err(WebhookError::SubscriptionNotFound);
        }

        tracing::info!(
            target: "webhook_subscriptions",
            subscription_id = %id,
            tenant_id = %tenant_id,
            "Webhook subscription deleted"
        );

        Ok(())
    }

    /// Rotate the signing secret.
    ///
    /// Generates a fresh secret, stores its ciphertext, and returns the
    /// plaintext exactly once. The previous secret stops being used
    /// immediately.
    pub async fn rotate_secret(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<SecretRotation, WebhookError> {
        let secret = crypto::generate_secret();
        let secret_encrypted = crypto::encrypt_secret(&secret, &self.encryption_key)?;

        let updated = self
            .store
            .update_subscription_secret(tenant_id, id, secret_encrypted)
            .await?;
        if !updated {
            return Err(WebhookError::SubscriptionNotFound);
        }

        tracing::info!(
            target: "webhook_subscriptions",
            subscription_id = %id,
            tenant_id = %tenant_id,
            "Webhook secret rotated"
        );

        Ok(SecretRotation { id, secret })
    }
}
