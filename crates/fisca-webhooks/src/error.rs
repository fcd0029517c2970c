//! Error types for the webhook engine.

use thiserror::Error;

/// Webhook engine error variants.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Storage error: {0}")]
    Storage(#[from] fisca_db::DbError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection: {0}")]
    SsrfDetected(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Subscription limit ({limit}) reached for tenant")]
    SubscriptionLimitExceeded { limit: i64 },

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("Delivery already succeeded and cannot be retried")]
    DeliveryAlreadySucceeded,

    /// Signing was attempted with an empty secret. Active subscriptions
    /// always carry a secret, so this indicates a bug upstream, not user
    /// error.
    #[error("Subscription has no signing secret")]
    MissingSecret,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Missing configuration: {var}")]
    ConfigMissing { var: String },

    #[error("Invalid configuration for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type WebhookResult<T> = Result<T, WebhookError>;
