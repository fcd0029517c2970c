//! Database models.

pub mod webhook_delivery;
pub mod webhook_subscription;

pub use webhook_delivery::{
    CreateWebhookDeliveryRow, WebhookDeliveryRow, WebhookDeliveryRowUpdate,
};
pub use webhook_subscription::{
    CreateWebhookSubscriptionRow, UpdateWebhookSubscriptionRow, WebhookSubscriptionRow,
};
