//! Event publishing over a tokio broadcast channel.
//!
//! Business modules publish events without holding a reference to the
//! delivery engine; a consumer task bridges the channel into
//! `DeliveryService::trigger`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::services::delivery_service::DeliveryService;

/// A business event emitted somewhere in the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessEvent {
    pub tenant_id: Uuid,
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl BusinessEvent {
    #[must_use]
    pub fn new(tenant_id: Uuid, event: impl Into<String>, data: Value) -> Self {
        Self {
            tenant_id,
            event: event.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Publisher side of the event channel.
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<BusinessEvent>,
}

impl EventPublisher {
    /// Create a publisher with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<BusinessEvent>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Publish an event. Fire-and-forget: a missing consumer is logged,
    /// never propagated.
    pub fn publish(&self, event: BusinessEvent) {
        if self.sender.send(event).is_err() {
            tracing::warn!(
                target: "webhook_delivery",
                "No active consumer for published business event"
            );
        }
    }

    /// Get an additional receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusinessEvent> {
        self.sender.subscribe()
    }
}

/// Spawn the consumer task bridging published events into the engine.
///
/// The task runs until the channel closes. A lagged receiver drops the
/// missed events and keeps going; the loss is logged.
pub fn spawn_event_consumer(
    service: DeliveryService,
    mut receiver: broadcast::Receiver<BusinessEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    service
                        .trigger(event.tenant_id, &event.event, &event.data)
                        .await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(
                        target: "webhook_delivery",
                        missed,
                        "Event consumer lagged; events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!(
                        target: "webhook_delivery",
                        "Event channel closed; consumer stopping"
                    );
                    break;
                }
            }
        }
    })
}
