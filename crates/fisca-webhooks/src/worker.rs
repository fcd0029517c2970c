//! Durable retry worker.
//!
//! Retry schedules live on the delivery records (`next_attempt_at`), not
//! in process timers, so pending retries survive restarts: any worker that
//! starts against the same store picks them up. The worker polls for due
//! records, claims them atomically, and runs each through the ordinary
//! pipeline with bounded concurrency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::interval;

use crate::config::WorkerSettings;
use crate::services::delivery_service::DeliveryService;

/// Background worker that drives scheduled retries.
pub struct RetryWorker {
    service: DeliveryService,
    settings: WorkerSettings,
    shutdown: Arc<AtomicBool>,
}

impl RetryWorker {
    #[must_use]
    pub fn new(service: DeliveryService, settings: WorkerSettings) -> Self {
        Self {
            service,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the poll loop until shutdown is requested, then drain in-flight
    /// retries before returning.
    pub async fn run(&self) {
        tracing::info!(
            target: "webhook_worker",
            poll_interval_ms = self.settings.poll_interval_ms,
            batch_size = self.settings.batch_size,
            concurrency = self.settings.concurrency,
            "Starting webhook retry worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut poll = interval(Duration::from_millis(self.settings.poll_interval_ms.max(10)));

        loop {
            poll.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::info!(target: "webhook_worker", "Shutdown requested, stopping poll loop");
                break;
            }
            self.poll_and_process(&semaphore).await;
        }

        // Wait for in-flight retries to complete.
        let _ = semaphore
            .acquire_many(self.settings.concurrency as u32)
            .await;
        tracing::info!(target: "webhook_worker", "Worker stopped");
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// A handle that can stop the worker from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    async fn poll_and_process(&self, semaphore: &Arc<Semaphore>) {
        let due = match self
            .service
            .claim_due(Utc::now(), self.settings.batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(
                    target: "webhook_worker",
                    error = %e,
                    "Failed to claim due retries"
                );
                return;
            }
        };

        if due.is_empty() {
            return;
        }

        tracing::debug!(
            target: "webhook_worker",
            count = due.len(),
            "Claimed due retries"
        );

        for delivery in due {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let service = self.service.clone();
            tokio::spawn(async move {
                let _permit = permit;
                service.process_claimed(delivery).await;
            });
        }
    }
}
