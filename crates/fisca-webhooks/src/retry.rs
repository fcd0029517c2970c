//! Retry state machine.
//!
//! The decision logic is pure so backoff and ceiling behavior can be
//! tested without network calls or a store. Durability lives elsewhere:
//! the chosen delay is persisted as `next_attempt_at` on the delivery
//! record and a worker re-reads the record when it comes due, so pending
//! retries survive a process restart.

use std::time::Duration;

use crate::models::{DeliveryStatus, RetryPolicy, WebhookDelivery};

/// Ceiling on a single backoff delay (24 hours).
const MAX_BACKOFF_MS: u64 = 86_400_000;

/// Logical state of a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// An attempt is owed (initial dispatch, or a claimed due retry).
    Pending,
    /// Delivered; terminal.
    Succeeded,
    /// Failed with `retry_count` retries consumed so far.
    FailedRetryable { retry_count: i32 },
    /// Failed with no further automatic action; terminal.
    FailedTerminal,
}

impl DeliveryState {
    /// Derive the logical state from a persisted record.
    #[must_use]
    pub fn of(delivery: &WebhookDelivery) -> Self {
        match delivery.status {
            DeliveryStatus::Pending => Self::Pending,
            DeliveryStatus::Success => Self::Succeeded,
            DeliveryStatus::Failed if delivery.next_attempt_at.is_some() => {
                Self::FailedRetryable {
                    retry_count: delivery.retry_count,
                }
            }
            DeliveryStatus::Failed => Self::FailedTerminal,
        }
    }
}

/// What the pipeline should do next for a record in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Perform an HTTP attempt now.
    Dispatch,
    /// Persist a retry scheduled after the given delay.
    ScheduleRetry(Duration),
    /// No further automatic action.
    Stop,
}

/// Decide the next action for a delivery record.
///
/// `subscription_active` is re-checked by callers at every decision point;
/// a deactivated or deleted subscription stops the pipeline regardless of
/// remaining retry budget.
#[must_use]
pub fn next_action(
    state: &DeliveryState,
    policy: &RetryPolicy,
    subscription_active: bool,
) -> NextAction {
    if !subscription_active {
        return NextAction::Stop;
    }

    match state {
        DeliveryState::Pending => NextAction::Dispatch,
        DeliveryState::FailedRetryable { retry_count } if *retry_count < policy.max_retries => {
            NextAction::ScheduleRetry(backoff_delay(policy, *retry_count))
        }
        DeliveryState::FailedRetryable { .. }
        | DeliveryState::Succeeded
        | DeliveryState::FailedTerminal => NextAction::Stop,
    }
}

/// Backoff before retry number `retry_count + 1`:
/// `initial_delay_ms × backoff_multiplier^retry_count`, capped at 24h.
#[must_use]
pub fn backoff_delay(policy: &RetryPolicy, retry_count: i32) -> Duration {
    let base = policy.initial_delay_ms.max(0) as f64;
    let factor = policy.backoff_multiplier.max(1.0).powi(retry_count.max(0));
    let millis = (base * factor).min(MAX_BACKOFF_MS as f64) as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn policy(max_retries: i32, initial_delay_ms: i64, multiplier: f64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms,
            backoff_multiplier: multiplier,
        }
    }

    fn delivery(status: DeliveryStatus, retry_count: i32, scheduled: bool) -> WebhookDelivery {
        WebhookDelivery {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            event: "filing.submitted".to_string(),
            payload: json!({"event": "filing.submitted", "timestamp": 0, "data": {}}),
            status,
            status_code: None,
            latency_ms: None,
            error: None,
            retry_count,
            next_attempt_at: scheduled.then(Utc::now),
            last_retry_at: None,
            delivered_at: None,
            created_at: Utc::now(),
        }
    }

    // --- backoff ---

    #[test]
    fn test_backoff_doubles_per_retry() {
        let policy = policy(3, 5000, 2.0);
        assert_eq!(backoff_delay(&policy, 0), Duration::from_millis(5000));
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(10000));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(20000));
    }

    #[test]
    fn test_backoff_strictly_increasing_for_multiplier_above_one() {
        let policy = policy(10, 1000, 1.5);
        let mut previous = Duration::ZERO;
        for retry in 0..6 {
            let delay = backoff_delay(&policy, retry);
            assert!(delay > previous, "delay should grow at retry {retry}");
            previous = delay;
        }
    }

    #[test]
    fn test_backoff_flat_with_unit_multiplier() {
        let policy = policy(5, 2000, 1.0);
        assert_eq!(backoff_delay(&policy, 0), backoff_delay(&policy, 4));
    }

    #[test]
    fn test_backoff_capped_at_24h() {
        let policy = policy(64, 60_000, 10.0);
        assert_eq!(
            backoff_delay(&policy, 30),
            Duration::from_millis(MAX_BACKOFF_MS)
        );
    }

    // --- state derivation ---

    #[test]
    fn test_state_of_record() {
        assert_eq!(
            DeliveryState::of(&delivery(DeliveryStatus::Pending, 0, false)),
            DeliveryState::Pending
        );
        assert_eq!(
            DeliveryState::of(&delivery(DeliveryStatus::Success, 2, false)),
            DeliveryState::Succeeded
        );
        assert_eq!(
            DeliveryState::of(&delivery(DeliveryStatus::Failed, 1, true)),
            DeliveryState::FailedRetryable { retry_count: 1 }
        );
        assert_eq!(
            DeliveryState::of(&delivery(DeliveryStatus::Failed, 3, false)),
            DeliveryState::FailedTerminal
        );
    }

    // --- transitions ---

    #[test]
    fn test_pending_dispatches_when_active() {
        let action = next_action(&DeliveryState::Pending, &policy(3, 5000, 2.0), true);
        assert_eq!(action, NextAction::Dispatch);
    }

    #[test]
    fn test_inactive_subscription_stops_everything() {
        let p = policy(3, 5000, 2.0);
        assert_eq!(next_action(&DeliveryState::Pending, &p, false), NextAction::Stop);
        assert_eq!(
            next_action(&DeliveryState::FailedRetryable { retry_count: 0 }, &p, false),
            NextAction::Stop
        );
    }

    #[test]
    fn test_retry_scheduled_under_ceiling() {
        let p = policy(3, 5000, 2.0);
        assert_eq!(
            next_action(&DeliveryState::FailedRetryable { retry_count: 0 }, &p, true),
            NextAction::ScheduleRetry(Duration::from_millis(5000))
        );
        assert_eq!(
            next_action(&DeliveryState::FailedRetryable { retry_count: 2 }, &p, true),
            NextAction::ScheduleRetry(Duration::from_millis(20000))
        );
    }

    #[test]
    fn test_ceiling_stops_retries() {
        let p = policy(3, 5000, 2.0);
        assert_eq!(
            next_action(&DeliveryState::FailedRetryable { retry_count: 3 }, &p, true),
            NextAction::Stop
        );
        assert_eq!(
            next_action(&DeliveryState::FailedRetryable { retry_count: 7 }, &p, true),
            NextAction::Stop
        );
    }

    #[test]
    fn test_zero_max_retries_never_schedules() {
        let p = policy(0, 5000, 2.0);
        assert_eq!(
            next_action(&DeliveryState::FailedRetryable { retry_count: 0 }, &p, true),
            NextAction::Stop
        );
    }

    #[test]
    fn test_terminal_states_stop() {
        let p = policy(3, 5000, 2.0);
        assert_eq!(next_action(&DeliveryState::Succeeded, &p, true), NextAction::Stop);
        assert_eq!(
            next_action(&DeliveryState::FailedTerminal, &p, true),
            NextAction::Stop
        );
    }
}
