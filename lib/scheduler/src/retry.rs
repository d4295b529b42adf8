//! `RetryController` (§4.11): decides whether a failed execution should be
//! retried, computes backoff delay, and arms the retry timer.

use crate::dispatch::{Dispatch, DispatchOrigin};
use crate::execution::{Execution, ExecutionStatus, RetryAttempt, RetryMetadata, TriggerContext};
use crate::model::{BackoffStrategy, RetryAcceptSet, RetryPolicy, Task};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Stateless retry decision/scheduling logic; one instance serves the
/// whole engine.
pub struct RetryController {
    dispatch: Arc<dyn Dispatch>,
}

impl RetryController {
    #[must_use]
    pub fn new(dispatch: Arc<dyn Dispatch>) -> Self {
        Self { dispatch }
    }

    /// True iff `task` has a retry policy, the in-flight attempt count is
    /// below `max_attempts`, and `execution`'s terminal status is in the
    /// policy's accept set.
    #[must_use]
    pub fn should_retry(&self, task: &Task, execution: &Execution) -> bool {
        let Some(policy) = task.options.retry_policy.as_ref() else {
            return false;
        };
        let attempt_count = current_attempt_count(execution);
        if attempt_count >= policy.max_attempts {
            return false;
        }
        accepts(policy.retry_on, execution.status)
    }

    /// `exponential`: `min(initial * 2^attempt, max)`. `linear`:
    /// `min(initial * (attempt + 1), max)`.
    #[must_use]
    pub fn calculate_delay(policy: &RetryPolicy, attempt_count: u32) -> u64 {
        let computed = match policy.backoff {
            BackoffStrategy::Exponential => {
                policy.initial_delay_ms.saturating_mul(2u64.saturating_pow(attempt_count))
            }
            BackoffStrategy::Linear => {
                policy.initial_delay_ms.saturating_mul(u64::from(attempt_count) + 1)
            }
        };
        computed.min(policy.max_delay_ms)
    }

    /// Builds updated `RetryMetadata`, arms a timer, and on fire dispatches
    /// a `trigger="retry"` execution of the same task.
    pub fn schedule_retry(&self, task: &Task, execution: &Execution) {
        let Some(policy) = task.options.retry_policy.as_ref() else {
            return;
        };
        let attempt_count = current_attempt_count(execution);
        let delay_ms = Self::calculate_delay(policy, attempt_count);

        let mut previous_attempts = previous_attempts(execution);
        previous_attempts.push(RetryAttempt {
            execution_id: execution.id,
            started_at: execution.started_at,
            status: execution.status,
            error: execution.error.clone(),
            delay_until_this_attempt_ms: delay_ms,
        });

        let metadata = RetryMetadata {
            attempt_count: attempt_count + 1,
            max_attempts: policy.max_attempts,
            backoff: policy.backoff,
            initial_delay_ms: policy.initial_delay_ms,
            max_delay_ms: policy.max_delay_ms,
            accept_set: policy.retry_on,
            previous_attempts,
        };

        let task_id = task.id;
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let mut context = TriggerContext::new();
            context.insert(
                "retry_metadata".to_string(),
                serde_json::to_value(&metadata).unwrap_or(JsonValue::Null),
            );
            if let Err(err) = dispatch.dispatch(task_id, DispatchOrigin::Retry, Some(context)).await {
                warn!(task = %task_id, error = %err, "scheduled retry dispatch failed");
            }
        });
    }
}

fn accepts(accept_set: RetryAcceptSet, status: ExecutionStatus) -> bool {
    match accept_set {
        RetryAcceptSet::All => status.counts_as_failure(),
        RetryAcceptSet::Error => status == ExecutionStatus::Failure,
        RetryAcceptSet::Timeout => status == ExecutionStatus::Timeout,
    }
}

fn retry_metadata(execution: &Execution) -> Option<RetryMetadata> {
    execution
        .trigger_context
        .as_ref()?
        .get("retry_metadata")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn current_attempt_count(execution: &Execution) -> u32 {
    retry_metadata(execution).map_or(0, |m| m.attempt_count)
}

fn previous_attempts(execution: &Execution) -> Vec<RetryAttempt> {
    retry_metadata(execution).map(|m| m.previous_attempts).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            retry_on: RetryAcceptSet::All,
        }
    }

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(RetryController::calculate_delay(&p, 0), 1000);
        assert_eq!(RetryController::calculate_delay(&p, 1), 2000);
        assert_eq!(RetryController::calculate_delay(&p, 2), 4000);
    }

    #[test]
    fn linear_backoff_scales_by_attempt_plus_one() {
        let p = policy(BackoffStrategy::Linear);
        assert_eq!(RetryController::calculate_delay(&p, 0), 1000);
        assert_eq!(RetryController::calculate_delay(&p, 1), 2000);
        assert_eq!(RetryController::calculate_delay(&p, 2), 3000);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(RetryController::calculate_delay(&p, 10), 10_000);
    }

    #[test]
    fn accept_set_error_excludes_timeout() {
        assert!(accepts(RetryAcceptSet::Error, ExecutionStatus::Failure));
        assert!(!accepts(RetryAcceptSet::Error, ExecutionStatus::Timeout));
    }

    #[test]
    fn accept_set_all_covers_both() {
        assert!(accepts(RetryAcceptSet::All, ExecutionStatus::Failure));
        assert!(accepts(RetryAcceptSet::All, ExecutionStatus::Timeout));
        assert!(!accepts(RetryAcceptSet::All, ExecutionStatus::Success));
    }
}
