//! The immutable-once-terminal record of one task attempt: [`Execution`],
//! its [`ExecutionStatus`] lifecycle, and the [`RetryMetadata`] carried in
//! `trigger_context` for retry-origin executions.

use chrono::{DateTime, Utc};
use claudecron_core::{ExecutionId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Free-form structured data attached to an execution's trigger origin:
/// hook payload, parent-execution pointer, or retry metadata.
pub type TriggerContext = HashMap<String, JsonValue>;

/// Terminal (and pre-terminal) status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failure,
    Timeout,
    Cancelled,
    Skipped,
}

impl ExecutionStatus {
    /// True for any status that will never transition further.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// True for statuses that count toward `task.failure_count`
    /// (`failure` and `timeout`, per §8).
    #[must_use]
    pub fn counts_as_failure(self) -> bool {
        matches!(self, Self::Failure | Self::Timeout)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// A single tool invocation made during an AI-kind execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub input: JsonValue,
    #[serde(default)]
    pub result: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
}

/// Token usage reported by an AI-kind executor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SdkUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_tokens: u64,
}

/// Backoff/attempt bookkeeping for one retry-origin execution, embedded in
/// `trigger_context["retry_metadata"]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryMetadata {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub backoff: crate::model::BackoffStrategy,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub accept_set: crate::model::RetryAcceptSet,
    pub previous_attempts: Vec<RetryAttempt>,
}

/// One prior attempt in a [`RetryMetadata`] history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub execution_id: ExecutionId,
    pub started_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub delay_until_this_attempt_ms: u64,
}

/// The typed result an [`crate::executor::Executor`] returns, merged onto
/// the execution record by the engine when it writes the terminal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorOutcome {
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub output_truncated: bool,
    #[serde(default)]
    pub thinking_output: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub sdk_usage: Option<SdkUsage>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

/// The immutable-once-terminal record of one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    pub trigger_type: String,
    #[serde(default)]
    pub trigger_context: Option<TriggerContext>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub output_truncated: bool,
    #[serde(default)]
    pub thinking_output: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub sdk_usage: Option<SdkUsage>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

impl Execution {
    /// Constructs a freshly-dispatched `running` execution.
    #[must_use]
    pub fn start(
        task_id: TaskId,
        trigger_type: impl Into<String>,
        trigger_context: Option<TriggerContext>,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            task_id,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            trigger_type: trigger_type.into(),
            trigger_context,
            status: ExecutionStatus::Running,
            exit_code: None,
            error: None,
            output: None,
            output_truncated: false,
            thinking_output: None,
            tool_calls: Vec::new(),
            sdk_usage: None,
            cost_usd: None,
        }
    }

    /// Constructs a terminal `skipped` execution: `started_at ==
    /// completed_at`, `duration_ms == 0`, no output (§4.9).
    #[must_use]
    pub fn skipped(
        task_id: TaskId,
        trigger_type: impl Into<String>,
        trigger_context: Option<TriggerContext>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ExecutionId::new(),
            task_id,
            started_at: now,
            completed_at: Some(now),
            duration_ms: Some(0),
            trigger_type: trigger_type.into(),
            trigger_context,
            status: ExecutionStatus::Skipped,
            exit_code: None,
            error: None,
            output: None,
            output_truncated: false,
            thinking_output: None,
            tool_calls: Vec::new(),
            sdk_usage: None,
            cost_usd: None,
        }
    }

    /// Seals the execution with a terminal status and the executor's
    /// outcome, setting `completed_at`/`duration_ms` from `started_at`.
    pub fn finish(&mut self, status: ExecutionStatus, outcome: ExecutorOutcome) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0));
        self.status = status;
        self.exit_code = outcome.exit_code;
        self.error = outcome.error;
        self.output = outcome.output;
        self.output_truncated = outcome.output_truncated;
        self.thinking_output = outcome.thinking_output;
        self.tool_calls = outcome.tool_calls;
        self.sdk_usage = outcome.sdk_usage;
        self.cost_usd = outcome.cost_usd;
    }

    /// True once this execution has reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Fields accepted for creating a new execution (the engine is the only
/// caller; see `Store::create_execution`).
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub task_id: TaskId,
    pub trigger_type: String,
    pub trigger_context: Option<TriggerContext>,
    pub status: ExecutionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_execution_has_zero_duration() {
        let exec = Execution::skipped(TaskId::new(), "manual", None);
        assert_eq!(exec.status, ExecutionStatus::Skipped);
        assert_eq!(exec.started_at, exec.completed_at.unwrap());
        assert_eq!(exec.duration_ms, Some(0));
        assert!(exec.output.is_none());
    }

    #[test]
    fn finish_sets_completed_at_and_duration() {
        let mut exec = Execution::start(TaskId::new(), "manual", None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        exec.finish(
            ExecutionStatus::Success,
            ExecutorOutcome {
                exit_code: Some(0),
                output: Some("hello".into()),
                ..Default::default()
            },
        );
        assert!(exec.is_terminal());
        assert!(exec.completed_at.unwrap() >= exec.started_at);
        assert!(exec.duration_ms.unwrap() >= 0);
        assert_eq!(exec.exit_code, Some(0));
    }

    #[test]
    fn status_counts_as_failure_matches_spec() {
        assert!(ExecutionStatus::Failure.counts_as_failure());
        assert!(ExecutionStatus::Timeout.counts_as_failure());
        assert!(!ExecutionStatus::Success.counts_as_failure());
        assert!(!ExecutionStatus::Skipped.counts_as_failure());
    }

    #[test]
    fn running_and_pending_are_not_terminal() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }
}
