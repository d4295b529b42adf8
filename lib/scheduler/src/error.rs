//! Error types for the scheduler crate.
//!
//! Mirrors the taxonomy of kinds the engine distinguishes, not type names:
//! `ValidationError` (malformed catalog input), `NotFoundError` (resolved
//! lookup returned no row), `ExecutionError` (executor/dispatch failure),
//! `HandlerError` (result handler raised), `StorageError` (persistence
//! failure), `TransportError` (webhook attempt failed). `SchedulerError`
//! composes all of them via `From` impls for call sites that don't care
//! which kind they got.

use std::fmt;

/// Malformed input at the catalog edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Cron expression did not parse.
    InvalidCron { expression: String, reason: String },
    /// A duration string did not match `^\d+[smhd]$`.
    InvalidDuration { value: String },
    /// Task kind discriminator not recognized.
    UnknownKind { kind: String },
    /// Hook event name is not one of the closed set.
    UnknownHookEvent { event: String },
    /// A required field was empty.
    EmptyField { field: &'static str },
    /// A dependency trigger referenced a task that does not exist.
    MissingDependency { task_id: String },
    /// The dependency graph contains a cycle.
    DependencyCycle { task_id: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCron { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::InvalidDuration { value } => {
                write!(f, "invalid duration '{value}', expected `<n>[smhd]`")
            }
            Self::UnknownKind { kind } => write!(f, "unknown task kind '{kind}'"),
            Self::UnknownHookEvent { event } => write!(f, "unknown hook event '{event}'"),
            Self::EmptyField { field } => write!(f, "required field '{field}' is empty"),
            Self::MissingDependency { task_id } => {
                write!(f, "dependency on missing task '{task_id}'")
            }
            Self::DependencyCycle { task_id } => {
                write!(f, "dependency graph contains a cycle reachable from '{task_id}'")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A resolved lookup (task, execution) returned no row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    Task { task_id: String },
    Execution { execution_id: String },
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task { task_id } => write!(f, "task '{task_id}' not found"),
            Self::Execution { execution_id } => write!(f, "execution '{execution_id}' not found"),
        }
    }
}

impl std::error::Error for NotFoundError {}

/// Executor reported a non-zero exit, a transport error, or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The task is disabled and cannot be dispatched.
    TaskDisabled { task_id: String },
    /// No executor is registered for the task's kind.
    NoExecutor { kind: String },
    /// The executor itself failed.
    ExecutorFailed { reason: String },
    /// The executor exceeded its effective deadline.
    TimedOut { after_ms: u64 },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskDisabled { task_id } => write!(f, "task '{task_id}' is disabled"),
            Self::NoExecutor { kind } => write!(f, "no executor registered for kind '{kind}'"),
            Self::ExecutorFailed { reason } => write!(f, "executor failed: {reason}"),
            Self::TimedOut { after_ms } => write!(f, "execution timed out after {after_ms}ms"),
        }
    }
}

impl std::error::Error for ExecutionError {}

/// A result handler raised. Logged, never fails the enclosing execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    FileWrite { path: String, reason: String },
    Webhook { url: String, reason: String },
    TriggerTask { task_id: String, reason: String },
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileWrite { path, reason } => {
                write!(f, "file handler failed writing '{path}': {reason}")
            }
            Self::Webhook { url, reason } => {
                write!(f, "webhook handler failed posting to '{url}': {reason}")
            }
            Self::TriggerTask { task_id, reason } => {
                write!(f, "trigger_task handler failed for '{task_id}': {reason}")
            }
        }
    }
}

impl std::error::Error for HandlerError {}

/// The persistence layer raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    NotFound(NotFoundError),
    Backend { reason: String },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(e) => write!(f, "{e}"),
            Self::Backend { reason } => write!(f, "storage backend error: {reason}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<NotFoundError> for StorageError {
    fn from(e: NotFoundError) -> Self {
        Self::NotFound(e)
    }
}

/// A webhook attempt failed after exhausting its retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    RequestFailed { url: String, reason: String },
    Timeout { url: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestFailed { url, reason } => {
                write!(f, "request to '{url}' failed: {reason}")
            }
            Self::Timeout { url } => write!(f, "request to '{url}' timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Composed top-level error for callers that accept any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    Validation(ValidationError),
    NotFound(NotFoundError),
    Execution(ExecutionError),
    Handler(HandlerError),
    Storage(StorageError),
    Transport(TransportError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "{e}"),
            Self::NotFound(e) => write!(f, "{e}"),
            Self::Execution(e) => write!(f, "{e}"),
            Self::Handler(e) => write!(f, "{e}"),
            Self::Storage(e) => write!(f, "{e}"),
            Self::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<ValidationError> for SchedulerError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<NotFoundError> for SchedulerError {
    fn from(e: NotFoundError) -> Self {
        Self::NotFound(e)
    }
}

impl From<ExecutionError> for SchedulerError {
    fn from(e: ExecutionError) -> Self {
        Self::Execution(e)
    }
}

impl From<HandlerError> for SchedulerError {
    fn from(e: HandlerError) -> Self {
        Self::Handler(e)
    }
}

impl From<StorageError> for SchedulerError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<TransportError> for SchedulerError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::InvalidCron {
            expression: "* * *".to_string(),
            reason: "expected 5 or 6 fields".to_string(),
        };
        assert!(err.to_string().contains("* * *"));
        assert!(err.to_string().contains("5 or 6 fields"));
    }

    #[test]
    fn scheduler_error_from_validation() {
        let err: SchedulerError = ValidationError::EmptyField { field: "name" }.into();
        assert!(matches!(err, SchedulerError::Validation(_)));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn storage_error_from_not_found() {
        let err: StorageError = NotFoundError::Task {
            task_id: "task_123".to_string(),
        }
        .into();
        assert!(err.to_string().contains("task_123"));
    }
}
