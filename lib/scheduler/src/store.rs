//! The persistence seam.
//!
//! `Store` is defined here, inside the domain crate, rather than in a
//! separate crate that the domain crate would then have to depend on — the
//! same shape the source corpus uses for `EventStore` in
//! `workflow/src/orchestrator.rs`. A concrete backend crate depends on
//! `claudecron-scheduler` and implements this trait; the engine depends only
//! on the trait object, never on a specific backend.

use crate::error::StorageError;
use crate::execution::{Execution, ExecutionStatus, NewExecution};
use crate::model::{HookEvent, NewTask, Task, TaskPatch, TriggerKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claudecron_core::{ExecutionId, TaskId};

/// Filters accepted by `Store::list_tasks`. All fields are conjunctive;
/// `None` means "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub enabled: Option<bool>,
    pub kind: Option<crate::model::TaskKind>,
    pub trigger_kind: Option<TriggerKind>,
    /// Matches only `Trigger::Hook` tasks whose `event` is this one.
    pub hook_event: Option<HookEvent>,
    pub name_contains: Option<String>,
}

/// Filters accepted by `Store::list_executions`. All fields are
/// conjunctive; `None` means "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub task_id: Option<TaskId>,
    pub status: Option<ExecutionStatus>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Aggregate counters surfaced by `Store::task_stats`, matching the
/// running counters kept on `Task` itself (§8).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub run_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
}

/// The persistence contract the engine is generic over.
///
/// Implementations must make `create_task`/`create_execution` return rows
/// with server-assigned `id`/timestamps, and must treat `update_task`'s
/// `TaskPatch` as a merge (absent fields are left untouched).
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_task(&self, task: NewTask) -> Result<Task, StorageError>;
    async fn get_task(&self, id: &TaskId) -> Result<Task, StorageError>;
    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, StorageError>;
    async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, StorageError>;
    async fn delete_task(&self, id: &TaskId) -> Result<(), StorageError>;

    /// Records a new scheduling target for a scheduled trigger (cron,
    /// interval, or smart_schedule); `None` unschedules it.
    async fn set_next_run(
        &self,
        id: &TaskId,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;

    /// Bumps `run_count`, and `success_count` or `failure_count`
    /// (depending on `status.counts_as_failure()`), and sets `last_run`.
    async fn record_run(&self, id: &TaskId, status: ExecutionStatus) -> Result<(), StorageError>;

    async fn task_stats(&self, id: &TaskId) -> Result<TaskStats, StorageError>;

    async fn create_execution(&self, execution: NewExecution) -> Result<Execution, StorageError>;
    async fn get_execution(&self, id: &ExecutionId) -> Result<Execution, StorageError>;
    async fn update_execution(&self, execution: &Execution) -> Result<(), StorageError>;
    async fn list_executions(&self, filter: ExecutionFilter) -> Result<Vec<Execution>, StorageError>;

    /// Atomically concatenates `text` onto the execution's `output` field,
    /// kept distinct from `update_execution`'s full-row terminal write so a
    /// streaming executor's in-flight appends never race it (§9).
    async fn append_output(&self, id: &ExecutionId, text: &str) -> Result<(), StorageError>;

    /// Atomically concatenates `text` onto the execution's `thinking_output`
    /// field. See [`Store::append_output`].
    async fn append_thinking(&self, id: &ExecutionId, text: &str) -> Result<(), StorageError>;

    /// Most recent terminal execution for a dependency task, used by
    /// `DependencyGraph` to seed `completed_parents` on startup.
    async fn latest_execution_for_task(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<Execution>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_filter_default_is_unfiltered() {
        let filter = TaskFilter::default();
        assert!(filter.enabled.is_none());
        assert!(filter.kind.is_none());
        assert!(filter.trigger_kind.is_none());
        assert!(filter.hook_event.is_none());
        assert!(filter.name_contains.is_none());
    }

    #[test]
    fn task_stats_default_is_zeroed() {
        let stats = TaskStats::default();
        assert_eq!(stats, TaskStats { run_count: 0, success_count: 0, failure_count: 0 });
    }
}
