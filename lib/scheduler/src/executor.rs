//! The execution seam.
//!
//! `Executor` is defined here for the same reason `Store` is (see
//! `store.rs`): it mirrors the source corpus's `NodeExecutor` trait living
//! in `workflow/src/worker.rs` rather than in a separate crate the domain
//! model would have to import. `claudecron-executor` depends on this crate
//! and implements it for shell commands and each AI-kind task; the engine
//! depends only on `ExecutorRegistry`.

use crate::error::ExecutionError;
use crate::execution::{Execution, ExecutorOutcome};
use crate::model::{Task, TaskKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Runs one task attempt to completion (or to its effective timeout) and
/// reports a typed outcome. Implementations own retrying the underlying
/// process/API call at the transport level; retry-after-failure policy
/// (§4.11) lives above this trait, in the engine.
///
/// `execution` is passed alongside `task` so implementations can inject
/// `EXECUTION_ID`/`TRIGGER_TYPE`/`trigger_context` into whatever they run
/// (§6); it is always the freshly-created `running` record for this
/// attempt, never read back.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes `task`, respecting `task.effective_timeout_ms()` if set.
    ///
    /// Returning `Err` means the executor itself could not run the task
    /// (bad config, spawn failure); a task that ran and exited non-zero,
    /// or an AI call that returned an error, is still `Ok` with the
    /// failure recorded in the outcome.
    async fn execute(
        &self,
        task: &Task,
        execution: &Execution,
    ) -> Result<ExecutorOutcome, ExecutionError>;
}

/// Maps [`TaskKind`] to the [`Executor`] that runs it.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { executors: HashMap::new() }
    }

    /// Registers `executor` to run every task of `kind`. A later call for
    /// the same kind replaces the earlier registration.
    pub fn register(&mut self, kind: TaskKind, executor: Arc<dyn Executor>) {
        self.executors.insert(kind, executor);
    }

    /// Dispatches `task` to the executor registered for its kind.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::NoExecutor`] if nothing is registered for
    /// `task.kind()`, else whatever the executor itself returns.
    pub async fn execute(
        &self,
        task: &Task,
        execution: &Execution,
    ) -> Result<ExecutorOutcome, ExecutionError> {
        let kind = task.kind();
        let executor = self
            .executors
            .get(&kind)
            .ok_or_else(|| ExecutionError::NoExecutor { kind: kind.to_string() })?;
        executor.execute(task, execution).await
    }
}
