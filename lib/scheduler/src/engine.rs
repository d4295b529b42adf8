//! The single dispatcher (§4.9): owns the catalog's mutation paths,
//! wires each task's trigger into the right source, and runs execution
//! worker tasks under a concurrency cap.
//!
//! The circular wiring the original source uses (scheduler <-> sources via
//! a late `setScheduler` call) is resolved per the redesign flag in §9 by
//! constructing the engine first (via `Arc::new_cyclic`, mirroring the
//! teacher's preference for trait objects over back-references — see
//! `EventStore`/`NodeExecutor` in `workflow/src/orchestrator.rs` and
//! `worker.rs`) and injecting a narrow [`Dispatch`] callback into each
//! source at construction.

use crate::condition::ConditionEvaluator;
use crate::cron::CronSchedule;
use crate::dispatch::{Dispatch, DispatchOrigin};
use crate::duration::parse_duration;
use crate::error::{ExecutionError, SchedulerError, ValidationError};
use crate::execution::{Execution, ExecutionStatus, ExecutorOutcome, NewExecution, TriggerContext};
use crate::executor::ExecutorRegistry;
use crate::filewatch::FileWatchSource;
use crate::graph::DependencyGraph;
use crate::handler::ResultHandlerRouter;
use crate::hook::{HookRegistration, HookRouter};
use crate::interval::IntervalSource;
use crate::model::{NewTask, Task, TaskPatch, Trigger};
use crate::retry::RetryController;
use crate::smart_schedule::SmartScheduleResolver;
use crate::store::{ExecutionFilter, Store, TaskFilter};
use async_trait::async_trait;
use claudecron_ai::backend::LlmBackend;
use claudecron_core::{ExecutionId, TaskId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, warn};

const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;

struct CronTimer {
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for CronTimer {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

/// The engine: catalog CRUD, `Execute`, and trigger-source wiring.
pub struct Engine {
    self_ref: Weak<Engine>,
    store: Arc<dyn Store>,
    executors: ExecutorRegistry,
    conditions: ConditionEvaluator,
    handlers: ResultHandlerRouter,
    retry: RetryController,
    smart_schedule: SmartScheduleResolver,
    graph: Mutex<DependencyGraph>,
    hooks: Mutex<HookRouter>,
    intervals: Mutex<HashMap<TaskId, IntervalSource>>,
    file_watches: Mutex<HashMap<TaskId, FileWatchSource>>,
    cron_timers: Mutex<HashMap<TaskId, CronTimer>>,
    concurrency: Arc<Semaphore>,
}

impl Engine {
    /// Constructs the engine. Does not yet wire any triggers; call
    /// [`Engine::start`] once the store has tasks to load.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        executors: ExecutorRegistry,
        llm_backend: Option<Arc<dyn LlmBackend>>,
    ) -> Arc<Self> {
        Self::with_concurrency(store, executors, llm_backend, DEFAULT_MAX_CONCURRENT_TASKS)
    }

    /// Like [`Engine::new`], but overriding the default concurrency cap
    /// (the `scheduler.max_concurrent_tasks` config field).
    #[must_use]
    pub fn with_concurrency(
        store: Arc<dyn Store>,
        executors: ExecutorRegistry,
        llm_backend: Option<Arc<dyn LlmBackend>>,
        max_concurrent_tasks: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Engine>| {
            let dispatch: Arc<dyn Dispatch> = Arc::new(EngineDispatch { engine: weak.clone() });
            Self {
                self_ref: weak.clone(),
                store,
                executors,
                conditions: ConditionEvaluator::new(),
                handlers: ResultHandlerRouter::new(dispatch.clone()),
                retry: RetryController::new(dispatch.clone()),
                smart_schedule: SmartScheduleResolver::new(llm_backend),
                graph: Mutex::new(DependencyGraph::new()),
                hooks: Mutex::new(HookRouter::new(dispatch)),
                intervals: Mutex::new(HashMap::new()),
                file_watches: Mutex::new(HashMap::new()),
                cron_timers: Mutex::new(HashMap::new()),
                concurrency: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            }
        })
    }

    fn handle(&self) -> Arc<Engine> {
        self.self_ref.upgrade().expect("engine outlives its own handles")
    }

    /// Loads every task from the store and wires its trigger. Call once
    /// at process startup.
    ///
    /// # Errors
    ///
    /// Returns whatever the store's `list_tasks` call returns.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let tasks = self.store.list_tasks(TaskFilter::default()).await?;
        for task in &tasks {
            if task.enabled {
                self.schedule_task(task).await?;
            }
        }
        Ok(())
    }

    // ---- catalog CRUD (§6 external invocation surface) ----

    /// # Errors
    ///
    /// Returns [`SchedulerError::Storage`] on persistence failure.
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task, SchedulerError> {
        let task = self.store.create_task(new_task).await?;
        if task.enabled {
            self.schedule_task(&task).await?;
        }
        Ok(task)
    }

    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if no task has `id`.
    pub async fn get_task(&self, id: &TaskId) -> Result<Task, SchedulerError> {
        Ok(self.store.get_task(id).await?)
    }

    /// # Errors
    ///
    /// Returns [`SchedulerError::Storage`] on persistence failure.
    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, SchedulerError> {
        Ok(self.store.list_tasks(filter).await?)
    }

    /// Updates a task, rescheduling it if the patch changes its trigger
    /// or enabled flag.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if no task has `id`.
    pub async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, SchedulerError> {
        let reschedule = patch.changes_scheduling();
        if reschedule {
            self.unschedule_task(*id).await;
        }
        let task = self.store.update_task(id, patch).await?;
        if reschedule && task.enabled {
            self.schedule_task(&task).await?;
        }
        Ok(task)
    }

    /// Unschedules then deletes a task.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if no task has `id`.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), SchedulerError> {
        self.unschedule_task(*id).await;
        self.graph.lock().await.remove_task(*id);
        Ok(self.store.delete_task(id).await?)
    }

    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if no execution has `id`.
    pub async fn get_execution(&self, id: &ExecutionId) -> Result<Execution, SchedulerError> {
        Ok(self.store.get_execution(id).await?)
    }

    /// `GetProgress` (§6): the execution record itself is the progress view
    /// for an in-flight run — `output`/`thinking_output` reflect whatever
    /// has been appended so far via [`Engine::append_output`]/
    /// [`Engine::append_thinking`], so a caller polling this while `status`
    /// is still `running` sees a live prefix rather than a stale snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if no execution has `id`.
    pub async fn get_progress(&self, id: &ExecutionId) -> Result<Execution, SchedulerError> {
        self.get_execution(id).await
    }

    /// Atomically concatenates `text` onto the execution's `output` field
    /// (§9: streaming append is kept distinct from the terminal
    /// `update_execution` write so an in-flight append can never race or be
    /// clobbered by the final write). No executor in this tree streams
    /// partial output today; this is the primitive a future one would call.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if no execution has `id`.
    pub async fn append_output(&self, id: &ExecutionId, text: &str) -> Result<(), SchedulerError> {
        Ok(self.store.append_output(id, text).await?)
    }

    /// Atomically concatenates `text` onto the execution's `thinking_output`
    /// field. See [`Engine::append_output`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if no execution has `id`.
    pub async fn append_thinking(&self, id: &ExecutionId, text: &str) -> Result<(), SchedulerError> {
        Ok(self.store.append_thinking(id, text).await?)
    }

    /// # Errors
    ///
    /// Returns [`SchedulerError::Storage`] on persistence failure.
    pub async fn list_executions(
        &self,
        filter: ExecutionFilter,
    ) -> Result<Vec<Execution>, SchedulerError> {
        Ok(self.store.list_executions(filter).await?)
    }

    /// Dispatches an externally-injected hook event to [`HookRouter`].
    pub async fn handle_hook_event(
        &self,
        event: crate::model::HookEvent,
        context: TriggerContext,
    ) {
        self.hooks.lock().await.route(event, context).await;
    }

    // ---- Execute ----

    /// Runs `task_id` for `trigger_type`/`context`. Writes a terminal
    /// `skipped` execution and returns immediately if conditions gate it
    /// (unless `override_conditions`); otherwise writes a `running`
    /// execution, hands the actual run off to a background worker, and
    /// returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] if the task doesn't exist,
    /// [`SchedulerError::Execution`] (`TaskDisabled`) if it is disabled,
    /// or [`SchedulerError::Storage`] if persisting the execution fails.
    pub async fn execute(
        &self,
        task_id: TaskId,
        trigger_type: impl Into<String> + Send,
        context: Option<TriggerContext>,
        override_conditions: bool,
    ) -> Result<Execution, SchedulerError> {
        let task = self.store.get_task(&task_id).await?;
        if !task.enabled {
            return Err(ExecutionError::TaskDisabled { task_id: task_id.to_string() }.into());
        }

        let trigger_type = trigger_type.into();

        if !override_conditions {
            if let Some(conditions) = &task.conditions {
                if self.conditions.evaluate(conditions).await.is_some() {
                    let mut skipped = self
                        .store
                        .create_execution(NewExecution {
                            task_id,
                            trigger_type,
                            trigger_context: context,
                            status: ExecutionStatus::Skipped,
                        })
                        .await?;
                    // `create_execution` builds the row from `Execution::start`'s
                    // shape, leaving completed_at/duration_ms unset; correct them
                    // to the terminal skipped shape and persist that correction
                    // so the stored row matches what callers get back.
                    skipped.completed_at = Some(skipped.started_at);
                    skipped.duration_ms = Some(0);
                    self.store.update_execution(&skipped).await?;
                    return Ok(skipped);
                }
            }
        }

        let execution = self
            .store
            .create_execution(NewExecution {
                task_id,
                trigger_type,
                trigger_context: context,
                status: ExecutionStatus::Running,
            })
            .await?;

        let worker_engine = self.handle();
        let worker_task = task;
        let worker_execution = execution.clone();
        tokio::spawn(async move {
            worker_engine.run_worker(worker_task, worker_execution).await;
        });

        Ok(execution)
    }

    async fn run_worker(self: Arc<Self>, task: Task, mut execution: Execution) {
        let _permit = match self.concurrency.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let result = self.executors.execute(&task, &execution).await;
        let (status, outcome) = classify(result);
        execution.finish(status, outcome);

        if let Err(err) = self.store.update_execution(&execution).await {
            error!(task = %task.id, execution = %execution.id, error = %err, "failed to persist terminal execution");
        }
        if let Err(err) = self.store.record_run(&task.id, status).await {
            error!(task = %task.id, error = %err, "failed to record task run counters");
        }

        match status {
            ExecutionStatus::Success => {
                self.handlers.run(&task.on_success, &task, &execution).await;
                let fired = self.graph.lock().await.notify_completed(task.id, &execution);
                for (dependent_id, context) in fired {
                    if let Err(err) = self
                        .execute(dependent_id, DispatchOrigin::Dependency.to_string(), Some(context), false)
                        .await
                    {
                        warn!(task = %dependent_id, error = %err, "dependency dispatch failed");
                    }
                }
            }
            _ if status.counts_as_failure() => {
                if self.retry.should_retry(&task, &execution) {
                    self.retry.schedule_retry(&task, &execution);
                } else {
                    self.handlers.run(&task.on_failure, &task, &execution).await;
                }
            }
            _ => {}
        }
    }

    // ---- trigger-source wiring ----

    async fn schedule_task(&self, task: &Task) -> Result<(), SchedulerError> {
        match &task.trigger {
            Trigger::Schedule { cron, tz } => {
                self.wire_cron(task.id, cron, tz.clone()).await?;
            }
            Trigger::Interval { every, start } => {
                let duration = parse_duration(every)?;
                let source = IntervalSource::spawn(
                    task.id,
                    duration,
                    *start,
                    self.dispatch_handle(),
                );
                self.intervals.lock().await.insert(task.id, source);
            }
            Trigger::FileWatch { path, pattern, debounce } => {
                let source = FileWatchSource::spawn(
                    task.id,
                    path.clone(),
                    pattern.as_deref(),
                    debounce.as_deref(),
                    self.dispatch_handle(),
                )?;
                self.file_watches.lock().await.insert(task.id, source);
            }
            Trigger::Hook { event, matcher, conditions, debounce } => {
                let matcher = matcher
                    .as_deref()
                    .map(regex::Regex::new)
                    .transpose()
                    .map_err(|_| ValidationError::EmptyField { field: "trigger.matcher" })?;
                let condition_file_pattern = conditions
                    .as_ref()
                    .and_then(|c| c.file_pattern.as_deref())
                    .map(regex::Regex::new)
                    .transpose()
                    .map_err(|_| ValidationError::EmptyField { field: "trigger.conditions.file_pattern" })?;
                let debounce = debounce.as_deref().map(parse_duration).transpose()?;
                self.hooks.lock().await.register(HookRegistration {
                    task_id: task.id,
                    event: *event,
                    matcher,
                    conditions: conditions.clone(),
                    condition_file_pattern,
                    debounce,
                });
            }
            Trigger::Dependency { parent_ids, join, debounce } => {
                self.graph
                    .lock()
                    .await
                    .add_dependency(task.id, parent_ids.clone(), *join, debounce.as_deref())?;
            }
            Trigger::Manual { .. } => {}
            Trigger::SmartSchedule {
                nl_description,
                constraints,
                fallback_cron,
                computed_cron,
                last_optimized,
            } => {
                let (cron, persisted) = self
                    .smart_schedule
                    .resolve(
                        &task.name,
                        nl_description,
                        constraints,
                        fallback_cron,
                        computed_cron.as_deref(),
                        *last_optimized,
                    )
                    .await;
                if let Some((computed, optimized_at)) = persisted {
                    let mut patch = TaskPatch::default();
                    patch.trigger = Some(Trigger::SmartSchedule {
                        nl_description: nl_description.clone(),
                        constraints: constraints.clone(),
                        fallback_cron: fallback_cron.clone(),
                        computed_cron: Some(computed),
                        last_optimized: Some(optimized_at),
                    });
                    let _ = self.store.update_task(&task.id, patch).await;
                }
                self.wire_cron(task.id, &cron, None).await?;
            }
        }
        Ok(())
    }

    async fn unschedule_task(&self, task_id: TaskId) {
        self.cron_timers.lock().await.remove(&task_id);
        self.intervals.lock().await.remove(&task_id);
        self.file_watches.lock().await.remove(&task_id);
        let _ = self.store.set_next_run(&task_id, None).await;
    }

    async fn wire_cron(
        &self,
        task_id: TaskId,
        expression: &str,
        tz: Option<String>,
    ) -> Result<(), SchedulerError> {
        let schedule = CronSchedule::new(expression)?.with_timezone_opt(tz);
        let next_run = schedule.next_after(chrono::Utc::now())?;
        self.store.set_next_run(&task_id, Some(next_run)).await?;

        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        let dispatch = self.dispatch_handle();
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            let mut next = next_run;
            loop {
                let now = chrono::Utc::now();
                let delay = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = &mut stop_rx => return,
                }
                if let Err(err) = dispatch
                    .dispatch(task_id, DispatchOrigin::Schedule, None)
                    .await
                {
                    warn!(task = %task_id, error = %err, "scheduled dispatch failed");
                }
                next = match schedule.next_after(chrono::Utc::now()) {
                    Ok(next) => next,
                    Err(err) => {
                        warn!(task = %task_id, error = %err, "failed to compute next cron fire, stopping timer");
                        return;
                    }
                };
                let _ = store.set_next_run(&task_id, Some(next)).await;
            }
        });

        self.cron_timers.lock().await.insert(task_id, CronTimer { stop_tx: Some(stop_tx), handle });
        Ok(())
    }

    fn dispatch_handle(&self) -> Arc<dyn Dispatch> {
        Arc::new(EngineDispatch { engine: self.self_ref.clone() })
    }
}

impl CronSchedule {
    fn with_timezone_opt(self, tz: Option<String>) -> Self {
        match tz {
            Some(tz) => self.with_timezone(tz),
            None => self,
        }
    }
}

fn classify(result: Result<ExecutorOutcome, ExecutionError>) -> (ExecutionStatus, ExecutorOutcome) {
    match result {
        Ok(outcome) => {
            let failed = outcome.error.is_some() || matches!(outcome.exit_code, Some(code) if code != 0);
            let status = if failed { ExecutionStatus::Failure } else { ExecutionStatus::Success };
            (status, outcome)
        }
        Err(ExecutionError::TimedOut { after_ms }) => (
            ExecutionStatus::Timeout,
            ExecutorOutcome {
                error: Some(format!("execution timed out after {after_ms}ms")),
                ..Default::default()
            },
        ),
        Err(err) => (
            ExecutionStatus::Failure,
            ExecutorOutcome { error: Some(err.to_string()), ..Default::default() },
        ),
    }
}

/// Thin [`Dispatch`] adapter that upgrades a weak engine handle and
/// forwards to [`Engine::execute`]. Exists so sources/handlers never hold
/// a strong or direct reference to the concrete [`Engine`] type.
struct EngineDispatch {
    engine: Weak<Engine>,
}

#[async_trait]
impl Dispatch for EngineDispatch {
    async fn dispatch(
        &self,
        task_id: TaskId,
        origin: DispatchOrigin,
        context: Option<TriggerContext>,
    ) -> Result<Execution, SchedulerError> {
        let Some(engine) = self.engine.upgrade() else {
            return Err(ExecutionError::ExecutorFailed {
                reason: "engine has shut down".to_string(),
            }
            .into());
        };
        engine.execute(task_id, origin.to_string(), context, false).await
    }
}

/// End-to-end engine tests (§8 scenarios). `TestStore` stands in for a real
/// backend the same way `InMemoryStore` does in `claudecron-store`, kept
/// local here since this crate can't dev-depend on the store crate that
/// depends on it.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NotFoundError, StorageError};
    use crate::model::{Conditions, ExecutionOptions, JoinMode, TaskConfig, Trigger};

    #[derive(Default)]
    struct TestStore {
        tasks: std::sync::Mutex<HashMap<TaskId, Task>>,
        executions: std::sync::Mutex<HashMap<ExecutionId, Execution>>,
    }

    #[async_trait]
    impl Store for TestStore {
        async fn create_task(&self, new_task: NewTask) -> Result<Task, StorageError> {
            let now = chrono::Utc::now();
            let task = Task {
                id: TaskId::new(),
                name: new_task.name,
                description: new_task.description,
                enabled: new_task.enabled,
                config: new_task.config,
                trigger: new_task.trigger,
                options: new_task.options,
                conditions: new_task.conditions,
                on_success: new_task.on_success,
                on_failure: new_task.on_failure,
                created_at: now,
                updated_at: now,
                last_run: None,
                next_run: None,
                run_count: 0,
                success_count: 0,
                failure_count: 0,
            };
            self.tasks.lock().unwrap().insert(task.id, task.clone());
            Ok(task)
        }

        async fn get_task(&self, id: &TaskId) -> Result<Task, StorageError> {
            self.tasks
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| NotFoundError::Task { task_id: id.to_string() }.into())
        }

        async fn list_tasks(&self, _filter: TaskFilter) -> Result<Vec<Task>, StorageError> {
            Ok(self.tasks.lock().unwrap().values().cloned().collect())
        }

        async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, StorageError> {
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .get_mut(id)
                .ok_or_else(|| StorageError::from(NotFoundError::Task { task_id: id.to_string() }))?;
            if let Some(trigger) = patch.trigger {
                task.trigger = trigger;
            }
            if let Some(enabled) = patch.enabled {
                task.enabled = enabled;
            }
            task.updated_at = chrono::Utc::now();
            Ok(task.clone())
        }

        async fn delete_task(&self, id: &TaskId) -> Result<(), StorageError> {
            self.tasks.lock().unwrap().remove(id);
            Ok(())
        }

        async fn set_next_run(
            &self,
            id: &TaskId,
            next_run: Option<chrono::DateTime<chrono::Utc>>,
        ) -> Result<(), StorageError> {
            if let Some(task) = self.tasks.lock().unwrap().get_mut(id) {
                task.next_run = next_run;
            }
            Ok(())
        }

        async fn record_run(&self, id: &TaskId, status: ExecutionStatus) -> Result<(), StorageError> {
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .get_mut(id)
                .ok_or_else(|| StorageError::from(NotFoundError::Task { task_id: id.to_string() }))?;
            task.run_count += 1;
            if status.counts_as_failure() {
                task.failure_count += 1;
            } else {
                task.success_count += 1;
            }
            task.last_run = Some(chrono::Utc::now());
            Ok(())
        }

        async fn task_stats(&self, id: &TaskId) -> Result<crate::store::TaskStats, StorageError> {
            let task = self.get_task(id).await?;
            Ok(crate::store::TaskStats {
                run_count: task.run_count,
                success_count: task.success_count,
                failure_count: task.failure_count,
            })
        }

        async fn create_execution(&self, new_execution: NewExecution) -> Result<Execution, StorageError> {
            let mut execution = Execution::start(
                new_execution.task_id,
                new_execution.trigger_type,
                new_execution.trigger_context,
            );
            execution.status = new_execution.status;
            self.executions.lock().unwrap().insert(execution.id, execution.clone());
            Ok(execution)
        }

        async fn get_execution(&self, id: &ExecutionId) -> Result<Execution, StorageError> {
            self.executions
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| NotFoundError::Execution { execution_id: id.to_string() }.into())
        }

        async fn update_execution(&self, execution: &Execution) -> Result<(), StorageError> {
            self.executions.lock().unwrap().insert(execution.id, execution.clone());
            Ok(())
        }

        async fn list_executions(&self, filter: ExecutionFilter) -> Result<Vec<Execution>, StorageError> {
            let mut executions: Vec<Execution> = self
                .executions
                .lock()
                .unwrap()
                .values()
                .filter(|e| filter.task_id.is_none_or(|t| e.task_id == t))
                .cloned()
                .collect();
            executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            Ok(executions)
        }

        async fn latest_execution_for_task(
            &self,
            task_id: &TaskId,
        ) -> Result<Option<Execution>, StorageError> {
            Ok(self
                .executions
                .lock()
                .unwrap()
                .values()
                .filter(|e| e.task_id == *task_id)
                .max_by_key(|e| e.started_at)
                .cloned())
        }

        async fn append_output(&self, id: &ExecutionId, text: &str) -> Result<(), StorageError> {
            let mut executions = self.executions.lock().unwrap();
            let execution = executions
                .get_mut(id)
                .ok_or_else(|| StorageError::from(NotFoundError::Execution { execution_id: id.to_string() }))?;
            execution.output.get_or_insert_with(String::new).push_str(text);
            Ok(())
        }

        async fn append_thinking(&self, id: &ExecutionId, text: &str) -> Result<(), StorageError> {
            let mut executions = self.executions.lock().unwrap();
            let execution = executions
                .get_mut(id)
                .ok_or_else(|| StorageError::from(NotFoundError::Execution { execution_id: id.to_string() }))?;
            execution.thinking_output.get_or_insert_with(String::new).push_str(text);
            Ok(())
        }
    }

    /// Succeeds unless the shell command contains the literal `fail`.
    struct ScriptedShellExecutor;

    #[async_trait]
    impl crate::executor::Executor for ScriptedShellExecutor {
        async fn execute(
            &self,
            task: &Task,
            _execution: &Execution,
        ) -> Result<ExecutorOutcome, ExecutionError> {
            let TaskConfig::Shell { command, .. } = &task.config else {
                return Err(ExecutionError::NoExecutor { kind: task.kind().to_string() });
            };
            if command.contains("fail") {
                Ok(ExecutorOutcome { exit_code: Some(1), error: Some("boom".into()), ..Default::default() })
            } else {
                Ok(ExecutorOutcome { exit_code: Some(0), output: Some("hello".into()), ..Default::default() })
            }
        }
    }

    fn new_shell_task(name: &str, command: &str, trigger: Trigger) -> NewTask {
        NewTask {
            name: name.to_string(),
            description: None,
            enabled: true,
            config: TaskConfig::Shell {
                command: command.to_string(),
                cwd: None,
                env: HashMap::new(),
                timeout_ms: None,
            },
            trigger,
            options: ExecutionOptions::default(),
            conditions: None,
            on_success: vec![],
            on_failure: vec![],
        }
    }

    fn test_engine() -> Arc<Engine> {
        let mut executors = ExecutorRegistry::new();
        executors.register(crate::model::TaskKind::Shell, Arc::new(ScriptedShellExecutor));
        Engine::new(Arc::new(TestStore::default()), executors, None)
    }

    /// Polls `get_execution` until it reaches a terminal status or the
    /// deadline expires; `run_worker` completes on a spawned task, so the
    /// caller of `execute` can't just await it directly.
    async fn await_terminal(engine: &Engine, id: &ExecutionId) -> Execution {
        for _ in 0..200 {
            let execution = engine.get_execution(id).await.unwrap();
            if execution.is_terminal() {
                return execution;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("execution {id} never reached a terminal status");
    }

    #[tokio::test]
    async fn happy_shell_run_advances_counters() {
        let engine = test_engine();
        let task = engine
            .create_task(new_shell_task("t1", "echo hello", Trigger::Manual { reason: None }))
            .await
            .unwrap();

        let running = engine.execute(task.id, "manual", None, false).await.unwrap();
        let terminal = await_terminal(&engine, &running.id).await;

        assert_eq!(terminal.status, ExecutionStatus::Success);
        assert_eq!(terminal.exit_code, Some(0));
        assert_eq!(terminal.output.as_deref(), Some("hello"));

        let stats = engine.get_task(&task.id).await.unwrap();
        assert_eq!(stats.run_count, 1);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 0);
    }

    #[tokio::test]
    async fn condition_gate_skips_without_dispatch() {
        let engine = test_engine();
        let mut new_task = new_shell_task("t2", "echo run", Trigger::Manual { reason: None });
        new_task.conditions = Some(Conditions {
            only_if_file_exists: Some("/does/not/exist".to_string()),
            ..Default::default()
        });
        let task = engine.create_task(new_task).await.unwrap();

        let execution = engine.execute(task.id, "manual", None, false).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Skipped);
        assert_eq!(execution.duration_ms, Some(0));
        assert!(execution.output.is_none());

        // The persisted row must match what was returned, not just the
        // in-memory value: fetch it back by the returned id.
        let persisted = engine.get_execution(&execution.id).await.unwrap();
        assert_eq!(persisted.status, ExecutionStatus::Skipped);
        assert_eq!(persisted.completed_at, Some(persisted.started_at));
        assert_eq!(persisted.duration_ms, Some(0));

        let stats = engine.get_task(&task.id).await.unwrap();
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.failure_count, 0);
    }

    #[tokio::test]
    async fn dependency_join_require_all_fires_once_both_parents_succeed() {
        let engine = test_engine();
        let a = engine
            .create_task(new_shell_task("a", "echo a", Trigger::Manual { reason: None }))
            .await
            .unwrap();
        let b = engine
            .create_task(new_shell_task("b", "echo b", Trigger::Manual { reason: None }))
            .await
            .unwrap();
        let c = engine
            .create_task(new_shell_task(
                "c",
                "echo c",
                Trigger::Dependency { parent_ids: vec![a.id, b.id], join: JoinMode::RequireAll, debounce: None },
            ))
            .await
            .unwrap();

        let run_a = engine.execute(a.id, "manual", None, false).await.unwrap();
        await_terminal(&engine, &run_a.id).await;
        let no_c_yet = engine.list_executions(ExecutionFilter { task_id: Some(c.id), ..Default::default() }).await.unwrap();
        assert!(no_c_yet.is_empty(), "C must not fire until both parents have completed");

        let run_b = engine.execute(b.id, "manual", None, false).await.unwrap();
        await_terminal(&engine, &run_b.id).await;

        let mut c_executions = None;
        for _ in 0..200 {
            let found = engine.list_executions(ExecutionFilter { task_id: Some(c.id), ..Default::default() }).await.unwrap();
            if !found.is_empty() {
                c_executions = Some(found);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let c_executions = c_executions.expect("C should have fired once both parents succeeded");
        assert_eq!(c_executions.len(), 1);
        assert_eq!(c_executions[0].trigger_type, "dependency");
    }
}
