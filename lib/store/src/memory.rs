//! An in-process test double for [`Store`], grounded on
//! `workflow/src/orchestrator.rs`'s `InMemoryEventStore`: a couple of
//! `Mutex`-guarded maps, no pool, no migrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claudecron_core::{ExecutionId, TaskId};
use claudecron_scheduler::{
    Execution, ExecutionFilter, ExecutionStatus, NewExecution, NewTask, NotFoundError, Store,
    StorageError, Task, TaskFilter, TaskPatch, TaskStats, Trigger,
};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory [`Store`] for unit and integration tests that don't need a
/// real database.
#[derive(Default)]
pub struct InMemoryStore {
    tasks: Mutex<HashMap<TaskId, Task>>,
    executions: Mutex<HashMap<ExecutionId, Execution>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_task(&self, new_task: NewTask) -> Result<Task, StorageError> {
        let now = Utc::now();
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

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, StorageError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| filter.enabled.is_none_or(|e| t.enabled == e))
            .filter(|t| filter.kind.is_none_or(|k| t.kind() == k))
            .filter(|t| filter.trigger_kind.is_none_or(|k| t.trigger.kind() == k))
            .filter(|t| {
                filter.hook_event.is_none_or(|event| {
                    matches!(&t.trigger, Trigger::Hook { event: e, .. } if *e == event)
                })
            })
            .filter(|t| {
                filter.name_contains.as_ref().is_none_or(|needle| t.name.contains(needle.as_str()))
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, StorageError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StorageError::from(NotFoundError::Task { task_id: id.to_string() }))?;

        if let Some(name) = patch.name {
            task.name = name;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(enabled) = patch.enabled {
            task.enabled = enabled;
        }
        if let Some(config) = patch.config {
            task.config = config;
        }
        if let Some(trigger) = patch.trigger {
            task.trigger = trigger;
        }
        if let Some(options) = patch.options {
            task.options = options;
        }
        if let Some(conditions) = patch.conditions {
            task.conditions = conditions;
        }
        if let Some(on_success) = patch.on_success {
            task.on_success = on_success;
        }
        if let Some(on_failure) = patch.on_failure {
            task.on_failure = on_failure;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StorageError> {
        self.tasks.lock().unwrap().remove(id);
        self.executions.lock().unwrap().retain(|_, e| e.task_id != *id);
        Ok(())
    }

    async fn set_next_run(
        &self,
        id: &TaskId,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StorageError::from(NotFoundError::Task { task_id: id.to_string() }))?;
        task.next_run = next_run;
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
        task.last_run = Some(Utc::now());
        Ok(())
    }

    async fn task_stats(&self, id: &TaskId) -> Result<TaskStats, StorageError> {
        let task = self.get_task(id).await?;
        Ok(TaskStats {
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
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .filter(|e| filter.started_after.is_none_or(|after| e.started_at >= after))
            .filter(|e| filter.started_before.is_none_or(|before| e.started_at <= before))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            executions.truncate(limit as usize);
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use claudecron_scheduler::{ExecutionOptions, TaskConfig, Trigger};

    fn new_shell_task(name: &str) -> NewTask {
        NewTask {
            name: name.to_string(),
            description: None,
            enabled: true,
            config: TaskConfig::Shell {
                command: "echo hi".into(),
                cwd: None,
                env: Default::default(),
                timeout_ms: None,
            },
            trigger: Trigger::Manual { reason: None },
            options: ExecutionOptions::default(),
            conditions: None,
            on_success: vec![],
            on_failure: vec![],
        }
    }

    #[tokio::test]
    async fn create_get_delete_round_trip() {
        let store = InMemoryStore::new();
        let task = store.create_task(new_shell_task("t1")).await.unwrap();
        assert!(store.get_task(&task.id).await.is_ok());
        store.delete_task(&task.id).await.unwrap();
        assert!(store.get_task(&task.id).await.is_err());
    }

    #[tokio::test]
    async fn get_missing_task_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_task(&TaskId::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn latest_execution_picks_most_recent() {
        let store = InMemoryStore::new();
        let task = store.create_task(new_shell_task("t1")).await.unwrap();
        let first = store
            .create_execution(NewExecution {
                task_id: task.id,
                trigger_type: "manual".into(),
                trigger_context: None,
                status: ExecutionStatus::Running,
            })
            .await
            .unwrap();
        let mut first_done = first.clone();
        first_done.status = ExecutionStatus::Success;
        store.update_execution(&first_done).await.unwrap();

        let latest = store.latest_execution_for_task(&task.id).await.unwrap();
        assert_eq!(latest.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn append_output_concatenates_in_order() {
        let store = InMemoryStore::new();
        let task = store.create_task(new_shell_task("t1")).await.unwrap();
        let execution = store
            .create_execution(NewExecution {
                task_id: task.id,
                trigger_type: "manual".into(),
                trigger_context: None,
                status: ExecutionStatus::Running,
            })
            .await
            .unwrap();

        store.append_output(&execution.id, "hello ").await.unwrap();
        store.append_output(&execution.id, "world").await.unwrap();

        let fetched = store.get_execution(&execution.id).await.unwrap();
        assert_eq!(fetched.output.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn append_output_on_missing_execution_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.append_output(&ExecutionId::new(), "x").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_tasks_filters_by_trigger_kind_and_hook_event() {
        use claudecron_scheduler::{HookEvent, TriggerKind};

        let store = InMemoryStore::new();
        let mut manual = new_shell_task("manual-task");
        manual.trigger = Trigger::Manual { reason: None };
        store.create_task(manual).await.unwrap();

        let mut hook = new_shell_task("hook-task");
        hook.trigger = Trigger::Hook {
            event: HookEvent::PostToolUse,
            matcher: None,
            conditions: None,
            debounce: None,
        };
        store.create_task(hook).await.unwrap();

        let by_kind = store
            .list_tasks(TaskFilter { trigger_kind: Some(TriggerKind::Hook), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(by_kind.len(), 1);
        assert_eq!(by_kind[0].name, "hook-task");

        let by_event = store
            .list_tasks(TaskFilter {
                hook_event: Some(HookEvent::PostToolUse),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_event.len(), 1);
        assert_eq!(by_event[0].name, "hook-task");

        let no_match = store
            .list_tasks(TaskFilter { hook_event: Some(HookEvent::SessionStart), ..Default::default() })
            .await
            .unwrap();
        assert!(no_match.is_empty());
    }
}
