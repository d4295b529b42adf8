//! The shared-server backend: Postgres, sized per the concurrency budget
//! (20 max connections, 30s idle timeout, 2s acquire timeout).
//!
//! Structurally mirrors [`crate::sqlite::SqliteStore`]; the row shapes and
//! queries differ only in placeholder syntax and column types, following
//! `bin/server/src/db/workflow.rs`'s `WorkflowRepository`.

use crate::codec::{decode, decode_opt, encode, encode_opt, parse_id};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claudecron_core::{ExecutionId, TaskId};
use claudecron_scheduler::{
    Execution, ExecutionFilter, ExecutionStatus, NewExecution, NewTask, NotFoundError, Store,
    StorageError, Task, TaskFilter, TaskPatch, TaskStats, Trigger,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;

/// Postgres-backed [`Store`] for multi-process deployments.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects with the pool sizing fixed by the concurrency model (§5)
    /// and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError::Backend`] if the connection or migrations
    /// fail.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .idle_timeout(Duration::from_secs(30))
            .acquire_timeout(Duration::from_secs(2))
            .connect(url)
            .await
            .map_err(|e| StorageError::Backend { reason: e.to_string() })?;

        tracing::info!("running postgres migrations");
        sqlx::migrate!("./migrations/postgres")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Backend { reason: e.to_string() })?;

        Ok(Self { pool })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    name: String,
    description: Option<String>,
    enabled: bool,
    config_json: String,
    trigger_json: String,
    options_json: String,
    conditions_json: Option<String>,
    on_success_json: String,
    on_failure_json: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    run_count: i64,
    success_count: i64,
    failure_count: i64,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task, StorageError> {
        Ok(Task {
            id: parse_id(&self.id, "task id")?,
            name: self.name,
            description: self.description,
            enabled: self.enabled,
            config: decode(&self.config_json)?,
            trigger: decode(&self.trigger_json)?,
            options: decode(&self.options_json)?,
            conditions: decode_opt(self.conditions_json.as_deref())?,
            on_success: decode(&self.on_success_json)?,
            on_failure: decode(&self.on_failure_json)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_run: self.last_run,
            next_run: self.next_run,
            run_count: u64::try_from(self.run_count).unwrap_or(0),
            success_count: u64::try_from(self.success_count).unwrap_or(0),
            failure_count: u64::try_from(self.failure_count).unwrap_or(0),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: String,
    task_id: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    trigger_type: String,
    trigger_context_json: Option<String>,
    status: String,
    exit_code: Option<i32>,
    error: Option<String>,
    output: Option<String>,
    output_truncated: bool,
    thinking_output: Option<String>,
    tool_calls_json: String,
    sdk_usage_json: Option<String>,
    cost_usd: Option<f64>,
}

impl ExecutionRow {
    fn try_into_execution(self) -> Result<Execution, StorageError> {
        Ok(Execution {
            id: parse_id(&self.id, "execution id")?,
            task_id: parse_id(&self.task_id, "task id")?,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
            trigger_type: self.trigger_type,
            trigger_context: decode_opt(self.trigger_context_json.as_deref())?,
            status: decode_status(&self.status)?,
            exit_code: self.exit_code,
            error: self.error,
            output: self.output,
            output_truncated: self.output_truncated,
            thinking_output: self.thinking_output,
            tool_calls: decode(&self.tool_calls_json)?,
            sdk_usage: decode_opt(self.sdk_usage_json.as_deref())?,
            cost_usd: self.cost_usd,
        })
    }
}

fn decode_status(raw: &str) -> Result<ExecutionStatus, StorageError> {
    match raw {
        "pending" => Ok(ExecutionStatus::Pending),
        "running" => Ok(ExecutionStatus::Running),
        "success" => Ok(ExecutionStatus::Success),
        "failure" => Ok(ExecutionStatus::Failure),
        "timeout" => Ok(ExecutionStatus::Timeout),
        "cancelled" => Ok(ExecutionStatus::Cancelled),
        "skipped" => Ok(ExecutionStatus::Skipped),
        other => Err(StorageError::Backend { reason: format!("unknown execution status '{other}'") }),
    }
}

fn encode_status(status: ExecutionStatus) -> String {
    status.to_string()
}

#[async_trait]
impl Store for PostgresStore {
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

        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, name, description, enabled, kind, config_json, trigger_json, options_json,
                 conditions_json, on_success_json, on_failure_json, created_at, updated_at,
                 run_count, success_count, failure_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0, 0, 0)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.name)
        .bind(&task.description)
        .bind(task.enabled)
        .bind(task.kind().to_string())
        .bind(encode(&task.config)?)
        .bind(encode(&task.trigger)?)
        .bind(encode(&task.options)?)
        .bind(encode_opt(&task.conditions)?)
        .bind(encode(&task.on_success)?)
        .bind(encode(&task.on_failure)?)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { reason: e.to_string() })?;

        Ok(task)
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task, StorageError> {
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, enabled, config_json, trigger_json, options_json,
                   conditions_json, on_success_json, on_failure_json, created_at, updated_at,
                   last_run, next_run, run_count, success_count, failure_count
            FROM tasks WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { reason: e.to_string() })?;

        match row {
            Some(r) => r.try_into_task(),
            None => Err(NotFoundError::Task { task_id: id.to_string() }.into()),
        }
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, StorageError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT id, name, description, enabled, config_json, trigger_json, options_json,
                   conditions_json, on_success_json, on_failure_json, created_at, updated_at,
                   last_run, next_run, run_count, success_count, failure_count
            FROM tasks WHERE 1=1
            "#,
        );
        if let Some(enabled) = filter.enabled {
            builder.push(" AND enabled = ").push_bind(enabled);
        }
        if let Some(kind) = filter.kind {
            builder.push(" AND kind = ").push_bind(kind.to_string());
        }
        if let Some(name) = filter.name_contains {
            builder.push(" AND name LIKE ").push_bind(format!("%{name}%"));
        }
        builder.push(" ORDER BY created_at DESC");

        let rows: Vec<TaskRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend { reason: e.to_string() })?;

        // trigger_json is an opaque blob with no dedicated column, so
        // trigger_kind/hook_event can't be pushed into the WHERE clause
        // above; filter on the decoded value instead.
        let tasks: Vec<Task> =
            rows.into_iter().map(TaskRow::try_into_task).collect::<Result<_, _>>()?;
        Ok(tasks
            .into_iter()
            .filter(|t| filter.trigger_kind.is_none_or(|k| t.trigger.kind() == k))
            .filter(|t| {
                filter.hook_event.is_none_or(|event| {
                    matches!(&t.trigger, Trigger::Hook { event: e, .. } if *e == event)
                })
            })
            .collect())
    }

    async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, StorageError> {
        let mut task = self.get_task(id).await?;
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

        sqlx::query(
            r#"
            UPDATE tasks SET
                name = $1, description = $2, enabled = $3, kind = $4, config_json = $5,
                trigger_json = $6, options_json = $7, conditions_json = $8, on_success_json = $9,
                on_failure_json = $10, updated_at = $11
            WHERE id = $12
            "#,
        )
        .bind(&task.name)
        .bind(&task.description)
        .bind(task.enabled)
        .bind(task.kind().to_string())
        .bind(encode(&task.config)?)
        .bind(encode(&task.trigger)?)
        .bind(encode(&task.options)?)
        .bind(encode_opt(&task.conditions)?)
        .bind(encode(&task.on_success)?)
        .bind(encode(&task.on_failure)?)
        .bind(task.updated_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { reason: e.to_string() })?;

        Ok(task)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend { reason: e.to_string() })?;
        Ok(())
    }

    async fn set_next_run(
        &self,
        id: &TaskId,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE tasks SET next_run = $1 WHERE id = $2")
            .bind(next_run)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend { reason: e.to_string() })?;
        Ok(())
    }

    async fn record_run(&self, id: &TaskId, status: ExecutionStatus) -> Result<(), StorageError> {
        let column = if status.counts_as_failure() { "failure_count" } else { "success_count" };
        let sql = format!(
            "UPDATE tasks SET run_count = run_count + 1, {column} = {column} + 1, last_run = $1 WHERE id = $2"
        );
        sqlx::query(&sql)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend { reason: e.to_string() })?;
        Ok(())
    }

    async fn task_stats(&self, id: &TaskId) -> Result<TaskStats, StorageError> {
        let row = sqlx::query(
            "SELECT run_count, success_count, failure_count FROM tasks WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { reason: e.to_string() })?
        .ok_or_else(|| StorageError::from(NotFoundError::Task { task_id: id.to_string() }))?;

        Ok(TaskStats {
            run_count: u64::try_from(row.try_get::<i64, _>("run_count").unwrap_or(0)).unwrap_or(0),
            success_count: u64::try_from(row.try_get::<i64, _>("success_count").unwrap_or(0)).unwrap_or(0),
            failure_count: u64::try_from(row.try_get::<i64, _>("failure_count").unwrap_or(0)).unwrap_or(0),
        })
    }

    async fn create_execution(&self, new_execution: NewExecution) -> Result<Execution, StorageError> {
        let mut execution = Execution::start(
            new_execution.task_id,
            new_execution.trigger_type,
            new_execution.trigger_context,
        );
        execution.status = new_execution.status;

        sqlx::query(
            r#"
            INSERT INTO executions
                (id, task_id, started_at, trigger_type, trigger_context_json, status,
                 output_truncated, tool_calls_json)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, '[]')
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.task_id.to_string())
        .bind(execution.started_at)
        .bind(&execution.trigger_type)
        .bind(encode_opt(&execution.trigger_context)?)
        .bind(encode_status(execution.status))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { reason: e.to_string() })?;

        Ok(execution)
    }

    async fn get_execution(&self, id: &ExecutionId) -> Result<Execution, StorageError> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, task_id, started_at, completed_at, duration_ms, trigger_type,
                   trigger_context_json, status, exit_code, error, output, output_truncated,
                   thinking_output, tool_calls_json, sdk_usage_json, cost_usd
            FROM executions WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { reason: e.to_string() })?;

        match row {
            Some(r) => r.try_into_execution(),
            None => Err(NotFoundError::Execution { execution_id: id.to_string() }.into()),
        }
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE executions SET
                completed_at = $1, duration_ms = $2, status = $3, exit_code = $4, error = $5,
                output = $6, output_truncated = $7, thinking_output = $8, tool_calls_json = $9,
                sdk_usage_json = $10, cost_usd = $11
            WHERE id = $12
            "#,
        )
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(encode_status(execution.status))
        .bind(execution.exit_code)
        .bind(&execution.error)
        .bind(&execution.output)
        .bind(execution.output_truncated)
        .bind(&execution.thinking_output)
        .bind(encode(&execution.tool_calls)?)
        .bind(encode_opt(&execution.sdk_usage)?)
        .bind(execution.cost_usd)
        .bind(execution.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { reason: e.to_string() })?;
        Ok(())
    }

    async fn list_executions(&self, filter: ExecutionFilter) -> Result<Vec<Execution>, StorageError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT id, task_id, started_at, completed_at, duration_ms, trigger_type,
                   trigger_context_json, status, exit_code, error, output, output_truncated,
                   thinking_output, tool_calls_json, sdk_usage_json, cost_usd
            FROM executions WHERE 1=1
            "#,
        );
        if let Some(task_id) = filter.task_id {
            builder.push(" AND task_id = ").push_bind(task_id.to_string());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(encode_status(status));
        }
        if let Some(after) = filter.started_after {
            builder.push(" AND started_at >= ").push_bind(after);
        }
        if let Some(before) = filter.started_before {
            builder.push(" AND started_at <= ").push_bind(before);
        }
        builder.push(" ORDER BY started_at DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows: Vec<ExecutionRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend { reason: e.to_string() })?;

        rows.into_iter().map(ExecutionRow::try_into_execution).collect()
    }

    async fn latest_execution_for_task(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<Execution>, StorageError> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, task_id, started_at, completed_at, duration_ms, trigger_type,
                   trigger_context_json, status, exit_code, error, output, output_truncated,
                   thinking_output, tool_calls_json, sdk_usage_json, cost_usd
            FROM executions WHERE task_id = $1 ORDER BY started_at DESC LIMIT 1
            "#,
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { reason: e.to_string() })?;

        row.map(ExecutionRow::try_into_execution).transpose()
    }

    async fn append_output(&self, id: &ExecutionId, text: &str) -> Result<(), StorageError> {
        let result =
            sqlx::query("UPDATE executions SET output = COALESCE(output, '') || $1 WHERE id = $2")
                .bind(text)
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend { reason: e.to_string() })?;
        if result.rows_affected() == 0 {
            return Err(NotFoundError::Execution { execution_id: id.to_string() }.into());
        }
        Ok(())
    }

    async fn append_thinking(&self, id: &ExecutionId, text: &str) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE executions SET thinking_output = COALESCE(thinking_output, '') || $1 WHERE id = $2",
        )
        .bind(text)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { reason: e.to_string() })?;
        if result.rows_affected() == 0 {
            return Err(NotFoundError::Execution { execution_id: id.to_string() }.into());
        }
        Ok(())
    }
}
