//! The `stdio` transport: one JSON request per line on stdin, one JSON
//! response per line on stdout. Routing is a flat `op` tag rather than a
//! verb/path pair, since there is no HTTP method to borrow one from.

use claudecron_scheduler::{
    Engine, ExecutionFilter, ExecutionStatus, HookEvent, NewTask, SchedulerError, TaskFilter, TaskKind,
    TaskPatch, TriggerKind,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    CreateTask {
        task: NewTask,
    },
    ListTasks {
        #[serde(default)]
        enabled: Option<bool>,
        #[serde(default)]
        kind: Option<TaskKind>,
        #[serde(default)]
        trigger_kind: Option<TriggerKind>,
        #[serde(default)]
        hook_event: Option<HookEvent>,
        #[serde(default)]
        name_contains: Option<String>,
    },
    GetTask {
        id: String,
    },
    UpdateTask {
        id: String,
        patch: TaskPatch,
    },
    DeleteTask {
        id: String,
    },
    ExecuteTask {
        id: String,
        #[serde(default)]
        override_conditions: bool,
    },
    ListExecutions {
        #[serde(default)]
        task_id: Option<String>,
        #[serde(default)]
        status: Option<ExecutionStatus>,
        #[serde(default)]
        limit: Option<u32>,
    },
    GetExecution {
        id: String,
    },
    GetProgress {
        id: String,
    },
    TriggerHook {
        event: String,
        #[serde(default)]
        context: serde_json::Map<String, Value>,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
enum ResponseBody {
    Ok(Value),
    Err { error: String },
}

/// Reads one [`Request`] per line from stdin, dispatches it to `engine`, and
/// writes one JSON response per line to stdout, until stdin closes or
/// `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if stdin or stdout I/O fails outright (a malformed
/// request line is reported back as a JSON error, not a transport failure).
pub async fn serve(
    engine: Arc<Engine>,
    shutdown: impl std::future::Future<Output = ()> + Send,
) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    tracing::info!("stdio transport ready");

    tokio::pin!(shutdown);
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            () = &mut shutdown => return Ok(()),
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let body = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&engine, request).await,
            Err(err) => ResponseBody::Err { error: format!("invalid request: {err}") },
        };

        let mut rendered = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
        rendered.push(b'\n');
        stdout.write_all(&rendered).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn dispatch(engine: &Arc<Engine>, request: Request) -> ResponseBody {
    match request {
        Request::CreateTask { task } => to_body(engine.create_task(task).await.map(|t| json!(t))),
        Request::ListTasks { enabled, kind, trigger_kind, hook_event, name_contains } => {
            let filter = TaskFilter { enabled, kind, trigger_kind, hook_event, name_contains };
            to_body(engine.list_tasks(filter).await.map(|t| json!(t)))
        }
        Request::GetTask { id } => match id.parse() {
            Ok(id) => to_body(engine.get_task(&id).await.map(|t| json!(t))),
            Err(_) => invalid_id(),
        },
        Request::UpdateTask { id, patch } => match id.parse() {
            Ok(id) => to_body(engine.update_task(&id, patch).await.map(|t| json!(t))),
            Err(_) => invalid_id(),
        },
        Request::DeleteTask { id } => match id.parse() {
            Ok(id) => to_body(engine.delete_task(&id).await.map(|()| json!({"deleted": true}))),
            Err(_) => invalid_id(),
        },
        Request::ExecuteTask { id, override_conditions } => match id.parse() {
            Ok(id) => {
                to_body(engine.execute(id, "manual", None, override_conditions).await.map(|e| json!(e)))
            }
            Err(_) => invalid_id(),
        },
        Request::ListExecutions { task_id, status, limit } => {
            let task_id = match task_id.map(|v| v.parse()).transpose() {
                Ok(id) => id,
                Err(_) => return invalid_id(),
            };
            let filter =
                ExecutionFilter { task_id, status, started_after: None, started_before: None, limit };
            to_body(engine.list_executions(filter).await.map(|e| json!(e)))
        }
        Request::GetExecution { id } => match id.parse() {
            Ok(id) => to_body(engine.get_execution(&id).await.map(|e| json!(e))),
            Err(_) => invalid_id(),
        },
        Request::GetProgress { id } => match id.parse() {
            Ok(id) => to_body(engine.get_progress(&id).await.map(|e| json!(e))),
            Err(_) => invalid_id(),
        },
        Request::TriggerHook { event, context } => match claudecron_scheduler::HookEvent::parse(&event) {
            Ok(event) => {
                engine.handle_hook_event(event, context.into_iter().collect()).await;
                ResponseBody::Ok(json!({"accepted": true}))
            }
            Err(_) => ResponseBody::Err { error: "unknown hook event".to_string() },
        },
    }
}

fn invalid_id() -> ResponseBody {
    ResponseBody::Err { error: "invalid id".to_string() }
}

fn to_body(result: Result<Value, SchedulerError>) -> ResponseBody {
    match result {
        Ok(value) => ResponseBody::Ok(value),
        Err(err) => ResponseBody::Err { error: err.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_tasks_request() {
        let line = r#"{"op": "list_tasks", "enabled": true}"#;
        let request: Request = serde_json::from_str(line).unwrap();
        assert!(matches!(request, Request::ListTasks { enabled: Some(true), .. }));
    }

    #[test]
    fn parses_trigger_hook_request() {
        let line = r#"{"op": "trigger_hook", "event": "PostToolUse", "context": {"file_path": "/tmp/x"}}"#;
        let request: Request = serde_json::from_str(line).unwrap();
        match request {
            Request::TriggerHook { event, context } => {
                assert_eq!(event, "PostToolUse");
                assert_eq!(context.get("file_path").and_then(Value::as_str), Some("/tmp/x"));
            }
            _ => panic!("expected TriggerHook"),
        }
    }

    #[test]
    fn rejects_unknown_op() {
        let line = r#"{"op": "not_a_real_op"}"#;
        assert!(serde_json::from_str::<Request>(line).is_err());
    }
}
