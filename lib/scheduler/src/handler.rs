//! `ResultHandlerRouter` (§4.10): runs a task's declared `on_success`/
//! `on_failure` handlers sequentially in declaration order, after template
//! expansion. The webhook client reuses the teacher's `reqwest` dependency
//! rather than adding a new HTTP crate.

use crate::dispatch::{Dispatch, DispatchOrigin};
use crate::error::HandlerError;
use crate::execution::{Execution, TriggerContext};
use crate::model::{HttpMethod, ResultHandler, Task, Urgency};
use crate::template;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const WEBHOOK_RETRY_ATTEMPTS: u32 = 3;
const WEBHOOK_PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "claudecron/1.0";
const PARENT_OUTPUT_TRUNCATE_LEN: usize = 1000;

/// Runs result handlers declared on a task. Holds no per-task state; one
/// instance serves the whole engine.
pub struct ResultHandlerRouter {
    http: Client,
    dispatch: Arc<dyn Dispatch>,
}

impl ResultHandlerRouter {
    #[must_use]
    pub fn new(dispatch: Arc<dyn Dispatch>) -> Self {
        Self { http: Client::new(), dispatch }
    }

    /// Runs every handler in `handlers` in order. Each failure is logged
    /// and does not abort the rest of the list (§7: `HandlerFailure`
    /// never fails the enclosing execution).
    pub async fn run(&self, handlers: &[ResultHandler], task: &Task, execution: &Execution) {
        for handler in handlers {
            if let Err(err) = self.run_one(handler, task, execution).await {
                warn!(task = %task.id, execution = %execution.id, error = %err, "result handler failed");
            }
        }
    }

    async fn run_one(
        &self,
        handler: &ResultHandler,
        task: &Task,
        execution: &Execution,
    ) -> Result<(), HandlerError> {
        match handler {
            ResultHandler::Notify { message, urgency } => {
                self.notify(*urgency, message, task, execution);
                Ok(())
            }
            ResultHandler::File { path, append, .. } => self.write_file(path, *append, task, execution),
            ResultHandler::Webhook { url, method, headers } => {
                self.webhook(url, *method, headers, task, execution).await
            }
            ResultHandler::TriggerTask { target_task_id, pass_context } => {
                self.trigger_task(*target_task_id, *pass_context, execution).await
            }
            ResultHandler::Retry => Ok(()),
        }
    }

    fn notify(&self, urgency: Urgency, message: &str, task: &Task, execution: &Execution) {
        let prefix = match urgency {
            Urgency::Low => "-",
            Urgency::Medium => "!",
            Urgency::High => "!!!",
        };
        let expanded = template::expand(message, Some(task), Some(execution));
        tracing::info!(
            target: "claudecron::notify",
            task_id = %task.id,
            task_name = %task.name,
            status = %execution.status,
            "[{prefix}] {} {expanded}",
            Utc::now().to_rfc3339(),
        );
    }

    fn write_file(
        &self,
        path: &str,
        append: bool,
        task: &Task,
        execution: &Execution,
    ) -> Result<(), HandlerError> {
        let expanded_path = template::expand(path, Some(task), Some(execution));
        let err = |reason: String| HandlerError::FileWrite {
            path: expanded_path.clone(),
            reason,
        };

        let path = std::path::Path::new(&expanded_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| err(e.to_string()))?;
            }
        }

        let body = execution.output.clone().unwrap_or_default();
        if append {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| err(e.to_string()))?;
            writeln!(file, "{body}").map_err(|e| err(e.to_string()))?;
        } else {
            std::fs::write(path, body).map_err(|e| err(e.to_string()))?;
        }
        Ok(())
    }

    async fn webhook(
        &self,
        url: &str,
        method: HttpMethod,
        headers: &std::collections::HashMap<String, String>,
        task: &Task,
        execution: &Execution,
    ) -> Result<(), HandlerError> {
        let expanded_url = template::expand(url, Some(task), Some(execution));
        let payload = webhook_payload(task, execution);

        let mut last_error = String::new();
        for attempt in 0..WEBHOOK_RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
            }

            let mut request = match method {
                HttpMethod::Post => self.http.post(&expanded_url),
                HttpMethod::Put => self.http.put(&expanded_url),
            }
            .timeout(WEBHOOK_PER_ATTEMPT_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT);

            for (key, value) in headers {
                request = request.header(key, value);
            }

            match request.json(&payload).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => last_error = format!("http status {}", response.status()),
                Err(err) if err.is_timeout() => {
                    return Err(HandlerError::Webhook {
                        url: expanded_url,
                        reason: "request timed out".to_string(),
                    });
                }
                Err(err) => last_error = err.to_string(),
            }
        }

        Err(HandlerError::Webhook { url: expanded_url, reason: last_error })
    }

    async fn trigger_task(
        &self,
        target_task_id: claudecron_core::TaskId,
        pass_context: bool,
        execution: &Execution,
    ) -> Result<(), HandlerError> {
        let context = if pass_context {
            let mut context = TriggerContext::new();
            context.insert(
                "parent_output".to_string(),
                JsonValue::String(truncate_output(execution.output.as_deref().unwrap_or(""))),
            );
            Some(context)
        } else {
            None
        };

        self.dispatch
            .dispatch(target_task_id, DispatchOrigin::Triggered, context)
            .await
            .map(|_| ())
            .map_err(|err| HandlerError::TriggerTask {
                task_id: target_task_id.to_string(),
                reason: err.to_string(),
            })
    }
}

fn truncate_output(output: &str) -> String {
    if output.len() <= PARENT_OUTPUT_TRUNCATE_LEN {
        output.to_string()
    } else {
        let mut truncated = output.chars().take(PARENT_OUTPUT_TRUNCATE_LEN).collect::<String>();
        truncated.push_str("... [truncated]");
        truncated
    }
}

fn webhook_payload(task: &Task, execution: &Execution) -> JsonValue {
    let tool_calls: Vec<JsonValue> = execution
        .tool_calls
        .iter()
        .map(|call| {
            json!({
                "tool_name": call.tool_name,
                "success": call.success,
                "duration_ms": call.duration_ms,
                "timestamp": call.timestamp,
            })
        })
        .collect();

    json!({
        "event": "task_completed",
        "timestamp": Utc::now(),
        "task": {
            "id": task.id,
            "name": task.name,
            "kind": task.kind().to_string(),
            "description": task.description,
        },
        "execution": {
            "id": execution.id,
            "status": execution.status,
            "started_at": execution.started_at,
            "completed_at": execution.completed_at,
            "duration_ms": execution.duration_ms,
            "trigger_type": execution.trigger_type,
            "trigger_context": execution.trigger_context,
        },
        "result": {
            "output": execution.output,
            "error": execution.error,
            "exit_code": execution.exit_code,
            "output_truncated": execution.output_truncated,
        },
        "sdk_usage": execution.sdk_usage,
        "cost_usd": execution.cost_usd,
        "thinking_output": execution.thinking_output,
        "tool_calls": tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_output_leaves_short_strings_alone() {
        assert_eq!(truncate_output("short"), "short");
    }

    #[test]
    fn truncate_output_annotates_long_strings() {
        let long = "a".repeat(PARENT_OUTPUT_TRUNCATE_LEN + 50);
        let truncated = truncate_output(&long);
        assert!(truncated.ends_with("... [truncated]"));
        assert_eq!(truncated.len(), PARENT_OUTPUT_TRUNCATE_LEN + "... [truncated]".len());
    }
}
