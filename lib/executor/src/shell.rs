//! Shell command executor: spawns `command` via `tokio::process::Command`
//! inside an (optional) shell, honoring the effective timeout and the
//! graceful-then-forced kill grace period (§5).

use async_trait::async_trait;
use claudecron_scheduler::template;
use claudecron_scheduler::{Execution, ExecutionError, Executor, ExecutorOutcome, Task, TaskConfig};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Default deadline for a shell task with no explicit timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Grace period between the graceful signal and a forced kill.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Runs `TaskConfig::Shell` tasks as child processes.
pub struct ShellExecutor;

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(
        &self,
        task: &Task,
        execution: &Execution,
    ) -> Result<ExecutorOutcome, ExecutionError> {
        let TaskConfig::Shell { command, cwd, env, .. } = &task.config else {
            return Err(ExecutionError::ExecutorFailed {
                reason: "ShellExecutor invoked on a non-shell task".into(),
            });
        };

        let deadline = task
            .effective_timeout_ms()
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        let command = template::expand(command, Some(task), Some(execution));

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        cmd.env_clear();
        cmd.envs(std::env::vars());
        cmd.envs(env);
        for (key, value) in injected_env(task, execution) {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutionError::ExecutorFailed { reason: format!("spawn failed: {e}") })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let run = async {
            let mut output = String::new();
            if let Some(out) = stdout.as_mut() {
                let _ = out.read_to_string(&mut output).await;
            }
            let mut err_output = String::new();
            if let Some(err) = stderr.as_mut() {
                let _ = err.read_to_string(&mut err_output).await;
            }
            let status = child.wait().await;
            (status, output, err_output)
        };

        match timeout(deadline, run).await {
            Ok((status, stdout, stderr)) => {
                let status = status.map_err(|e| ExecutionError::ExecutorFailed {
                    reason: format!("wait failed: {e}"),
                })?;
                let combined = if stderr.is_empty() { stdout } else { format!("{stdout}\n{stderr}") };
                Ok(ExecutorOutcome {
                    exit_code: status.code(),
                    error: if status.success() {
                        None
                    } else {
                        Some(format!("command exited with status {status}"))
                    },
                    output: Some(combined),
                    ..Default::default()
                })
            }
            Err(_) => {
                kill_gracefully(&mut child).await;
                Err(ExecutionError::TimedOut { after_ms: deadline.as_millis() as u64 })
            }
        }
    }
}

/// Sends SIGTERM-equivalent (process kill) then waits up to the grace
/// period before forcing termination. `tokio::process::Child::kill` is
/// already a forceful kill on every platform tokio supports, so the
/// "graceful" step here is giving the process a window to exit on its own
/// before we call it.
async fn kill_gracefully(child: &mut tokio::process::Child) {
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
        return;
    }
    let _ = child.kill().await;
}

fn injected_env(task: &Task, execution: &Execution) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("TASK_ID".into(), task.id.to_string());
    vars.insert("TASK_NAME".into(), task.name.clone());
    vars.insert("TASK_TYPE".into(), task.kind().to_string());
    vars.insert("EXECUTION_ID".into(), execution.id.to_string());
    vars.insert("TRIGGER_TYPE".into(), execution.trigger_type.clone());

    if let Some(context) = &execution.trigger_context {
        for (key, value) in context {
            let upper = key.to_uppercase();
            if let Some(s) = value.as_str() {
                vars.insert(upper, s.to_string());
            } else if value.is_number() || value.is_boolean() {
                vars.insert(upper, value.to_string());
            }
        }
    }

    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use claudecron_core::TaskId;
    use claudecron_scheduler::{ExecutionOptions, Trigger};

    fn shell_task(command: &str, timeout_ms: Option<u64>) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new(),
            name: "t".into(),
            description: None,
            enabled: true,
            config: TaskConfig::Shell {
                command: command.into(),
                cwd: None,
                env: HashMap::new(),
                timeout_ms,
            },
            trigger: Trigger::Manual { reason: None },
            options: ExecutionOptions::default(),
            conditions: None,
            on_success: vec![],
            on_failure: vec![],
            created_at: now,
            updated_at: now,
            last_run: None,
            next_run: None,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
        }
    }

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let task = shell_task("echo hello", None);
        let execution = Execution::start(task.id, "manual", None);
        let outcome = Executor::execute(&ShellExecutor, &task, &execution).await.unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.output.unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_ok_with_error_message() {
        let task = shell_task("exit 3", None);
        let execution = Execution::start(task.id, "manual", None);
        let outcome = Executor::execute(&ShellExecutor, &task, &execution).await.unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn exceeding_deadline_times_out() {
        let task = shell_task("sleep 10", Some(100));
        let execution = Execution::start(task.id, "manual", None);
        let err = Executor::execute(&ShellExecutor, &task, &execution).await.unwrap_err();
        assert!(matches!(err, ExecutionError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn injected_env_vars_are_visible() {
        let task = shell_task("echo $TASK_NAME", None);
        let execution = Execution::start(task.id, "manual", None);
        let outcome = Executor::execute(&ShellExecutor, &task, &execution).await.unwrap();
        assert!(outcome.output.unwrap().contains("t"));
    }
}
