//! The five AI-kind executors (`ai_prompt`, `slash_command`, `subagent`,
//! `tool_invocation`, `generic_ai_query`): each builds a prompt from its
//! task config and delegates to a shared [`LlmBackend`], the way
//! `smart_schedule.rs`'s resolver issues its "internal subagent query".
//!
//! No hosted-model wire protocol is implemented here; `LlmBackend` is the
//! seam a real provider integration plugs into.

use async_trait::async_trait;
use claudecron_ai::backend::LlmBackend;
use claudecron_ai::llm_call::LlmCall;
use claudecron_scheduler::template;
use claudecron_scheduler::{
    Execution, ExecutionError, Executor, ExecutorOutcome, SdkUsage, Task, TaskConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Default deadline for every AI-kind task with no explicit timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs `ai_prompt`/`slash_command`/`subagent`/`tool_invocation`/
/// `generic_ai_query` tasks against a single shared backend.
pub struct AiExecutor {
    backend: Arc<dyn LlmBackend>,
}

impl AiExecutor {
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Executor for AiExecutor {
    async fn execute(
        &self,
        task: &Task,
        execution: &Execution,
    ) -> Result<ExecutorOutcome, ExecutionError> {
        let call = build_call(task, execution)?;
        let request = call.build_request();

        let deadline = task
            .effective_timeout_ms()
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        let response = match timeout(deadline, self.backend.generate(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                return Ok(ExecutorOutcome {
                    exit_code: None,
                    error: Some(err.to_string()),
                    ..Default::default()
                });
            }
            Err(_) => return Err(ExecutionError::TimedOut { after_ms: deadline.as_millis() as u64 }),
        };

        Ok(ExecutorOutcome {
            exit_code: Some(0),
            error: None,
            output: Some(response.content),
            output_truncated: false,
            thinking_output: None,
            tool_calls: Vec::new(),
            sdk_usage: Some(SdkUsage {
                input_tokens: u64::from(response.usage.input_tokens),
                output_tokens: u64::from(response.usage.output_tokens),
                cache_tokens: 0,
            }),
            cost_usd: None,
        })
    }
}

/// Builds the `LlmCall` for `task`'s kind, expanding `{{...}}` placeholders
/// in any free-text field the way handler messages are expanded.
fn build_call(task: &Task, execution: &Execution) -> Result<LlmCall, ExecutionError> {
    let expand = |s: &str| template::expand(s, Some(task), Some(execution));

    Ok(match &task.config {
        TaskConfig::AiPrompt { prompt, .. } => LlmCall::new(expand(prompt)),
        TaskConfig::SlashCommand { command, args } => {
            let joined = if args.is_empty() {
                command.clone()
            } else {
                format!("{command} {}", args.join(" "))
            };
            LlmCall::new(expand(&joined)).with_system_prompt(
                "Interpret the following as a slash command invocation and carry it out.",
            )
        }
        TaskConfig::Subagent { name, prompt } => LlmCall::new(expand(prompt))
            .with_system_prompt(format!("You are the '{name}' subagent.")),
        TaskConfig::ToolInvocation { tool_name, input } => LlmCall::new(format!(
            "Invoke tool '{tool_name}' with input: {input}"
        )),
        TaskConfig::GenericAiQuery { query, .. } => LlmCall::new(expand(query)),
        TaskConfig::Shell { .. } => {
            return Err(ExecutionError::ExecutorFailed {
                reason: "AiExecutor invoked on a shell task".into(),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use claudecron_ai::backend::{LlmProvider, LlmRequest, LlmResponse, TokenUsage};
    use claudecron_ai::error::LlmError;
    use claudecron_core::TaskId;
    use claudecron_scheduler::{ExecutionOptions, Trigger};
    use std::collections::HashMap;

    struct StubBackend {
        content: String,
    }

    #[async_trait]
    impl LlmBackend for StubBackend {
        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: self.content.clone(),
                structured_output: None,
                usage: TokenUsage { input_tokens: 10, output_tokens: 5 },
                model: "stub".into(),
            })
        }
        fn provider(&self) -> LlmProvider {
            LlmProvider::Ollama
        }
        fn model(&self) -> &str {
            "stub"
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl LlmBackend for FailingBackend {
        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Err(LlmError::RequestFailed { reason: "boom".into() })
        }
        fn provider(&self) -> LlmProvider {
            LlmProvider::Ollama
        }
        fn model(&self) -> &str {
            "stub"
        }
    }

    fn ai_task(config: TaskConfig) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new(),
            name: "t".into(),
            description: None,
            enabled: true,
            config,
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
    async fn ai_prompt_returns_backend_content() {
        let executor = AiExecutor::new(Arc::new(StubBackend { content: "hi there".into() }));
        let task = ai_task(TaskConfig::AiPrompt {
            prompt: "say hi".into(),
            model: None,
            tool_allowlist: vec![],
            inherit_context: false,
        });
        let execution = Execution::start(task.id, "manual", None);
        let outcome = executor.execute(&task, &execution).await.unwrap();
        assert_eq!(outcome.output.as_deref(), Some("hi there"));
        assert_eq!(outcome.sdk_usage.unwrap().input_tokens, 10);
    }

    #[tokio::test]
    async fn backend_failure_is_ok_outcome_with_error() {
        let executor = AiExecutor::new(Arc::new(FailingBackend));
        let task = ai_task(TaskConfig::GenericAiQuery { query: "q".into(), model: None });
        let execution = Execution::start(task.id, "manual", None);
        let outcome = executor.execute(&task, &execution).await.unwrap();
        assert!(outcome.error.unwrap().contains("boom"));
        assert!(outcome.exit_code.is_none());
    }

    #[tokio::test]
    async fn tool_invocation_embeds_input_in_prompt() {
        let executor = AiExecutor::new(Arc::new(StubBackend { content: "done".into() }));
        let task = ai_task(TaskConfig::ToolInvocation {
            tool_name: "search".into(),
            input: serde_json::json!({"q": "rust"}),
        });
        let execution = Execution::start(task.id, "manual", None);
        let outcome = executor.execute(&task, &execution).await.unwrap();
        assert_eq!(outcome.output.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn shell_task_is_rejected() {
        let executor = AiExecutor::new(Arc::new(StubBackend { content: "x".into() }));
        let task = ai_task(TaskConfig::Shell {
            command: "true".into(),
            cwd: None,
            env: HashMap::new(),
            timeout_ms: None,
        });
        let execution = Execution::start(task.id, "manual", None);
        let err = executor.execute(&task, &execution).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ExecutorFailed { .. }));
    }
}
