//! The durable declarative unit: [`Task`], its trigger, kind-specific
//! configuration, execution options, pre-run conditions, and result
//! handlers.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use claudecron_core::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Task kind discriminator, derived from [`TaskConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Shell,
    AiPrompt,
    SlashCommand,
    Subagent,
    ToolInvocation,
    GenericAiQuery,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Shell => "shell",
            Self::AiPrompt => "ai_prompt",
            Self::SlashCommand => "slash_command",
            Self::Subagent => "subagent",
            Self::ToolInvocation => "tool_invocation",
            Self::GenericAiQuery => "generic_ai_query",
        };
        write!(f, "{s}")
    }
}

/// Kind-specific task configuration. The tag IS the kind discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskConfig {
    Shell {
        command: String,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    AiPrompt {
        prompt: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        tool_allowlist: Vec<String>,
        #[serde(default)]
        inherit_context: bool,
    },
    SlashCommand {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Subagent {
        name: String,
        prompt: String,
    },
    ToolInvocation {
        tool_name: String,
        #[serde(default)]
        input: JsonValue,
    },
    GenericAiQuery {
        query: String,
        #[serde(default)]
        model: Option<String>,
    },
}

impl TaskConfig {
    /// Returns the kind discriminator for this configuration.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Shell { .. } => TaskKind::Shell,
            Self::AiPrompt { .. } => TaskKind::AiPrompt,
            Self::SlashCommand { .. } => TaskKind::SlashCommand,
            Self::Subagent { .. } => TaskKind::Subagent,
            Self::ToolInvocation { .. } => TaskKind::ToolInvocation,
            Self::GenericAiQuery { .. } => TaskKind::GenericAiQuery,
        }
    }
}

/// Join predicate for `dependency` triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    RequireAll,
    RequireAny,
}

/// The closed set of externally-injected hook event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HookEvent {
    SessionStart,
    SessionEnd,
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    Notification,
    Stop,
    SubagentStop,
    PreCompact,
}

impl HookEvent {
    /// Parses an event name, matching the spec's closed set.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownHookEvent`] for anything else.
    pub fn parse(name: &str) -> Result<Self, ValidationError> {
        Ok(match name {
            "SessionStart" => Self::SessionStart,
            "SessionEnd" => Self::SessionEnd,
            "PreToolUse" => Self::PreToolUse,
            "PostToolUse" => Self::PostToolUse,
            "UserPromptSubmit" => Self::UserPromptSubmit,
            "Notification" => Self::Notification,
            "Stop" => Self::Stop,
            "SubagentStop" => Self::SubagentStop,
            "PreCompact" => Self::PreCompact,
            other => {
                return Err(ValidationError::UnknownHookEvent {
                    event: other.to_string(),
                });
            }
        })
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Conditions that gate which hook events a hook trigger matches, beyond
/// the event name and matcher regex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConditions {
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default)]
    pub file_pattern: Option<String>,
    #[serde(default)]
    pub tool_names: Vec<String>,
    #[serde(default)]
    pub subagent_names: Vec<String>,
}

/// The tagged variant describing what fires a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Schedule {
        cron: String,
        #[serde(default)]
        tz: Option<String>,
    },
    Interval {
        every: String,
        #[serde(default)]
        start: Option<DateTime<Utc>>,
    },
    FileWatch {
        path: String,
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        debounce: Option<String>,
    },
    Hook {
        event: HookEvent,
        #[serde(default)]
        matcher: Option<String>,
        #[serde(default)]
        conditions: Option<HookConditions>,
        #[serde(default)]
        debounce: Option<String>,
    },
    Dependency {
        parent_ids: Vec<TaskId>,
        #[serde(default)]
        join: JoinMode,
        #[serde(default)]
        debounce: Option<String>,
    },
    Manual {
        #[serde(default)]
        reason: Option<String>,
    },
    SmartSchedule {
        nl_description: String,
        #[serde(default)]
        constraints: JsonValue,
        fallback_cron: String,
        #[serde(default)]
        computed_cron: Option<String>,
        #[serde(default)]
        last_optimized: Option<DateTime<Utc>>,
    },
}

impl Trigger {
    /// True for triggers the engine wires into a live timer/watcher
    /// (`next_run` must track these; see the §3 invariant).
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Schedule { .. } | Self::Interval { .. } | Self::SmartSchedule { .. })
    }

    /// The kind discriminator, used by `TaskFilter::trigger_kind`.
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Schedule { .. } => TriggerKind::Schedule,
            Self::Interval { .. } => TriggerKind::Interval,
            Self::FileWatch { .. } => TriggerKind::FileWatch,
            Self::Hook { .. } => TriggerKind::Hook,
            Self::Dependency { .. } => TriggerKind::Dependency,
            Self::Manual { .. } => TriggerKind::Manual,
            Self::SmartSchedule { .. } => TriggerKind::SmartSchedule,
        }
    }
}

/// Trigger kind discriminator, derived from [`Trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule,
    Interval,
    FileWatch,
    Hook,
    Dependency,
    Manual,
    SmartSchedule,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Schedule => "schedule",
            Self::Interval => "interval",
            Self::FileWatch => "file_watch",
            Self::Hook => "hook",
            Self::Dependency => "dependency",
            Self::Manual => "manual",
            Self::SmartSchedule => "smart_schedule",
        };
        write!(f, "{s}")
    }
}

/// Backoff strategy for a task's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Linear,
    Exponential,
}

/// Which terminal statuses qualify a failed execution for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAcceptSet {
    All,
    Error,
    Timeout,
}

/// A task's retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default = "default_accept_set")]
    pub retry_on: RetryAcceptSet,
}

fn default_accept_set() -> RetryAcceptSet {
    RetryAcceptSet::All
}

/// Execution-time options that are not trigger- or kind-specific.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOptions {
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub extra_dirs: Vec<String>,
    #[serde(default)]
    pub context_sources: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

/// Comparison operator for custom `skip_if`/`only_if` conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A custom boolean condition: run a shell command, compare trimmed stdout
/// to `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCondition {
    pub command: String,
    pub operator: ComparisonOperator,
    pub value: String,
}

/// Pre-execution gate set, evaluated in the fixed order documented on
/// [`crate::condition::ConditionEvaluator`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default)]
    pub time_window_start: Option<String>,
    #[serde(default)]
    pub time_window_end: Option<String>,
    #[serde(default)]
    pub time_window_tz: Option<String>,
    #[serde(default)]
    pub holiday_region: Option<String>,
    #[serde(default)]
    pub only_if_file_exists: Option<String>,
    #[serde(default)]
    pub skip_if_file_exists: Option<String>,
    #[serde(default)]
    pub only_if_git_dirty: bool,
    #[serde(default)]
    pub skip_if: Option<CustomCondition>,
    #[serde(default)]
    pub only_if: Option<CustomCondition>,
}

/// Severity of a `notify` handler message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// HTTP method used by a `webhook` handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
}

/// A post-run side effect declared on a task's `on_success`/`on_failure`
/// lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultHandler {
    Notify {
        message: String,
        #[serde(default)]
        urgency: Urgency,
    },
    File {
        path: String,
        #[serde(default)]
        append: bool,
        #[serde(default)]
        format_hint: Option<String>,
    },
    Webhook {
        url: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    TriggerTask {
        target_task_id: TaskId,
        #[serde(default)]
        pass_context: bool,
    },
    /// Reserved marker; the RetryController handles this, it is never
    /// executed as a post-run side effect by the router itself.
    Retry,
}

impl Default for Urgency {
    fn default() -> Self {
        Self::Medium
    }
}

impl Default for HttpMethod {
    fn default() -> Self {
        Self::Post
    }
}

/// The durable declarative unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub enabled: bool,
    pub config: TaskConfig,
    pub trigger: Trigger,
    #[serde(default)]
    pub options: ExecutionOptions,
    #[serde(default)]
    pub conditions: Option<Conditions>,
    #[serde(default)]
    pub on_success: Vec<ResultHandler>,
    #[serde(default)]
    pub on_failure: Vec<ResultHandler>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
}

impl Task {
    /// The kind discriminator, derived from `config`.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.config.kind()
    }

    /// The effective per-execution timeout: kind-specific config timeout
    /// if present, else `options.timeout_ms`, else `None` (the executor
    /// supplies its own component-specific default).
    #[must_use]
    pub fn effective_timeout_ms(&self) -> Option<u64> {
        if let TaskConfig::Shell { timeout_ms, .. } = &self.config {
            if let Some(t) = timeout_ms {
                return Some(*t);
            }
        }
        self.options.timeout_ms
    }
}

/// Fields accepted for creating a new task; `id`/`created_at`/`updated_at`/
/// counters are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub config: TaskConfig,
    pub trigger: Trigger,
    #[serde(default)]
    pub options: ExecutionOptions,
    #[serde(default)]
    pub conditions: Option<Conditions>,
    #[serde(default)]
    pub on_success: Vec<ResultHandler>,
    #[serde(default)]
    pub on_failure: Vec<ResultHandler>,
}

fn default_enabled() -> bool {
    true
}

/// A partial update to a task; every field is optional and only present
/// fields are merged (see `Store::update_task`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub config: Option<TaskConfig>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub options: Option<ExecutionOptions>,
    #[serde(default)]
    pub conditions: Option<Option<Conditions>>,
    #[serde(default)]
    pub on_success: Option<Vec<ResultHandler>>,
    #[serde(default)]
    pub on_failure: Option<Vec<ResultHandler>>,
}

impl TaskPatch {
    /// True when every field is absent — applying this patch is a no-op
    /// except for bumping `updated_at` (the §8 idempotence property).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.enabled.is_none()
            && self.config.is_none()
            && self.trigger.is_none()
            && self.options.is_none()
            && self.conditions.is_none()
            && self.on_success.is_none()
            && self.on_failure.is_none()
    }

    /// True when this patch would change whether/how the task is wired
    /// into a trigger source (reschedule is required).
    #[must_use]
    pub fn changes_scheduling(&self) -> bool {
        self.enabled.is_some() || self.trigger.is_some()
    }
}
