//! `hook` trigger source (§4.6): the sole entry point for externally
//! injected lifecycle events (`SessionStart`, `PreToolUse`, ...).

use crate::dispatch::{Dispatch, DispatchOrigin};
use crate::execution::TriggerContext;
use crate::model::{HookConditions, HookEvent};
use chrono::{Duration, Utc};
use claudecron_core::TaskId;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

/// One hook-triggered task's wiring, pre-compiled at registration time.
pub struct HookRegistration {
    pub task_id: TaskId,
    pub event: HookEvent,
    pub matcher: Option<Regex>,
    pub conditions: Option<HookConditions>,
    pub condition_file_pattern: Option<Regex>,
    pub debounce: Option<Duration>,
}

/// Routes incoming hook events to the tasks registered against them,
/// after enrichment, matching, and per-`(task, event)` debounce.
pub struct HookRouter {
    registrations: Vec<HookRegistration>,
    dispatch: Arc<dyn Dispatch>,
    pending: Mutex<HashMap<(TaskId, HookEvent), oneshot::Sender<()>>>,
}

impl HookRouter {
    #[must_use]
    pub fn new(dispatch: Arc<dyn Dispatch>) -> Self {
        Self {
            registrations: Vec::new(),
            dispatch,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, registration: HookRegistration) {
        self.registrations.push(registration);
    }

    /// Handles one incoming `(event, context)` pair: enrich, match every
    /// registration, then fire immediately or (re)arm a debounce timer.
    pub async fn route(&self, event: HookEvent, context: TriggerContext) {
        let enriched = enrich(event, context).await;

        for registration in &self.registrations {
            if registration.event != event {
                continue;
            }
            if !matches(registration, &enriched) {
                continue;
            }
            self.fire_or_debounce(registration, enriched.clone()).await;
        }
    }

    async fn fire_or_debounce(&self, registration: &HookRegistration, context: TriggerContext) {
        let Some(debounce) = registration.debounce else {
            self.fire(registration.task_id, context).await;
            return;
        };
        if debounce <= Duration::zero() {
            self.fire(registration.task_id, context).await;
            return;
        }

        let key = (registration.task_id, registration.event);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        if let Some(previous) = self.pending.lock().await.insert(key, cancel_tx) {
            let _ = previous.send(());
        }

        let dispatch = self.dispatch.clone();
        let task_id = registration.task_id;
        let delay = debounce.to_std().unwrap_or(std::time::Duration::ZERO);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    if let Err(err) = dispatch
                        .dispatch(task_id, DispatchOrigin::Hook, Some(context))
                        .await
                    {
                        warn!(task = %task_id, error = %err, "hook dispatch failed");
                    }
                }
                _ = &mut cancel_rx => {}
            }
        });
    }

    async fn fire(&self, task_id: TaskId, context: TriggerContext) {
        if let Err(err) = self
            .dispatch
            .dispatch(task_id, DispatchOrigin::Hook, Some(context))
            .await
        {
            warn!(task = %task_id, error = %err, "hook dispatch failed");
        }
    }
}

fn matches(registration: &HookRegistration, context: &TriggerContext) -> bool {
    if let Some(matcher) = &registration.matcher {
        if let Some(JsonValue::String(tool_name)) = context.get("tool_name") {
            if !matcher.is_match(tool_name) {
                return false;
            }
        }
    }

    let Some(conditions) = &registration.conditions else {
        return true;
    };

    if !conditions.source.is_empty() {
        if let Some(JsonValue::String(source)) = context.get("source") {
            if !conditions.source.iter().any(|s| s == source) {
                return false;
            }
        }
    }
    if let Some(pattern) = &registration.condition_file_pattern {
        if let Some(JsonValue::String(file_path)) = context.get("file_path") {
            if !full_match(pattern, file_path) {
                return false;
            }
        }
    }
    if !conditions.tool_names.is_empty() {
        if let Some(JsonValue::String(tool_name)) = context.get("tool_name") {
            if !conditions.tool_names.iter().any(|t| t == tool_name) {
                return false;
            }
        }
    }
    if !conditions.subagent_names.is_empty() {
        if let Some(JsonValue::String(subagent_name)) = context.get("subagent_name") {
            if !conditions.subagent_names.iter().any(|s| s == subagent_name) {
                return false;
            }
        }
    }

    true
}

fn full_match(re: &Regex, text: &str) -> bool {
    re.find(text).is_some_and(|m| m.start() == 0 && m.end() == text.len())
}

async fn enrich(event: HookEvent, mut context: TriggerContext) -> TriggerContext {
    context
        .entry("session_id".to_string())
        .or_insert_with(|| JsonValue::String(ambient_session_id()));
    context
        .entry("timestamp".to_string())
        .or_insert_with(|| JsonValue::String(Utc::now().to_rfc3339()));

    let carries_file = matches!(event, HookEvent::PreToolUse | HookEvent::PostToolUse)
        && context.contains_key("file_path");
    if carries_file {
        if let Ok(branch) = git_branch().await {
            context.insert("git_branch".to_string(), JsonValue::String(branch));
        }
        if let Ok(dirty) = git_dirty().await {
            context.insert("git_dirty".to_string(), JsonValue::Bool(dirty));
        }
    }

    context
}

fn ambient_session_id() -> String {
    std::env::var("CLAUDE_SESSION_ID").unwrap_or_else(|_| "unknown".to_string())
}

async fn git_branch() -> Result<String, std::io::Error> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .await?;
    if !output.status.success() {
        return Err(std::io::Error::other("git rev-parse failed"));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn git_dirty() -> Result<bool, std::io::Error> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .await?;
    if !output.status.success() {
        return Err(std::io::Error::other("git status failed"));
    }
    Ok(!output.stdout.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::execution::Execution;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingDispatch(Arc<AtomicU32>);

    #[async_trait]
    impl Dispatch for CountingDispatch {
        async fn dispatch(
            &self,
            task_id: TaskId,
            _origin: DispatchOrigin,
            _context: Option<TriggerContext>,
        ) -> Result<Execution, SchedulerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Execution::skipped(task_id, "hook", None))
        }
    }

    #[tokio::test]
    async fn fires_immediately_without_debounce() {
        let count = Arc::new(AtomicU32::new(0));
        let mut router = HookRouter::new(Arc::new(CountingDispatch(count.clone())));
        let task_id = TaskId::new();
        router.register(HookRegistration {
            task_id,
            event: HookEvent::Stop,
            matcher: None,
            conditions: None,
            condition_file_pattern: None,
            debounce: None,
        });
        router.route(HookEvent::Stop, TriggerContext::new()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_event_does_not_fire() {
        let count = Arc::new(AtomicU32::new(0));
        let mut router = HookRouter::new(Arc::new(CountingDispatch(count.clone())));
        router.register(HookRegistration {
            task_id: TaskId::new(),
            event: HookEvent::Stop,
            matcher: None,
            conditions: None,
            condition_file_pattern: None,
            debounce: None,
        });
        router.route(HookEvent::SessionStart, TriggerContext::new()).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn matcher_regex_gates_by_tool_name() {
        let count = Arc::new(AtomicU32::new(0));
        let mut router = HookRouter::new(Arc::new(CountingDispatch(count.clone())));
        router.register(HookRegistration {
            task_id: TaskId::new(),
            event: HookEvent::PreToolUse,
            matcher: Some(Regex::new("^Bash$").unwrap()),
            conditions: None,
            condition_file_pattern: None,
            debounce: None,
        });
        let mut context = TriggerContext::new();
        context.insert("tool_name".to_string(), JsonValue::String("Edit".to_string()));
        router.route(HookEvent::PreToolUse, context).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn debounce_collapses_rapid_events_into_one_fire() {
        let count = Arc::new(AtomicU32::new(0));
        let mut router = HookRouter::new(Arc::new(CountingDispatch(count.clone())));
        let task_id = TaskId::new();
        router.register(HookRegistration {
            task_id,
            event: HookEvent::Notification,
            matcher: None,
            conditions: None,
            condition_file_pattern: None,
            debounce: Some(Duration::milliseconds(30)),
        });
        for _ in 0..3 {
            router.route(HookEvent::Notification, TriggerContext::new()).await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn enrichment_fills_missing_session_id() {
        let context = futures::executor::block_on(enrich(HookEvent::Stop, TriggerContext::new()));
        assert_eq!(context.get("session_id"), Some(&JsonValue::String(ambient_session_id())));
    }
}
