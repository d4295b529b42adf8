//! `SmartScheduleResolver` (§4.12): resolves a `smart_schedule` trigger's
//! natural-language description into a valid cron string, caching the
//! result on the task for 24 hours.
//!
//! "Internal subagent query" is `claudecron_ai::LlmBackend::generate`,
//! reusing the teacher's `LlmRequest`/`LlmResponse` shape from
//! `lib/ai/src/backend.rs`.

use crate::cron::CronSchedule;
use chrono::{DateTime, Duration, Utc};
use claudecron_ai::backend::{LlmBackend, LlmRequest};
use std::sync::Arc;
use tracing::warn;

const CACHE_TTL: Duration = Duration::hours(24);

/// Resolves `smart_schedule` triggers to a concrete cron expression.
pub struct SmartScheduleResolver {
    backend: Option<Arc<dyn LlmBackend>>,
}

impl SmartScheduleResolver {
    /// `backend = None` means AI optimization is disabled; every
    /// resolution falls back to `fallback_cron` immediately.
    #[must_use]
    pub fn new(backend: Option<Arc<dyn LlmBackend>>) -> Self {
        Self { backend }
    }

    /// Resolves to a valid cron string, and optionally the newly computed
    /// `(computed_cron, last_optimized)` pair the caller should persist.
    pub async fn resolve(
        &self,
        task_name: &str,
        nl_description: &str,
        constraints: &serde_json::Value,
        fallback_cron: &str,
        computed_cron: Option<&str>,
        last_optimized: Option<DateTime<Utc>>,
    ) -> (String, Option<(String, DateTime<Utc>)>) {
        if let (Some(cron), Some(last)) = (computed_cron, last_optimized) {
            if Utc::now() - last < CACHE_TTL {
                return (cron.to_string(), None);
            }
        }

        let Some(backend) = &self.backend else {
            return (fallback_cron.to_string(), None);
        };

        let prompt = format!(
            "Task: {task_name}\nDescription: {nl_description}\nConstraints: {constraints}\n\
             Respond with a single valid 5-field cron expression and nothing else."
        );
        let request = LlmRequest::new(prompt);

        let candidate = match backend.generate(&request).await {
            Ok(response) => response.content.lines().next().unwrap_or_default().trim().to_string(),
            Err(err) => {
                warn!(task = %task_name, error = %err, "smart_schedule subagent query failed, using fallback");
                return (fallback_cron.to_string(), None);
            }
        };

        if CronSchedule::new(&candidate).is_ok() {
            let now = Utc::now();
            (candidate.clone(), Some((candidate, now)))
        } else {
            warn!(task = %task_name, candidate = %candidate, "smart_schedule subagent returned invalid cron, using fallback");
            (fallback_cron.to_string(), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use claudecron_ai::backend::{LlmProvider, LlmResponse, TokenUsage};
    use claudecron_ai::error::LlmError;

    struct StubBackend(String);

    #[async_trait]
    impl LlmBackend for StubBackend {
        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: self.0.clone(),
                structured_output: None,
                usage: TokenUsage::default(),
                model: "stub".to_string(),
            })
        }
        fn provider(&self) -> LlmProvider {
            LlmProvider::Ollama
        }
        fn model(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn disabled_backend_uses_fallback() {
        let resolver = SmartScheduleResolver::new(None);
        let (cron, persisted) = resolver
            .resolve("t", "every morning", &serde_json::Value::Null, "0 7 * * *", None, None)
            .await;
        assert_eq!(cron, "0 7 * * *");
        assert!(persisted.is_none());
    }

    #[tokio::test]
    async fn fresh_cache_is_reused_without_calling_backend() {
        let resolver = SmartScheduleResolver::new(Some(Arc::new(StubBackend("garbage".into()))));
        let (cron, persisted) = resolver
            .resolve(
                "t",
                "every morning",
                &serde_json::Value::Null,
                "0 7 * * *",
                Some("0 8 * * *"),
                Some(Utc::now()),
            )
            .await;
        assert_eq!(cron, "0 8 * * *");
        assert!(persisted.is_none());
    }

    #[tokio::test]
    async fn valid_subagent_response_is_persisted() {
        let resolver = SmartScheduleResolver::new(Some(Arc::new(StubBackend("0 9 * * 1-5".into()))));
        let (cron, persisted) = resolver
            .resolve("t", "weekdays at 9", &serde_json::Value::Null, "0 7 * * *", None, None)
            .await;
        assert_eq!(cron, "0 9 * * 1-5");
        assert!(persisted.is_some());
    }

    #[tokio::test]
    async fn invalid_subagent_response_falls_back() {
        let resolver = SmartScheduleResolver::new(Some(Arc::new(StubBackend("not a cron".into()))));
        let (cron, persisted) = resolver
            .resolve("t", "weekdays at 9", &serde_json::Value::Null, "0 7 * * *", None, None)
            .await;
        assert_eq!(cron, "0 7 * * *");
        assert!(persisted.is_none());
    }

    #[tokio::test]
    async fn stale_cache_triggers_resolution() {
        let resolver = SmartScheduleResolver::new(Some(Arc::new(StubBackend("0 9 * * *".into()))));
        let (cron, persisted) = resolver
            .resolve(
                "t",
                "every morning",
                &serde_json::Value::Null,
                "0 7 * * *",
                Some("0 8 * * *"),
                Some(Utc::now() - Duration::hours(25)),
            )
            .await;
        assert_eq!(cron, "0 9 * * *");
        assert!(persisted.is_some());
    }
}
