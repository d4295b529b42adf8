//! Bootstrap binary: loads configuration, wires up storage, executors, and
//! the engine, then serves whichever transport the config names, the way
//! `bin/server`'s `main` wires a `PgPool` and a leptos app together.

mod config;
mod transport;

use claudecron_ai::{HttpLlmBackend, LlmBackendConfig};
use claudecron_executor::{AiExecutor, ShellExecutor};
use claudecron_scheduler::{Engine, ExecutorRegistry, TaskKind};
use claudecron_store::{PostgresStore, SqliteStore};
use config::{DaemonConfig, StorageKind, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "claudecron exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let explicit_path = explicit_config_path();
    let config = DaemonConfig::load(explicit_path.as_deref())?;
    tracing::info!(?config.transport, "loaded configuration");

    let store: Arc<dyn claudecron_scheduler::Store> = match config.storage.kind {
        StorageKind::Local => {
            let path = config.storage.path.as_deref().ok_or("storage.path is required for local storage")?;
            Arc::new(SqliteStore::connect(path).await?)
        }
        StorageKind::Remote => {
            let url = config.storage.url.as_deref().ok_or("storage.url is required for remote storage")?;
            Arc::new(PostgresStore::connect(url).await?)
        }
    };

    let llm_backend = build_llm_backend()?;

    let mut executors = ExecutorRegistry::new();
    executors.register(TaskKind::Shell, Arc::new(ShellExecutor));

    if let Some(backend) = &llm_backend {
        let ai_executor: Arc<dyn claudecron_scheduler::Executor> = Arc::new(AiExecutor::new(backend.clone()));
        for kind in [
            TaskKind::AiPrompt,
            TaskKind::SlashCommand,
            TaskKind::Subagent,
            TaskKind::ToolInvocation,
            TaskKind::GenericAiQuery,
        ] {
            executors.register(kind, ai_executor.clone());
        }
    } else {
        tracing::warn!("no LLM backend configured; AI-kind tasks will fail with NoExecutor");
    }

    let engine =
        Engine::with_concurrency(store, executors, llm_backend, config.scheduler.max_concurrent_tasks);
    engine.start().await?;
    tracing::info!("engine started");

    let shutdown_signal = || async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };

    match config.transport {
        Transport::Stdio => transport::stdio::serve(engine, shutdown_signal()).await?,
        Transport::Http => {
            let http_config = config.http.ok_or("transport is \"http\" but no [http] block was configured")?;
            transport::http::serve(engine, &http_config, shutdown_signal()).await?;
        }
    }

    Ok(())
}

/// Reads `--config <path>` off the process arguments, if present.
fn explicit_config_path() -> Option<PathBuf> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

/// Builds the shared AI backend from environment variables, since §6's
/// config schema has no LLM section of its own: `CLAUDECRON_LLM_BASE_URL`
/// and `CLAUDECRON_LLM_MODEL` (and optionally `CLAUDECRON_LLM_API_KEY`)
/// select an [`HttpLlmBackend`]. Returns `None` if `CLAUDECRON_LLM_BASE_URL`
/// is unset, leaving AI-kind tasks unregistered.
fn build_llm_backend() -> Result<Option<Arc<dyn claudecron_ai::LlmBackend>>, Box<dyn std::error::Error>> {
    let Ok(base_url) = std::env::var("CLAUDECRON_LLM_BASE_URL") else {
        return Ok(None);
    };
    let model = std::env::var("CLAUDECRON_LLM_MODEL").unwrap_or_else(|_| "default".to_string());
    let mut backend_config = LlmBackendConfig::ollama(base_url, model);
    if let Ok(api_key) = std::env::var("CLAUDECRON_LLM_API_KEY") {
        backend_config.api_key = Some(api_key);
    }
    let backend = HttpLlmBackend::new(backend_config)?;
    Ok(Some(Arc::new(backend)))
}
