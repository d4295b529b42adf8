//! `file_watch` trigger source (§4.5).
//!
//! Grounded on `olaals-cli-tools/watchdag/src/watch/watcher.rs`'s
//! `notify::RecommendedWatcher` -> `tokio::sync::mpsc` bridging idiom
//! (the blocking notify callback forwards into an unbounded channel, an
//! async task drains it) and on that pack's `patterns.rs` for the
//! basename glob, simplified here to a single optional pattern via
//! `globset` (an enrichment dependency, since the chosen teacher uses
//! neither `notify` nor `globset`). Debounce and write-stability settling
//! are added on top: the grounding file has neither.

use crate::dispatch::{Dispatch, DispatchOrigin};
use crate::duration::parse_duration;
use crate::error::ValidationError;
use chrono::{Duration, Utc};
use claudecron_core::TaskId;
use globset::{Glob, GlobMatcher};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// The minimum time a changed file's size must stay constant before the
/// event is accepted, to avoid reacting to half-written files.
const WRITE_STABILITY_WINDOW: StdDuration = StdDuration::from_millis(500);

/// A live filesystem watcher wired to dispatch one task.
pub struct FileWatchSource {
    // Kept alive for as long as the source is alive; dropping it stops
    // the underlying OS watch.
    _watcher: RecommendedWatcher,
}

impl FileWatchSource {
    /// Spawns the watcher.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidDuration`] if `debounce` doesn't
    /// parse, or wraps the underlying `notify` setup failure as
    /// `ValidationError::EmptyField` (no dedicated variant exists for
    /// watcher setup; the path is the only parameter that can realistically
    /// cause it).
    pub fn spawn(
        task_id: TaskId,
        path: impl Into<PathBuf>,
        pattern: Option<&str>,
        debounce: Option<&str>,
        dispatch: Arc<dyn Dispatch>,
    ) -> Result<Self, ValidationError> {
        let debounce = debounce.map(parse_duration).transpose()?;
        let matcher = pattern.map(compile_glob).transpose()?;
        let root = path.into();

        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event_tx.send(event).is_err() {
                        debug!(task = %task_id, "file watch channel closed, dropping event");
                    }
                }
                Err(err) => warn!(task = %task_id, error = %err, "file watch error"),
            },
            notify::Config::default(),
        )
        .map_err(|_err| ValidationError::EmptyField { field: "trigger.path" })
        .map(|mut watcher| {
            if let Err(err) = watcher.watch(&root, RecursiveMode::Recursive) {
                warn!(task = %task_id, error = %err, path = %root.display(), "failed to watch path");
            }
            watcher
        })?;

        let last_fired = Arc::new(Mutex::new(None::<chrono::DateTime<Utc>>));

        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                for changed in &event.paths {
                    if is_dotfile(changed) {
                        continue;
                    }
                    if let Some(matcher) = &matcher {
                        let Some(basename) = changed.file_name().and_then(|n| n.to_str()) else {
                            continue;
                        };
                        if !matcher.is_match(basename) {
                            continue;
                        }
                    }

                    {
                        let mut guard = last_fired.lock().await;
                        if let (Some(debounce), Some(last)) = (debounce, *guard) {
                            if Utc::now() - last < debounce {
                                continue;
                            }
                        }
                        *guard = Some(Utc::now());
                    }

                    if !is_write_stable(changed).await {
                        continue;
                    }

                    let mut context = crate::execution::TriggerContext::new();
                    context.insert(
                        "event".to_string(),
                        serde_json::Value::String(format!("{:?}", event.kind)),
                    );
                    context.insert(
                        "file_path".to_string(),
                        serde_json::Value::String(changed.display().to_string()),
                    );
                    context.insert(
                        "timestamp".to_string(),
                        serde_json::Value::String(Utc::now().to_rfc3339()),
                    );

                    if let Err(err) = dispatch
                        .dispatch(task_id, DispatchOrigin::FileWatch, Some(context))
                        .await
                    {
                        warn!(task = %task_id, error = %err, "file watch dispatch failed");
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

fn is_dotfile(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| s.starts_with('.') && s != "." && s != "..")
    })
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher, ValidationError> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|_| ValidationError::EmptyField { field: "trigger.pattern" })
}

async fn is_write_stable(path: &Path) -> bool {
    let Ok(before) = tokio::fs::metadata(path).await else {
        // File may have been deleted; a delete event has no size to
        // stabilize, treat as stable.
        return true;
    };
    tokio::time::sleep(WRITE_STABILITY_WINDOW).await;
    let Ok(after) = tokio::fs::metadata(path).await else {
        return true;
    };
    before.len() == after.len()
}
