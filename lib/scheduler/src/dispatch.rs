//! The narrow callback every trigger source holds instead of a
//! back-reference to the engine (the §9 redesign flag: "sources must not
//! hold a reference back to the scheduler that owns them").
//!
//! Each source (`IntervalSource`, `FileWatchSource`, `HookRouter`,
//! `DependencyGraph`) is constructed with an `Arc<dyn Dispatch>` and calls
//! `dispatch()` when its condition fires. The engine implements `Dispatch`
//! itself and is the only caller that constructs sources, so the data flow
//! is one-directional: engine -> source via construction, source -> engine
//! via this trait, never source -> engine via a stored reference to the
//! concrete engine type.

use crate::error::SchedulerError;
use crate::execution::{Execution, TriggerContext};
use async_trait::async_trait;
use claudecron_core::TaskId;

/// Where a dispatch call originated, recorded on the resulting
/// execution's `trigger_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOrigin {
    Schedule,
    Interval,
    FileWatch,
    Hook,
    Dependency,
    Manual,
    /// A `trigger_task` result handler invoking another task.
    Triggered,
    SmartSchedule,
    Retry,
}

impl std::fmt::Display for DispatchOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Schedule => "schedule",
            Self::Interval => "interval",
            Self::FileWatch => "file_watch",
            Self::Hook => "hook",
            Self::Dependency => "dependency",
            Self::Manual => "manual",
            Self::Triggered => "triggered",
            Self::SmartSchedule => "smart_schedule",
            Self::Retry => "retry",
        };
        write!(f, "{s}")
    }
}

/// The one thing a trigger source needs from the engine: "run this task
/// now, for this reason, with this context".
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(
        &self,
        task_id: TaskId,
        origin: DispatchOrigin,
        context: Option<TriggerContext>,
    ) -> Result<Execution, SchedulerError>;
}
