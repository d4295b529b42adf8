//! The persistent task scheduler domain crate.
//!
//! This crate provides:
//!
//! - **Model**: the declarative [`Task`] type, its trigger/config/handler
//!   shapes, and [`Execution`] records.
//! - **Engine**: the single dispatcher tying every trigger source,
//!   condition gate, result handler, and retry policy together.
//! - **Trigger sources**: cron (hand-written evaluator), interval,
//!   file-watch, hook, and dependency-graph wiring.
//! - **Seams**: [`Store`] and [`Executor`] traits, implemented by sibling
//!   crates, so this crate never depends on a concrete backend.

pub mod condition;
pub mod cron;
pub mod dispatch;
pub mod duration;
pub mod engine;
pub mod error;
pub mod execution;
pub mod executor;
pub mod filewatch;
pub mod graph;
pub mod handler;
pub mod hook;
pub mod interval;
pub mod model;
pub mod retry;
pub mod smart_schedule;
pub mod store;
pub mod template;

pub use condition::{ConditionEvaluator, SkipReason};
pub use cron::CronSchedule;
pub use dispatch::{Dispatch, DispatchOrigin};
pub use duration::parse_duration;
pub use engine::Engine;
pub use error::{
    ExecutionError, HandlerError, NotFoundError, SchedulerError, StorageError, TransportError,
    ValidationError,
};
pub use execution::{
    Execution, ExecutionStatus, ExecutorOutcome, NewExecution, RetryAttempt, RetryMetadata,
    SdkUsage, ToolCallRecord, TriggerContext,
};
pub use executor::{Executor, ExecutorRegistry};
pub use filewatch::FileWatchSource;
pub use graph::DependencyGraph;
pub use handler::ResultHandlerRouter;
pub use hook::{HookRegistration, HookRouter};
pub use interval::IntervalSource;
pub use model::{
    BackoffStrategy, ComparisonOperator, Conditions, CustomCondition, ExecutionOptions, HookConditions,
    HookEvent, HttpMethod, JoinMode, NewTask, ResultHandler, RetryAcceptSet, RetryPolicy, Task,
    TaskConfig, TaskKind, TaskPatch, Trigger, TriggerKind, Urgency,
};
pub use retry::RetryController;
pub use smart_schedule::SmartScheduleResolver;
pub use store::{ExecutionFilter, Store, TaskFilter, TaskStats};
