//! AI backend primitives for claudecron.
//!
//! The scheduler treats AI/subagent executors as opaque collaborators: this
//! crate provides only the **LLM Call** primitive — single-shot inference
//! with optional structured output — that those executors and the
//! `SmartScheduleResolver` are built on top of.

pub mod backend;
pub mod error;
pub mod http_backend;
pub mod llm_call;

pub use backend::{LlmBackend, LlmBackendConfig, LlmMessage, LlmProvider, LlmRequest, LlmResponse};
pub use error::{AiError, LlmError};
pub use http_backend::HttpLlmBackend;
pub use llm_call::{LlmCall, LlmCallConfig, LlmCallResult, LlmInvocationId};
