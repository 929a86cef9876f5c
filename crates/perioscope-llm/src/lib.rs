//! perioscope-llm: Text-completion backend abstraction.
//!
//! `backend` holds the `LlmBackend` trait and the HTTP backends,
//! `provider` builds one from configuration, and `structured` turns a
//! completion into validated JSON for the analysis call sites.

pub mod backend;
pub mod provider;
pub mod structured;

pub use backend::{LlmBackend, LlmError, LlmRequest, LlmResponse, Message, Role, TokenUsage};
pub use provider::{build_backend, BackendConfig, BackendKind};
pub use structured::{complete_json, StructuredPrompt};
