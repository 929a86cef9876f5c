use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerioscopeError {
    #[error("document text is empty")]
    EmptyInput,

    #[error("document text is {size} bytes, above the {limit} byte ceiling")]
    InputTooLarge { size: usize, limit: usize },

    #[error("{provider} request failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Malformed model output: {0}")]
    MalformedModelOutput(String),

    #[error("no valid chunk analyses to merge")]
    NoValidResults,

    #[error("metadata unresolved: {0}")]
    MetadataUnresolved(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification used to decide whether a failure is absorbed
/// locally or ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Provider,
    ModelOutput,
    Merge,
    ResolutionExhausted,
}

impl PerioscopeError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyInput | Self::InputTooLarge { .. } | Self::Config(_) => ErrorKind::Input,
            Self::MalformedModelOutput(_) => ErrorKind::ModelOutput,
            Self::NoValidResults => ErrorKind::Merge,
            Self::MetadataUnresolved(_) => ErrorKind::ResolutionExhausted,
            Self::Provider { .. }
            | Self::Timeout { .. }
            | Self::Http(_)
            | Self::Serialization(_)
            | Self::Xml(_)
            | Self::SecurityError(_) => ErrorKind::Provider,
        }
    }

    /// Provider and model-output failures are absorbed at chunk or query granularity.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Provider | ErrorKind::ModelOutput)
    }
}

pub type Result<T> = std::result::Result<T, PerioscopeError>;
