//! Backend selection from configuration.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use crate::backend::{AnthropicBackend, ChatCompletionsBackend, LlmBackend, LlmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Ollama,
    OpenAi,
    OpenAiCompatible,
    Anthropic,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ollama           => "ollama",
            BackendKind::OpenAi           => "open_ai",
            BackendKind::OpenAiCompatible => "open_ai_compatible",
            BackendKind::Anthropic        => "anthropic",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub base_url: Option<String>,
}

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Builds the completion backend described by `cfg`.
pub fn build_backend(cfg: &BackendConfig) -> Result<Arc<dyn LlmBackend>, LlmError> {
    let key = || {
        cfg.api_key
            .clone()
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| LlmError::Unavailable(format!("{} backend requires an API key", cfg.kind.as_str())))
    };

    let backend: Arc<dyn LlmBackend> = match cfg.kind {
        BackendKind::Ollama => Arc::new(ChatCompletionsBackend::ollama(
            cfg.base_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL),
            &cfg.model,
        )?),
        BackendKind::OpenAi => Arc::new(ChatCompletionsBackend::openai(key()?, &cfg.model)?),
        BackendKind::OpenAiCompatible => {
            let base_url = cfg.base_url.as_deref().ok_or_else(|| {
                LlmError::Unavailable("open_ai_compatible backend requires base_url".to_string())
            })?;
            Arc::new(ChatCompletionsBackend::compatible(base_url, &cfg.model, cfg.api_key.clone())?)
        }
        BackendKind::Anthropic => Arc::new(AnthropicBackend::new(key()?, &cfg.model)?),
    };

    info!(kind = cfg.kind.as_str(), model = backend.model_id(), local = backend.is_local(), "Completion backend ready");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: BackendKind, api_key: Option<&str>, base_url: Option<&str>) -> BackendConfig {
        BackendConfig {
            kind,
            model: "test-model".to_string(),
            api_key: api_key.map(|k| SecretString::from(k.to_string())),
            base_url: base_url.map(String::from),
        }
    }

    #[test]
    fn test_remote_backend_without_key_is_unavailable() {
        let err = build_backend(&config(BackendKind::OpenAi, None, None)).err().unwrap();
        assert!(matches!(err, LlmError::Unavailable(_)));
        let err = build_backend(&config(BackendKind::Anthropic, Some(""), None)).err().unwrap();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[test]
    fn test_ollama_defaults_to_localhost() {
        let backend = build_backend(&config(BackendKind::Ollama, None, None)).unwrap();
        assert!(backend.is_local());
        assert_eq!(backend.model_id(), "test-model");
    }

    #[test]
    fn test_compatible_backend_requires_base_url() {
        assert!(build_backend(&config(BackendKind::OpenAiCompatible, None, None)).is_err());
        let backend = build_backend(&config(
            BackendKind::OpenAiCompatible,
            None,
            Some("http://127.0.0.1:1234"),
        ))
        .unwrap();
        assert_eq!(backend.model_id(), "test-model");
    }

    #[test]
    fn test_kind_deserializes_snake_case() {
        let cfg: BackendConfig = serde_json::from_value(serde_json::json!({
            "kind": "open_ai_compatible",
            "model": "m",
            "base_url": "http://localhost:8000"
        }))
        .unwrap();
        assert_eq!(cfg.kind, BackendKind::OpenAiCompatible);
        assert!(cfg.api_key.is_none());
    }
}
