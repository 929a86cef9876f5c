//! Agent configuration, read from `perioscope.toml`.
//!
//! Secrets may be left out of the file and supplied through the
//! environment instead (see [`Config::apply_env_keys`]).

use std::path::Path;

use perioscope_analysis::AnalysisConfig;
use perioscope_llm::{BackendConfig, BackendKind};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

pub const CONFIG_ENV: &str = "PERIOSCOPE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "perioscope.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_backend_kind() -> BackendKind { BackendKind::Ollama }
fn default_model()        -> String      { "llama3.1:8b".to_string() }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            model: default_model(),
            api_key: None,
            base_url: None,
        }
    }
}

impl LlmConfig {
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            kind: self.kind,
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
        }
    }

    fn key_env_var(&self) -> Option<&'static str> {
        match self.kind {
            BackendKind::OpenAi | BackendKind::OpenAiCompatible => Some("PERIOSCOPE_OPENAI_API_KEY"),
            BackendKind::Anthropic => Some("PERIOSCOPE_ANTHROPIC_API_KEY"),
            BackendKind::Ollama => None,
        }
    }
}


impl Config {
    /// Load configuration from perioscope.toml.
    /// Checks PERIOSCOPE_CONFIG first, then the current directory. A missing
    /// file yields the defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_from(Path::new(&path))?;
        config.apply_env_keys(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(
                "Config file not found: {} (using defaults; copy perioscope.example.toml to perioscope.toml to customise)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Fills secrets the file left empty from `lookup` (the process
    /// environment in production).
    pub fn apply_env_keys(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(var) = self.llm.key_env_var() {
            fill_secret(&mut self.llm.api_key, lookup(var));
            if is_blank(&self.llm.api_key) {
                tracing::warn!("{} backend configured but no API key found (set llm.api_key or {var})", self.llm.kind.as_str());
            }
        }
        let providers = &mut self.analysis.providers;
        fill_secret(&mut providers.pubmed_api_key, lookup("PERIOSCOPE_PUBMED_API_KEY"));
        fill_secret(&mut providers.semantic_scholar_api_key, lookup("PERIOSCOPE_S2_API_KEY"));
    }
}

fn is_blank(secret: &Option<SecretString>) -> bool {
    secret.as_ref().map_or(true, |s| s.expose_secret().trim().is_empty())
}

fn fill_secret(slot: &mut Option<SecretString>, from_env: Option<String>) {
    if !is_blank(slot) {
        return;
    }
    if let Some(value) = from_env.filter(|v| !v.trim().is_empty()) {
        *slot = Some(SecretString::from(value));
    }
}
