//! Completion backend trait and the HTTP backends behind it.
//!
//! Two wire protocols cover every supported service:
//!   ChatCompletionsBackend  OpenAI `/v1/chat/completions`, also spoken by
//!                           Ollama and OpenAI-compatible gateways (vLLM,
//!                           LM Studio, OpenRouter)
//!   AnthropicBackend        Anthropic Messages API
//!
//! Requests go through `SandboxClient`, so document text only reaches
//! allow-listed hosts.

use async_trait::async_trait;
use perioscope_common::sandbox::SandboxClient;
use perioscope_common::PerioscopeError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4_096;
const DEFAULT_TEMPERATURE: f32 = 0.2;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to completion backend failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not decode backend reply: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("completion backend unavailable: {0}")]
    Unavailable(String),
    #[error("completion backend is rate limiting requests")]
    RateLimitExceeded,
    #[error("completion backend returned {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("model output unusable: {0}")]
    MalformedOutput(String),
    #[error(transparent)]
    Sandbox(#[from] PerioscopeError),
}

impl From<LlmError> for PerioscopeError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::MalformedOutput(msg) => PerioscopeError::MalformedModelOutput(msg),
            LlmError::Sandbox(inner) => inner,
            other => PerioscopeError::provider("llm", other.to_string()),
        }
    }
}

// ── Request / Response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Ask for a JSON object reply where the protocol supports it.
    #[serde(default)]
    pub json_output: bool,
}

impl LlmRequest {
    pub fn system_prompt(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map_or("", |m| m.content.as_str())
    }

    /// Concatenated user turns.
    pub fn user_content(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError>;
    fn model_id(&self) -> &str;
    /// True when document text never leaves the machine.
    fn is_local(&self) -> bool;
}

/// Maps a non-success reply to `LlmError`, reading the provider's error
/// message when the body carries one.
async fn read_reply(resp: reqwest::Response) -> Result<Value, LlmError> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimitExceeded);
    }
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::ApiError { status: status.as_u16(), message: error_message(&body) })
}

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Message from an error body: the JSON error message when there is one,
/// else the start of the raw body.
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
            .map(String::from)
    });
    if let Some(message) = from_json {
        return message;
    }
    let raw = body.trim();
    if raw.is_empty() {
        return "no error message".to_string();
    }
    raw.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

fn non_empty(content: Option<String>) -> Result<String, LlmError> {
    content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| LlmError::MalformedOutput("backend returned an empty completion".to_string()))
}

// ── Chat completions (OpenAI, Ollama, compatible gateways) ────────────────────

pub struct ChatCompletionsBackend {
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    local: bool,
    client: SandboxClient,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl ChatCompletionsBackend {
    fn build(base_url: &str, model: &str, api_key: Option<SecretString>, local: bool) -> Result<Self, LlmError> {
        let mut client = SandboxClient::new()?;
        client.allow_url_host(base_url)?;
        Ok(Self {
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            local,
            client,
        })
    }

    /// A local Ollama server.
    pub fn ollama(base_url: &str, model: &str) -> Result<Self, LlmError> {
        Self::build(base_url, model, None, true)
    }

    pub fn openai(api_key: SecretString, model: &str) -> Result<Self, LlmError> {
        Self::build(OPENAI_BASE_URL, model, Some(api_key), false)
    }

    /// Any gateway speaking the OpenAI protocol; the key is optional.
    pub fn compatible(base_url: &str, model: &str, api_key: Option<SecretString>) -> Result<Self, LlmError> {
        Self::build(base_url, model, api_key, false)
    }

    fn body(&self, req: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": req.messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        });
        if req.json_output {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    fn decode(&self, reply: Value) -> Result<LlmResponse, LlmError> {
        let reply: ChatCompletion = serde_json::from_value(reply)?;
        let usage = reply.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input: u.prompt_tokens,
            output: u.completion_tokens,
        });
        let content = reply.choices.into_iter().next().and_then(|c| c.message.content);
        Ok(LlmResponse {
            content: non_empty(content)?,
            model: reply.model.unwrap_or_else(|| self.model.clone()),
            usage,
        })
    }
}

#[async_trait]
impl LlmBackend for ChatCompletionsBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut builder = self.client.post(&self.endpoint)?.json(&self.body(&req));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        let reply = read_reply(builder.send().await?).await?;
        self.decode(reply)
    }

    fn model_id(&self) -> &str { &self.model }
    fn is_local(&self) -> bool { self.local }
}

// ── Anthropic Messages ────────────────────────────────────────────────────────

pub struct AnthropicBackend {
    model: String,
    api_key: SecretString,
    client: SandboxClient,
}

#[derive(Deserialize)]
struct MessagesReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicBackend {
    pub fn new(api_key: SecretString, model: &str) -> Result<Self, LlmError> {
        Ok(Self { model: model.to_string(), api_key, client: SandboxClient::new()? })
    }

    // System prompt is a top-level field; there is no JSON reply mode, the
    // call-site instructions carry the schema.
    fn body(&self, req: &LlmRequest) -> Value {
        let turns: Vec<&Message> = req.messages.iter().filter(|m| m.role != Role::System).collect();
        let mut body = json!({
            "model": self.model,
            "messages": turns,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        });
        let system = req.system_prompt();
        if !system.is_empty() {
            body["system"] = Value::String(system.to_string());
        }
        body
    }

    fn decode(&self, reply: Value) -> Result<LlmResponse, LlmError> {
        let reply: MessagesReply = serde_json::from_value(reply)?;
        let text: String = reply.content.into_iter().filter_map(|b| b.text).collect();
        let usage = reply.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input: u.input_tokens,
            output: u.output_tokens,
        });
        Ok(LlmResponse {
            content: non_empty(Some(text))?,
            model: reply.model.unwrap_or_else(|| self.model.clone()),
            usage,
        })
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let resp = self
            .client
            .post(ANTHROPIC_MESSAGES_URL)?
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.body(&req))
            .send()
            .await?;
        let reply = read_reply(resp).await?;
        self.decode(reply)
    }

    fn model_id(&self) -> &str { &self.model }
    fn is_local(&self) -> bool { false }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_json_and_non_json_bodies() {
        assert_eq!(error_message(r#"{"error": {"message": "model not found"}}"#), "model not found");
        assert_eq!(error_message(r#"{"message": "bad key"}"#), "bad key");
        assert_eq!(
            error_message("<html><body>502 Bad Gateway</body></html>\n"),
            "<html><body>502 Bad Gateway</body></html>"
        );
        assert_eq!(error_message("   "), "no error message");
        assert_eq!(error_message(&"x".repeat(500)).len(), MAX_ERROR_BODY_CHARS);
    }

    fn request(json_output: bool) -> LlmRequest {
        LlmRequest {
            messages: vec![Message::system("Return JSON."), Message::user("text")],
            max_tokens: None,
            temperature: Some(0.3),
            json_output,
        }
    }

    fn key() -> SecretString {
        SecretString::from("sk-test".to_string())
    }

    #[test]
    fn test_chat_body_requests_json_object() {
        let backend = ChatCompletionsBackend::openai(key(), "gpt-4o-mini").unwrap();
        let body = backend.body(&request(true));
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(backend.body(&request(false)).get("response_format").is_none());
    }

    #[test]
    fn test_chat_reply_decoding() {
        let backend = ChatCompletionsBackend::ollama("http://localhost:11434", "llama3.1:8b").unwrap();
        let resp = backend
            .decode(json!({
                "model": "llama3.1:8b-instruct",
                "choices": [{"message": {"content": "{\"queries\": []}"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 4}
            }))
            .unwrap();
        assert_eq!(resp.content, "{\"queries\": []}");
        assert_eq!(resp.model, "llama3.1:8b-instruct");
        assert_eq!(resp.usage, TokenUsage { input: 12, output: 4 });

        let err = backend.decode(json!({"choices": []})).unwrap_err();
        assert!(matches!(err, LlmError::MalformedOutput(_)));
    }

    #[test]
    fn test_anthropic_body_lifts_system_prompt() {
        let backend = AnthropicBackend::new(key(), "anthropic-test-model").unwrap();
        let body = backend.body(&request(true));
        assert_eq!(body["system"], "Return JSON.");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["messages"][0]["role"], "user");

        let resp = backend
            .decode(json!({"content": [{"type": "text", "text": "{}"}], "usage": {"input_tokens": 3, "output_tokens": 1}}))
            .unwrap();
        assert_eq!(resp.model, "anthropic-test-model");
        assert_eq!(resp.usage.output, 1);
    }

    #[test]
    fn test_malformed_output_maps_to_model_output_error() {
        let e: PerioscopeError = LlmError::MalformedOutput("not json".into()).into();
        assert!(matches!(e, PerioscopeError::MalformedModelOutput(_)));
        let e: PerioscopeError = LlmError::RateLimitExceeded.into();
        assert!(matches!(e, PerioscopeError::Provider { .. }));
    }

    #[test]
    fn test_gateway_host_is_allowed_and_identity_reported() {
        let backend = ChatCompletionsBackend::compatible("https://openrouter.ai/api", "meta/llama", None).unwrap();
        assert_eq!(backend.endpoint, "https://openrouter.ai/api/v1/chat/completions");
        assert_eq!(backend.model_id(), "meta/llama");
        assert!(!backend.is_local());
        assert!(ChatCompletionsBackend::ollama("http://localhost:11434", "m").unwrap().is_local());
    }
}
