//! JSON-returning completions.
//!
//! Each analysis call site describes its schema with a `StructuredPrompt`.
//! The reply must parse as a JSON object carrying every required top-level
//! key, otherwise the call fails with `LlmError::MalformedOutput`.

use serde_json::Value;
use tracing::debug;

use crate::backend::{LlmBackend, LlmError, LlmRequest, Message};

#[derive(Debug, Clone, Copy)]
pub struct StructuredPrompt<'a> {
    pub instructions: &'a str,
    pub required_keys: &'a [&'a str],
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

pub async fn complete_json(
    backend: &dyn LlmBackend,
    prompt: StructuredPrompt<'_>,
    content: &str,
) -> Result<Value, LlmError> {
    let req = LlmRequest {
        messages: vec![Message::system(prompt.instructions), Message::user(content)],
        max_tokens: prompt.max_tokens,
        temperature: Some(prompt.temperature),
        json_output: true,
    };
    let resp = backend.complete(req).await?;
    debug!(
        model = %resp.model,
        input_tokens = resp.usage.input,
        output_tokens = resp.usage.output,
        "Structured completion returned"
    );
    parse_structured(&resp.content, prompt.required_keys)
}

/// Parses a model reply into a JSON object and checks its top-level keys.
pub fn parse_structured(raw: &str, required_keys: &[&str]) -> Result<Value, LlmError> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| LlmError::MalformedOutput(format!("response is not valid JSON: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(LlmError::MalformedOutput("response is not a JSON object".to_string()));
    };

    let missing: Vec<&str> = required_keys
        .iter()
        .copied()
        .filter(|k| object.get(*k).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(LlmError::MalformedOutput(format!(
            "missing required keys: {}",
            missing.join(", ")
        )));
    }

    Ok(value)
}

// Some models wrap JSON in a markdown fence even in JSON mode.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
