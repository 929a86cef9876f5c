//! Scripted completion backend.
//!
//! Replies are keyed by the request's system prompt (the call site) and,
//! optionally, a substring of the user content. Rules with a content needle
//! are matched before catch-all rules.

use std::sync::Mutex;

use async_trait::async_trait;
use perioscope_llm::{LlmBackend, LlmError, LlmRequest, LlmResponse, TokenUsage};
use serde_json::Value;

#[derive(Debug, Clone)]
enum Reply {
    Json(Value),
    Raw(String),
    Fail,
}

#[derive(Debug)]
struct Rule {
    system: String,
    needle: Option<String>,
    reply: Reply,
    /// `None` matches forever; `Some(n)` matches n more times.
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MockLlmBackend {
    rules: Mutex<Vec<Rule>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(self, system: &str, needle: Option<&str>, reply: Reply, remaining: Option<usize>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                system: system.to_string(),
                needle: needle.map(String::from),
                reply,
                remaining,
            });
        }
        self
    }

    /// Reply with `reply` to every call made with `system`.
    pub fn on(self, system: &str, reply: Value) -> Self {
        self.rule(system, None, Reply::Json(reply), None)
    }

    /// Reply with raw text, e.g. something that is not JSON.
    pub fn on_raw(self, system: &str, raw: &str) -> Self {
        self.rule(system, None, Reply::Raw(raw.to_string()), None)
    }

    /// Reply only when the user content contains `needle`.
    pub fn on_content(self, system: &str, needle: &str, reply: Value) -> Self {
        self.rule(system, Some(needle), Reply::Json(reply), None)
    }

    /// Every call with `system` fails with a provider error.
    pub fn fail(self, system: &str) -> Self {
        self.rule(system, None, Reply::Fail, None)
    }

    pub fn fail_content(self, system: &str, needle: &str) -> Self {
        self.rule(system, Some(needle), Reply::Fail, None)
    }

    /// The first `times` calls with `system` fail, later calls fall through.
    pub fn fail_times(self, system: &str, times: usize) -> Self {
        self.rule(system, None, Reply::Fail, Some(times))
    }

    /// Number of calls made with `system`.
    pub fn calls(&self, system: &str) -> usize {
        self.requests
            .lock()
            .map(|r| r.iter().filter(|req| req.system_prompt() == system).count())
            .unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_reply(&self, req: &LlmRequest) -> Option<Reply> {
        let system = req.system_prompt();
        let content = req.user_content();

        let mut rules = self.rules.lock().ok()?;
        let matches = |r: &Rule| {
            r.system == system
                && r.remaining != Some(0)
                && r.needle.as_deref().map_or(true, |n| content.contains(n))
        };
        let index = rules
            .iter()
            .position(|r| r.needle.is_some() && matches(r))
            .or_else(|| rules.iter().position(|r| r.needle.is_none() && matches(r)))?;

        let rule = &mut rules[index];
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        Some(rule.reply.clone())
    }
}

#[async_trait]
impl LlmBackend for MockLlmBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let reply = self.next_reply(&req);
        if let Ok(mut log) = self.requests.lock() {
            log.push(req);
        }
        let content = match reply {
            Some(Reply::Json(v)) => v.to_string(),
            Some(Reply::Raw(s)) => s,
            Some(Reply::Fail) => {
                return Err(LlmError::ApiError { status: 503, message: "scripted failure".to_string() })
            }
            None => return Err(LlmError::Unavailable("no scripted reply".to_string())),
        };
        Ok(LlmResponse { content, model: "mock".to_string(), usage: TokenUsage::default() })
    }

    fn model_id(&self) -> &str { "mock" }
    fn is_local(&self) -> bool { true }
}
