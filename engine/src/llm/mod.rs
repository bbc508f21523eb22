//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for the text-completion services
//! Steward consults for planning and Tier 2 tool selection. The LLMProvider
//! trait defines the contract that all providers must implement, enabling the
//! router to fail over between them transparently.
//!
//! Providers return raw completion text. Callers that expect structured
//! output use [`extract_json_object`] to pull the first JSON object out of
//! whatever prose or code fences the model wrapped it in.

use async_trait::async_trait;
use sdk::errors::StewardError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod embedding;
pub mod ollama;
pub mod openai;
pub mod router;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Empty response")]
    EmptyResponse,
}

impl From<LLMError> for StewardError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::Timeout(secs) => StewardError::LLMTimeout(secs),
            LLMError::ParseError(msg) => StewardError::LLMInvalidJson(msg),
            LLMError::EmptyResponse => StewardError::LLMEmptyResponse,
            other => StewardError::LLMConnectionFailed(other.to_string()),
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// A finished completion
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Raw text returned by the model
    pub content: String,

    /// Tokens billed for the call (prompt + completion), 0 when unknown
    pub tokens: u32,
}

impl Completion {
    pub fn new(content: impl Into<String>, tokens: u32) -> Self {
        Self {
            content: content.into(),
            tokens,
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama), false for cloud providers
    fn is_local(&self) -> bool;

    /// Returns the estimated cost in USD for the given token count.
    /// Local providers should return 0.0
    fn estimated_cost(&self, tokens: usize) -> f64;

    /// Generate a completion for the conversation
    async fn generate(&self, messages: &[Message]) -> Result<Completion>;

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Rough token estimate for providers that do not report usage (~4 chars per token)
pub fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.len() / 4).unwrap_or(u32::MAX)
}

/// Pull the first JSON object out of a model reply.
///
/// Handles multiple output formats:
/// 1. Raw JSON (the whole reply is an object)
/// 2. Fenced JSON, with or without trailing prose
/// 3. An object embedded in prose, found by brace matching
pub fn extract_json_object(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    if let Some(value) = parse_object(trimmed) {
        return Some(value);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Some(value) = parse_object(inner.trim()) {
            return Some(value);
        }
    }

    let mut search_from = 0;
    while let Some(rel) = trimmed[search_from..].find('{') {
        let pos = search_from + rel;
        if let Some(candidate) = extract_balanced_json(&trimmed[pos..]) {
            if let Some(value) = parse_object(candidate) {
                return Some(value);
            }
        }
        search_from = pos + 1;
    }

    None
}

fn parse_object(s: &str) -> Option<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(s).ok()?;
    value.is_object().then_some(value)
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing fence.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::errors::{ErrorCode, StewardErrorExt};
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let system_msg = Message::system("You are a planner");
        assert_eq!(system_msg.role, MessageRole::System);
        assert_eq!(system_msg.role.to_string(), "system");
    }

    #[test]
    fn test_extract_raw_json() {
        let value = extract_json_object(r#"{"tool": "check_ram", "args": {}}"#).unwrap();
        assert_eq!(value["tool"], "check_ram");
    }

    #[test]
    fn test_extract_fenced_json_with_trailing_prose() {
        let content = "Here you go:\n```json\n{\"steps\": []}\n```\nLet me know!";
        let value = extract_json_object(content).unwrap();
        assert_eq!(value, json!({"steps": []}));
    }

    #[test]
    fn test_extract_json_embedded_in_prose() {
        let content = r#"Sure. {"tool": "ping_host", "args": {"host": "a{b}c"}} is my pick"#;
        let value = extract_json_object(content).unwrap();
        assert_eq!(value["args"]["host"], "a{b}c");
    }

    #[test]
    fn test_extract_skips_unbalanced_prefix() {
        let content = r#"{ not json } then {"steps": [{"handler": "SysAgent", "task": "x"}]}"#;
        let value = extract_json_object(content).unwrap();
        assert!(value["steps"].is_array());
    }

    #[test]
    fn test_extract_rejects_non_objects() {
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("").is_none());
    }

    #[test]
    fn test_llm_error_maps_to_model_codes() {
        let err: StewardError = LLMError::Timeout(30).into();
        assert_eq!(err.code(), ErrorCode::LlmTimeout);

        let err: StewardError = LLMError::ProviderUnavailable("down".into()).into();
        assert_eq!(err.code(), ErrorCode::LlmConnectionFailed);

        let err: StewardError = LLMError::EmptyResponse.into();
        assert_eq!(err.code(), ErrorCode::LlmEmptyResponse);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("This is a test message"), 5);
        assert_eq!(estimate_tokens(""), 0);
    }
}
