//! Tool invocation and output types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::StewardError;

/// A resolved tool call: the tool name plus its validated arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool: String,
    pub args: BTreeMap<String, serde_json::Value>,
}

impl ToolInput {
    /// Create a call with no arguments
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: BTreeMap::new(),
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Get a required string argument
    pub fn arg_str(&self, key: &str) -> Result<&str, ToolError> {
        self.args
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get a required integer argument
    pub fn arg_i64(&self, key: &str) -> Result<i64, ToolError> {
        self.args
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an optional string argument
    pub fn arg_str_opt(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }

    /// Get an optional integer argument
    pub fn arg_i64_opt(&self, key: &str) -> Option<i64> {
        self.args.get(key).and_then(|v| v.as_i64())
    }
}

/// Output of a tool body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    pub data: serde_json::Value,
}

impl ToolOutput {
    /// Plain text output
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: serde_json::Value::Null,
        }
    }

    /// Text output with a structured payload attached
    pub fn with_data(text: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            text: text.into(),
            data,
        }
    }
}

/// Argument errors raised while reading a [`ToolInput`]
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<ToolError> for StewardError {
    fn from(err: ToolError) -> Self {
        StewardError::InvalidArgs(err.to_string())
    }
}
