//! Two-tier dispatch
//!
//! Resolves a step's task text to one of a handler's tools.
//!
//! - **Tier 1**: keyword scoring over the normalized task. No external calls.
//!   The best-scoring tool is taken when its score reaches the tool's
//!   threshold and extraction satisfies every required parameter.
//! - **Tier 2**: a single model request listing only this handler's tools.
//!   The answer is validated against the registry and the tool's schema;
//!   a bad answer is a typed error, never retried.

pub mod tool;

pub use tool::{Action, Extraction, Keyword, ParamKind, ParamSpec, Tool, ToolBody};

use sdk::errors::StewardError;
use sdk::types::ToolInput;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::llm::router::LLMRouter;
use crate::llm::{extract_json_object, Message};
use crate::permissions::Operation;

/// Lower-case and collapse whitespace
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Keyword,
    Model,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Keyword => f.write_str("tier1"),
            Tier::Model => f.write_str("tier2"),
        }
    }
}

/// A resolved tool call
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub input: ToolInput,
    pub operation: Operation,
    pub tier: Tier,
    pub confidence: f64,
    pub tokens_used: u32,
}

impl Resolution {
    pub fn tool(&self) -> &str {
        &self.input.tool
    }
}

/// Why Tier 1 did not resolve
#[derive(Debug, Clone, PartialEq)]
pub enum Tier1Miss {
    /// No tool reached its threshold
    BelowThreshold { best: Option<String>, score: f64 },
    /// The best tool matched but extraction left a required parameter empty
    MissingArgs { tool: String, reason: String },
}

/// Append-only, ordered tool registry of one handler
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool; names are unique within a handler
    pub fn register(&mut self, tool: Tool) -> Result<(), StewardError> {
        if self.get(&tool.name).is_some() {
            return Err(StewardError::ConfigInvalid(format!(
                "tool '{}' registered twice",
                tool.name
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Highest-scoring tool; the first registered wins ties
    pub fn best_match(&self, normalized: &str) -> Option<(&Tool, f64)> {
        let mut best: Option<(&Tool, f64)> = None;
        for tool in &self.tools {
            let score = tool.score(normalized);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((tool, score));
            }
        }
        best
    }

    /// Tier 1: deterministic keyword dispatch
    pub fn tier1(&self, task: &str) -> Result<Resolution, Tier1Miss> {
        let normalized = normalize(task);
        let Some((tool, score)) = self.best_match(&normalized) else {
            return Err(Tier1Miss::BelowThreshold {
                best: None,
                score: 0.0,
            });
        };

        if score < tool.threshold {
            return Err(Tier1Miss::BelowThreshold {
                best: Some(tool.name.clone()),
                score,
            });
        }

        let raw = tool.extract_args(task);
        match tool.validate(&raw) {
            Ok(input) => Ok(Resolution {
                input,
                operation: tool.operation,
                tier: Tier::Keyword,
                confidence: score,
                tokens_used: 0,
            }),
            Err(e) => Err(Tier1Miss::MissingArgs {
                tool: tool.name.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Prompt for Tier 2: this handler's tools and the task, nothing else
    pub fn selection_prompt(&self, handler: &str, task: &str) -> Vec<Message> {
        let tools: Vec<String> = self.tools.iter().map(|t| format!("- {}", t.summary())).collect();
        let system = format!(
            "You choose exactly one tool of the {handler} handler for a task.\n\
             Tools:\n{tools}\n\n\
             Reply with JSON only: {{\"tool\": \"<tool name>\", \"args\": {{...}}}}\n\
             If no tool fits, reply {{\"error\": \"<reason>\"}}.",
            handler = handler,
            tools = tools.join("\n"),
        );
        vec![Message::system(system), Message::user(task)]
    }

    /// Validate a Tier 2 reply against the registry and the tool schema
    pub fn parse_selection(&self, handler: &str, content: &str) -> Result<ToolInput, StewardError> {
        let value = extract_json_object(content).ok_or_else(|| {
            StewardError::LLMInvalidJson(format!("{} tool selection: no JSON object", handler))
        })?;

        if let Some(reason) = value.get("error").and_then(Value::as_str) {
            return Err(StewardError::ToolSelectionFailed(reason.to_string()));
        }

        let name = value.get("tool").and_then(Value::as_str).ok_or_else(|| {
            StewardError::LLMInvalidJson(format!("{} tool selection: missing 'tool'", handler))
        })?;

        let tool = self.get(name).ok_or_else(|| StewardError::ToolNotFound {
            handler: handler.to_string(),
            tool: name.to_string(),
        })?;

        let args: BTreeMap<String, Value> = match value.get("args") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => map.clone().into_iter().collect(),
            Some(other) => {
                return Err(StewardError::InvalidArgs(format!(
                    "{}: args must be an object, got {}",
                    name, other
                )))
            }
        };

        tool.validate(&args)
    }

    /// Tier 2: one model request, validated, no retry
    pub async fn tier2(
        &self,
        handler: &str,
        task: &str,
        llm: &LLMRouter,
    ) -> Result<Resolution, StewardError> {
        let messages = self.selection_prompt(handler, task);
        let (completion, provider) = llm.call(&messages).await?;
        tracing::debug!("{} tool selection via {}", handler, provider);

        let input = self.parse_selection(handler, &completion.content)?;
        let operation = self
            .get(&input.tool)
            .map(|t| t.operation)
            .ok_or_else(|| StewardError::ToolNotFound {
                handler: handler.to_string(),
                tool: input.tool.clone(),
            })?;

        Ok(Resolution {
            input,
            operation,
            tier: Tier::Model,
            confidence: 0.0,
            tokens_used: completion.tokens,
        })
    }

    /// Tier 1, falling back to Tier 2
    pub async fn resolve(
        &self,
        handler: &str,
        task: &str,
        llm: &LLMRouter,
    ) -> Result<Resolution, StewardError> {
        match self.tier1(task) {
            Ok(resolution) => {
                tracing::debug!(
                    "{}: tier1 selected {} (confidence {:.2})",
                    handler,
                    resolution.tool(),
                    resolution.confidence
                );
                Ok(resolution)
            }
            Err(miss) => {
                tracing::debug!("{}: tier1 miss {:?}, falling back to tier2", handler, miss);
                self.tier2(handler, task, llm).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::ToolOutput;

    fn noop(_: &ToolInput) -> Result<Action, StewardError> {
        Ok(Action::native("noop", || Ok(ToolOutput::text("ok"))))
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(
            Tool::new("check_cpu", "CPU load", Operation::Read, noop)
                .strong(&["cpu"])
                .weak(&["usage", "load"]),
        )
        .unwrap();
        reg.register(
            Tool::new("check_ram", "Memory usage", Operation::Read, noop)
                .strong(&["ram", "memory"])
                .weak(&["usage"]),
        )
        .unwrap();
        reg.register(
            Tool::new("ping_host", "Ping a host", Operation::Execute, noop)
                .strong(&["ping"])
                .param(ParamSpec::required("host", ParamKind::String))
                .extract("host", r"(?i)\bping\s+([\w.-]+\.[a-z]{2,})")
                .unwrap(),
        )
        .unwrap();
        reg
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Check   RAM\tUsage "), "check ram usage");
    }

    #[test]
    fn test_tier1_selects_strong_keyword() {
        let res = registry().tier1("check ram usage").unwrap();
        assert_eq!(res.tool(), "check_ram");
        assert_eq!(res.tier, Tier::Keyword);
        assert_eq!(res.tokens_used, 0);
        assert!(res.confidence >= 0.8);
    }

    #[test]
    fn test_tier1_below_threshold() {
        let miss = registry().tier1("show usage").unwrap_err();
        assert!(matches!(miss, Tier1Miss::BelowThreshold { score, .. } if score < 0.8));
    }

    #[test]
    fn test_tier1_tie_goes_to_first_registered() {
        let mut reg = ToolRegistry::new();
        reg.register(Tool::new("first", "", Operation::Read, noop).strong(&["status"]))
            .unwrap();
        reg.register(Tool::new("second", "", Operation::Read, noop).strong(&["status"]))
            .unwrap();
        for _ in 0..5 {
            assert_eq!(reg.tier1("status").unwrap().tool(), "first");
        }
    }

    #[test]
    fn test_tier1_missing_required_args() {
        let miss = registry().tier1("ping something").unwrap_err();
        assert!(matches!(miss, Tier1Miss::MissingArgs { ref tool, .. } if tool == "ping_host"));

        let res = registry().tier1("ping example.com").unwrap();
        assert_eq!(res.input.arg_str("host").unwrap(), "example.com");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut reg = registry();
        let err = reg
            .register(Tool::new("check_ram", "", Operation::Read, noop))
            .unwrap_err();
        assert!(matches!(err, StewardError::ConfigInvalid(_)));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn test_selection_prompt_is_handler_scoped() {
        let messages = registry().selection_prompt("SysAgent", "do something");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("check_cpu"));
        assert!(messages[0].content.contains("ping_host: Ping a host"));
        assert_eq!(messages[1].content, "do something");
    }

    #[test]
    fn test_parse_selection() {
        let reg = registry();
        let input = reg
            .parse_selection("SysAgent", r#"{"tool": "ping_host", "args": {"host": "a.io"}}"#)
            .unwrap();
        assert_eq!(input.arg_str("host").unwrap(), "a.io");

        assert!(matches!(
            reg.parse_selection("SysAgent", r#"{"tool": "reboot_now", "args": {}}"#),
            Err(StewardError::ToolNotFound { .. })
        ));
        assert!(matches!(
            reg.parse_selection("SysAgent", r#"{"tool": "ping_host", "args": {}}"#),
            Err(StewardError::InvalidArgs(_))
        ));
        assert!(matches!(
            reg.parse_selection("SysAgent", r#"{"error": "nothing fits"}"#),
            Err(StewardError::ToolSelectionFailed(_))
        ));
        assert!(matches!(
            reg.parse_selection("SysAgent", "I think check_ram"),
            Err(StewardError::LLMInvalidJson(_))
        ));
    }
}
