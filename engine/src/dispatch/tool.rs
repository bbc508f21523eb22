//! Tool definitions
//!
//! A [`Tool`] is registered once per handler and never changes afterwards.
//! It carries everything both dispatch tiers need: keywords for Tier 1,
//! a description and parameter schema for Tier 2, extraction rules that
//! turn task text into arguments, and the body that turns validated
//! arguments into an [`Action`].

use regex::Regex;
use sdk::errors::StewardError;
use sdk::types::{ToolInput, ToolOutput};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::command_executor::Invocation;
use crate::permissions::Operation;

/// Default Tier 1 confidence threshold
pub const DEFAULT_THRESHOLD: f64 = 0.8;

const STRONG_WEIGHT: f64 = 1.0;
const WEAK_WEIGHT: f64 = 0.4;

/// One weighted keyword or phrase
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub term: String,
    pub weight: f64,
}

impl Keyword {
    /// A keyword that alone selects its tool
    pub fn strong(term: &str) -> Self {
        Self {
            term: super::normalize(term),
            weight: STRONG_WEIGHT,
        }
    }

    /// A keyword that only selects its tool together with others
    pub fn weak(term: &str) -> Self {
        Self {
            term: super::normalize(term),
            weight: WEAK_WEIGHT,
        }
    }

    /// Whole-word (or whole-phrase) presence in normalized text
    pub fn found_in(&self, normalized: &str) -> bool {
        if self.term.is_empty() {
            return false;
        }
        normalized.match_indices(self.term.as_str()).any(|(start, m)| {
            let before = normalized[..start].chars().next_back();
            let after = normalized[start + m.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::String => f.write_str("string"),
            ParamKind::Integer => f.write_str("integer"),
        }
    }
}

/// One entry of a tool's parameter schema
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Coerce a raw value to this parameter's kind
    fn coerce(&self, value: &Value) -> Option<Value> {
        match (self.kind, value) {
            (ParamKind::String, Value::String(s)) if !s.trim().is_empty() => {
                Some(Value::String(s.trim().to_string()))
            }
            (ParamKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamKind::Integer, Value::Number(n)) => n.as_i64().map(Value::from),
            (ParamKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        }
    }
}

/// Pattern capture that fills one parameter from task text
#[derive(Debug, Clone)]
pub struct Extraction {
    pub param: String,
    pattern: Regex,
}

impl Extraction {
    pub fn new(param: &str, pattern: &str) -> Result<Self, StewardError> {
        let pattern = Regex::new(pattern).map_err(|e| {
            StewardError::ConfigInvalid(format!("extraction pattern for '{}': {}", param, e))
        })?;
        Ok(Self {
            param: param.to_string(),
            pattern,
        })
    }

    /// First participating capture group of the first match
    pub fn capture(&self, text: &str) -> Option<String> {
        let caps = self.pattern.captures(text)?;
        caps.iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().trim())
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Concrete side effect produced by a tool body
#[derive(Debug)]
pub struct Action {
    pub invocation: Invocation,
    /// Filesystem paths the action reads or writes
    pub paths: Vec<PathBuf>,
    /// Third-party integration the action goes through
    pub integration: Option<String>,
}

impl Action {
    pub fn command<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_invocation(Invocation::command(argv))
    }

    pub fn native<F>(label: impl Into<String>, call: F) -> Self
    where
        F: FnOnce() -> Result<ToolOutput, StewardError> + Send + 'static,
    {
        Self::from_invocation(Invocation::native(label, call))
    }

    fn from_invocation(invocation: Invocation) -> Self {
        Self {
            invocation,
            paths: Vec::new(),
            integration: None,
        }
    }

    /// Run a command in `dir` and record the directory as touched
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.paths.push(dir.clone());
        self.invocation = self.invocation.in_dir(dir);
        self
    }

    pub fn touching(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn via_integration(mut self, name: &str) -> Self {
        self.integration = Some(name.to_string());
        self
    }

    /// The system-level command string, if this action is one
    pub fn command_line(&self) -> Option<String> {
        self.invocation.command_line()
    }

    /// Replace the command line, keeping working directory and touched paths
    pub fn with_command_line(mut self, line: &str) -> Self {
        if let Invocation::Command { argv, .. } = &mut self.invocation {
            *argv = line.split_whitespace().map(str::to_string).collect();
        }
        self
    }
}

/// Tool body: validated arguments in, action out
pub type ToolBody = Arc<dyn Fn(&ToolInput) -> Result<Action, StewardError> + Send + Sync>;

/// A handler-local tool
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub keywords: Vec<Keyword>,
    pub threshold: f64,
    pub extractions: Vec<Extraction>,
    pub params: Vec<ParamSpec>,
    pub operation: Operation,
    body: ToolBody,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("keywords", &self.keywords)
            .field("threshold", &self.threshold)
            .field("params", &self.params)
            .field("operation", &self.operation)
            .finish()
    }
}

impl Tool {
    pub fn new<F>(name: &str, description: &str, operation: Operation, body: F) -> Self
    where
        F: Fn(&ToolInput) -> Result<Action, StewardError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            keywords: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            extractions: Vec::new(),
            params: Vec::new(),
            operation,
            body: Arc::new(body),
        }
    }

    pub fn strong(mut self, terms: &[&str]) -> Self {
        self.keywords.extend(terms.iter().map(|t| Keyword::strong(t)));
        self
    }

    pub fn weak(mut self, terms: &[&str]) -> Self {
        self.keywords.extend(terms.iter().map(|t| Keyword::weak(t)));
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn extract(mut self, param: &str, pattern: &str) -> Result<Self, StewardError> {
        self.extractions.push(Extraction::new(param, pattern)?);
        Ok(self)
    }

    /// Tier 1 confidence: summed weight of keywords present, capped at 1.0
    pub fn score(&self, normalized: &str) -> f64 {
        let total: f64 = self
            .keywords
            .iter()
            .filter(|k| k.found_in(normalized))
            .map(|k| k.weight)
            .sum();
        total.min(1.0)
    }

    /// Raw arguments captured from task text by the extraction rules
    pub fn extract_args(&self, task: &str) -> BTreeMap<String, Value> {
        let mut args = BTreeMap::new();
        for rule in &self.extractions {
            if args.contains_key(&rule.param) {
                continue;
            }
            if let Some(value) = rule.capture(task) {
                args.insert(rule.param.clone(), Value::String(value));
            }
        }
        args
    }

    /// Check `args` against the schema and produce a call
    ///
    /// Values are coerced to their declared kind, defaults fill absent
    /// optional parameters and arguments outside the schema are dropped.
    pub fn validate(&self, args: &BTreeMap<String, Value>) -> Result<ToolInput, StewardError> {
        let mut input = ToolInput::new(&self.name);
        for spec in &self.params {
            match args.get(&spec.name).filter(|v| !v.is_null()) {
                Some(raw) => {
                    let value = spec.coerce(raw).ok_or_else(|| {
                        StewardError::InvalidArgs(format!(
                            "{}: '{}' must be a {}",
                            self.name, spec.name, spec.kind
                        ))
                    })?;
                    input.args.insert(spec.name.clone(), value);
                }
                None if spec.required => {
                    return Err(StewardError::InvalidArgs(format!(
                        "{}: missing required parameter '{}'",
                        self.name, spec.name
                    )));
                }
                None => {
                    if let Some(default) = &spec.default {
                        input.args.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(input)
    }

    /// One-line summary used in model prompts
    pub fn summary(&self) -> String {
        if self.params.is_empty() {
            return format!("{}: {}", self.name, self.description);
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let req = if p.required { "required" } else { "optional" };
                format!("{} {} {}", p.name, p.kind, req)
            })
            .collect();
        format!("{}: {} (args: {})", self.name, self.description, params.join(", "))
    }

    /// Run the body; callers isolate panics
    pub fn build_action(&self, input: &ToolInput) -> Result<Action, StewardError> {
        (self.body)(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(_: &ToolInput) -> Result<Action, StewardError> {
        Ok(Action::native("noop", || Ok(ToolOutput::text("ok"))))
    }

    #[test]
    fn test_keyword_matches_whole_words_only() {
        let k = Keyword::strong("ram");
        assert!(k.found_in("check ram usage"));
        assert!(k.found_in("ram"));
        assert!(k.found_in("how much ram?"));
        assert!(!k.found_in("check program usage"));
        assert!(!k.found_in("rampant"));
    }

    #[test]
    fn test_phrase_keyword() {
        let k = Keyword::strong("Git   Status");
        assert_eq!(k.term, "git status");
        assert!(k.found_in("show git status please"));
        assert!(!k.found_in("git statuses"));
    }

    #[test]
    fn test_score_sums_and_caps() {
        let tool = Tool::new("check_ram", "Memory usage", Operation::Read, noop)
            .strong(&["ram", "memory"])
            .weak(&["usage"]);
        assert_eq!(tool.score("check ram usage"), 1.0);
        assert!((tool.score("show usage") - 0.4).abs() < 1e-9);
        assert_eq!(tool.score("do something"), 0.0);
    }

    #[test]
    fn test_extraction_first_group_wins() {
        let rule = Extraction::new("pattern", r"(?i)named\s+(\S+)|(\*\.\w+)").unwrap();
        assert_eq!(rule.capture("find files named notes.md").as_deref(), Some("notes.md"));
        assert_eq!(rule.capture("find *.rs here").as_deref(), Some("*.rs"));
        assert_eq!(rule.capture("find something"), None);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        assert!(matches!(
            Extraction::new("x", "(unclosed"),
            Err(StewardError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_validate_coerces_and_defaults() {
        let tool = Tool::new("git_log", "History", Operation::Read, noop)
            .param(ParamSpec::optional("limit", ParamKind::Integer).with_default(json!(10)))
            .param(ParamSpec::required("path", ParamKind::String));

        let mut args = BTreeMap::new();
        args.insert("path".to_string(), json!(" . "));
        args.insert("extra".to_string(), json!(true));
        let input = tool.validate(&args).unwrap();
        assert_eq!(input.arg_i64("limit").unwrap(), 10);
        assert_eq!(input.arg_str("path").unwrap(), ".");
        assert!(!input.args.contains_key("extra"));

        args.insert("limit".to_string(), json!("25"));
        assert_eq!(tool.validate(&args).unwrap().arg_i64("limit").unwrap(), 25);
    }

    #[test]
    fn test_validate_rejects_missing_and_mistyped() {
        let tool = Tool::new("ping_host", "Ping", Operation::Execute, noop)
            .param(ParamSpec::required("host", ParamKind::String))
            .param(ParamSpec::optional("count", ParamKind::Integer));

        assert!(matches!(
            tool.validate(&BTreeMap::new()),
            Err(StewardError::InvalidArgs(_))
        ));

        let mut args = BTreeMap::new();
        args.insert("host".to_string(), json!("example.com"));
        args.insert("count".to_string(), json!("many"));
        assert!(matches!(tool.validate(&args), Err(StewardError::InvalidArgs(_))));
    }

    #[test]
    fn test_with_command_line_keeps_cwd() {
        let action = Action::command(["git", "push"]).in_dir("/tmp/repo");
        let action = action.with_command_line("git push --dry-run");
        assert_eq!(action.command_line().as_deref(), Some("git push --dry-run"));
        assert_eq!(action.paths, vec![PathBuf::from("/tmp/repo")]);
        match action.invocation {
            Invocation::Command { cwd, .. } => assert_eq!(cwd, Some(PathBuf::from("/tmp/repo"))),
            other => panic!("unexpected invocation {:?}", other),
        }
    }

    #[test]
    fn test_summary_lists_params() {
        let tool = Tool::new("ping_host", "Ping a host", Operation::Execute, noop)
            .param(ParamSpec::required("host", ParamKind::String));
        assert_eq!(tool.summary(), "ping_host: Ping a host (args: host string required)");
    }
}
