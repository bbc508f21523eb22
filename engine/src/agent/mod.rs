//! Domain handlers
//!
//! A handler is a domain specialist that owns a [`ToolRegistry`]. The
//! orchestrator only sees the [`Handler`] trait; the built-in specialists
//! are [`DomainHandler`]s assembled from the tool sets in [`crate::tools`].

use async_trait::async_trait;
use sdk::errors::StewardError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::command_executor::{ExecOutcome, ExecutionBoundary};
use crate::dispatch::{Action, Resolution, Tool, ToolRegistry};
use crate::llm::router::LLMRouter;

/// Capability interface every handler satisfies
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// One-line description used in the planning directory
    fn capabilities(&self) -> &str;

    fn register_tool(&mut self, tool: Tool) -> Result<(), StewardError>;

    fn tools(&self) -> &ToolRegistry;

    /// Resolve task text to a tool call (Tier 1, then Tier 2)
    async fn resolve(&self, task: &str, llm: &LLMRouter) -> Result<Resolution, StewardError> {
        self.tools().resolve(self.name(), task, llm).await
    }

    /// Build the action for a resolved call
    ///
    /// A panicking tool body becomes `HandlerCrashed`.
    fn prepare(&self, resolution: &Resolution) -> Result<Action, StewardError> {
        let tool = self
            .tools()
            .get(resolution.tool())
            .ok_or_else(|| StewardError::ToolNotFound {
                handler: self.name().to_string(),
                tool: resolution.tool().to_string(),
            })?;

        match catch_unwind(AssertUnwindSafe(|| tool.build_action(&resolution.input))) {
            Ok(result) => result,
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool body panicked".to_string());
                tracing::error!("{}.{} panicked: {}", self.name(), tool.name, detail);
                Err(StewardError::HandlerCrashed(format!(
                    "{}.{}: {}",
                    self.name(),
                    tool.name,
                    detail
                )))
            }
        }
    }

    /// Run a prepared action at the execution boundary
    async fn execute(
        &self,
        action: Action,
        boundary: &dyn ExecutionBoundary,
        timeout: Duration,
    ) -> ExecOutcome {
        boundary.run(action.invocation, timeout).await
    }
}

/// Handler built from a name, a description and a tool set
#[derive(Debug, Clone)]
pub struct DomainHandler {
    name: String,
    capabilities: String,
    registry: ToolRegistry,
}

impl DomainHandler {
    pub fn new(name: &str, capabilities: &str) -> Self {
        Self {
            name: name.to_string(),
            capabilities: capabilities.to_string(),
            registry: ToolRegistry::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Result<Self, StewardError> {
        for tool in tools {
            self.register_tool(tool)?;
        }
        Ok(self)
    }
}

#[async_trait]
impl Handler for DomainHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &str {
        &self.capabilities
    }

    fn register_tool(&mut self, tool: Tool) -> Result<(), StewardError> {
        self.registry.register(tool)
    }

    fn tools(&self) -> &ToolRegistry {
        &self.registry
    }
}

/// Fixed collection of handlers, in registration order
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// SysAgent, FileAgent, GitAgent and NetAgent
    pub fn builtin() -> Result<Self, StewardError> {
        let mut set = Self::new();
        set.insert(crate::tools::system::handler()?)?;
        set.insert(crate::tools::filesystem::handler()?)?;
        set.insert(crate::tools::git::handler()?)?;
        set.insert(crate::tools::network::handler()?)?;
        set.insert(crate::tools::docker::handler()?)?;
        Ok(set)
    }

    pub fn insert(&mut self, handler: impl Handler + 'static) -> Result<(), StewardError> {
        self.insert_arc(Arc::new(handler))
    }

    pub fn insert_arc(&mut self, handler: Arc<dyn Handler>) -> Result<(), StewardError> {
        if self.get(handler.name()).is_some() {
            return Err(StewardError::ConfigInvalid(format!(
                "handler '{}' registered twice",
                handler.name()
            )));
        }
        self.handlers.push(handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.handlers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// One line per handler: name, capabilities and tool names
    pub fn directory(&self) -> String {
        self.handlers
            .iter()
            .map(|h| {
                let tools: Vec<&str> = h.tools().iter().map(|t| t.name.as_str()).collect();
                format!("- {}: {} [tools: {}]", h.name(), h.capabilities(), tools.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Tier;
    use crate::permissions::Operation;
    use sdk::errors::{ErrorCode, StewardErrorExt};
    use sdk::types::ToolInput;

    fn handler_with_panicking_tool() -> DomainHandler {
        DomainHandler::new("CrashAgent", "Crashes")
            .with_tools(vec![Tool::new(
                "explode",
                "Always panics",
                Operation::Read,
                |_input: &ToolInput| -> Result<Action, StewardError> { panic!("kaboom") },
            )
            .strong(&["explode"])])
            .unwrap()
    }

    #[test]
    fn test_panicking_body_becomes_handler_crashed() {
        let handler = handler_with_panicking_tool();
        let resolution = handler.tools().tier1("explode now").unwrap();
        assert_eq!(resolution.tier, Tier::Keyword);

        let err = handler.prepare(&resolution).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AgentCrashed);
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn test_builtin_set_and_directory() {
        let set = HandlerSet::builtin().unwrap();
        assert_eq!(
            set.names(),
            vec!["SysAgent", "FileAgent", "GitAgent", "NetAgent", "DockerAgent"]
        );
        let directory = set.directory();
        assert_eq!(directory.lines().count(), 5);
        assert!(directory.contains("check_ram"));
        assert!(directory.contains("git_status"));
        assert!(set.get("GhostAgent").is_none());
    }

    #[test]
    fn test_duplicate_handler_rejected() {
        let mut set = HandlerSet::new();
        set.insert(DomainHandler::new("A", "a")).unwrap();
        assert!(set.insert(DomainHandler::new("A", "again")).is_err());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_prepare_unknown_tool() {
        let handler = DomainHandler::new("Empty", "nothing");
        let resolution = Resolution {
            input: ToolInput::new("missing"),
            operation: Operation::Read,
            tier: Tier::Model,
            confidence: 0.0,
            tokens_used: 0,
        };
        assert!(matches!(
            handler.prepare(&resolution),
            Err(StewardError::ToolNotFound { .. })
        ));
    }
}
