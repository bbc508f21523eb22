//! Shared fixtures for integration tests
//!
//! - `ScriptedProvider`: replays canned model replies and counts calls
//! - `RecordingBoundary`: records every invocation; runs native calls for
//!   real and answers commands with a canned line
//! - `shell_handler`: a handler that turns task text into a command line

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use sdk::types::{ToolInput, ToolOutput};
use steward_engine::agent::{DomainHandler, HandlerSet};
use steward_engine::command_executor::{
    ExecOutcome, ExecutionBoundary, Invocation, ProcessBoundary, Sandbox,
};
use steward_engine::conductor::{Orchestrator, RunSettings};
use steward_engine::config::{ExecutionMode, LLMConfig};
use steward_engine::dispatch::{Action, ParamKind, ParamSpec, Tool};
use steward_engine::llm::router::LLMRouter;
use steward_engine::llm::{Completion, LLMError, LLMProvider, Message};
use steward_engine::permissions::{Operation, PermissionManager, PermissionPolicy};
use steward_engine::safety::{Decision, FixedConfirmer};
use steward_engine::store::{AuditRepository, Database};

/// Replays replies in order; errors once they run out
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    calls: Arc<AtomicUsize>,
    tokens_per_call: u32,
}

impl ScriptedProvider {
    pub fn new(replies: &[&str]) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                calls: calls.clone(),
                tokens_per_call: 10,
            },
            calls,
        )
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn estimated_cost(&self, _tokens: usize) -> f64 {
        0.0
    }

    async fn generate(&self, _messages: &[Message]) -> steward_engine::llm::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => Ok(Completion::new(reply, self.tokens_per_call)),
            None => Err(LLMError::ProviderUnavailable("script exhausted".to_string())),
        }
    }
}

pub fn router(provider: ScriptedProvider) -> Arc<LLMRouter> {
    Arc::new(LLMRouter::new(
        vec![Box::new(provider) as Box<dyn LLMProvider>],
        Arc::new(LLMConfig::default()),
    ))
}

/// Records invocations; native calls run, commands are answered with `reply`
pub struct RecordingBoundary {
    pub seen: Mutex<Vec<String>>,
    calls: AtomicUsize,
    reply: String,
    delay: Duration,
}

impl RecordingBoundary {
    pub fn new() -> Self {
        Self::with_reply("ok")
    }

    pub fn with_reply(reply: &str) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            reply: reply.to_string(),
            delay: Duration::ZERO,
        }
    }

    /// Hold every call for `delay` before answering
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionBoundary for RecordingBoundary {
    async fn run(&self, invocation: Invocation, timeout: Duration) -> ExecOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(invocation.describe());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match invocation {
            Invocation::Native { .. } => ProcessBoundary::new().run(invocation, timeout).await,
            Invocation::Command { .. } => {
                ExecOutcome::ok(ToolOutput::text(self.reply.clone()), Duration::ZERO)
            }
        }
    }
}

/// `ShellAgent`: runs the command line named in its task
pub fn shell_handler() -> DomainHandler {
    let tool = Tool::new(
        "run_command",
        "Run a literal command line",
        Operation::Execute,
        |input: &ToolInput| {
            let line = input.arg_str("command")?;
            Ok(Action::command(line.split_whitespace()))
        },
    )
    .strong(&["run", "execute", "rm"])
    .param(ParamSpec::required("command", ParamKind::String))
    .extract("command", r"(?i)^\s*(?:run|execute)\s+(.+)$")
    .unwrap()
    .extract("command", r"^\s*(.+)$")
    .unwrap();

    DomainHandler::new("ShellAgent", "Runs literal command lines")
        .with_tools(vec![tool])
        .unwrap()
}

pub fn handlers() -> HandlerSet {
    let mut set = HandlerSet::builtin().unwrap();
    set.insert(shell_handler()).unwrap();
    set
}

pub fn policy(root: &Path) -> PermissionPolicy {
    PermissionPolicy::new(&[root.to_path_buf()]).with_scope("ShellAgent", &[Operation::Execute])
}

/// Everything a scenario needs, torn down with the temp dir
pub struct Harness {
    pub temp: TempDir,
    pub orchestrator: Orchestrator,
    pub boundary: Arc<RecordingBoundary>,
    pub audit: Arc<AuditRepository>,
    pub llm_calls: Arc<AtomicUsize>,
}

pub struct HarnessBuilder {
    temp: Option<TempDir>,
    replies: Vec<String>,
    boundary: RecordingBoundary,
    decision: Decision,
    mode: ExecutionMode,
    result_cap: usize,
    step_timeout: Duration,
    sandbox: Sandbox,
}

impl HarnessBuilder {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            temp: None,
            replies: replies.iter().map(|r| r.to_string()).collect(),
            boundary: RecordingBoundary::new(),
            decision: Decision::Deny,
            mode: ExecutionMode::Sequential,
            result_cap: 2000,
            step_timeout: Duration::from_secs(5),
            sandbox: Sandbox::disabled(),
        }
    }

    /// Use `temp` as the whitelisted root and database directory
    pub fn temp(mut self, temp: TempDir) -> Self {
        self.temp = Some(temp);
        self
    }

    pub fn boundary(mut self, boundary: RecordingBoundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn decision(mut self, decision: Decision) -> Self {
        self.decision = decision;
        self
    }

    pub fn concurrent(mut self) -> Self {
        self.mode = ExecutionMode::Concurrent;
        self
    }

    pub fn result_cap(mut self, cap: usize) -> Self {
        self.result_cap = cap;
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn sandbox(mut self, sandbox: Sandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub async fn build(self) -> Harness {
        let temp = self.temp.unwrap_or_else(|| TempDir::new().unwrap());
        let db = Database::new(&temp.path().join("steward.db")).await.unwrap();
        let audit = Arc::new(db.audit(self.result_cap));

        let replies: Vec<&str> = self.replies.iter().map(String::as_str).collect();
        let (provider, llm_calls) = ScriptedProvider::new(&replies);
        let boundary = Arc::new(self.boundary);

        let settings = RunSettings {
            mode: self.mode,
            max_concurrency: 4,
            step_timeout: self.step_timeout,
            hint_count: 3,
            min_rating: 3,
        };

        let orchestrator = Orchestrator::builder(handlers(), router(provider), audit.clone())
            .permissions(Arc::new(PermissionManager::new(policy(temp.path()))))
            .boundary(boundary.clone())
            .confirmer(Arc::new(FixedConfirmer(self.decision)))
            .sandbox(self.sandbox)
            .settings(settings)
            .build()
            .unwrap();

        Harness {
            temp,
            orchestrator,
            boundary,
            audit,
            llm_calls,
        }
    }
}

/// `{"steps": [...]}` for the given `(handler, task)` pairs
pub fn plan_reply(steps: &[(&str, &str)]) -> String {
    let steps: Vec<_> = steps
        .iter()
        .map(|(handler, task)| serde_json::json!({ "handler": handler, "task": task }))
        .collect();
    serde_json::json!({ "steps": steps }).to_string()
}
