//! Orchestrator
//!
//! Explicit context object wiring planner, handlers, safety, permissions,
//! execution boundary, audit and feedback together. Everything is passed in
//! through the builder; nothing is global.

use sdk::errors::StewardError;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agent::HandlerSet;
use crate::command_executor::{ExecutionBoundary, ProcessBoundary, Sandbox};
use crate::conductor::executor::{Executor, StepRuntime};
use crate::conductor::planner::{Planner, PlanningInput};
use crate::conductor::types::{CancelToken, Plan, StepStatus};
use crate::conductor::workflow::Workflow;
use crate::config::{Config, ExecutionMode};
use crate::context::ContextBuilder;
use crate::llm::router::LLMRouter;
use crate::permissions::{PermissionManager, PermissionPolicy};
use crate::safety::{Confirmer, Decision, FixedConfirmer, SafetyGuard};
use crate::store::{AuditRepository, FeedbackRepository, SimilarFeedback};

/// Scheduling and planning knobs
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub mode: ExecutionMode,
    pub max_concurrency: usize,
    pub step_timeout: Duration,
    pub hint_count: usize,
    pub min_rating: i64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.execution.mode,
            max_concurrency: config.execution.max_concurrency.max(1),
            step_timeout: Duration::from_secs(config.execution.step_timeout_secs),
            hint_count: config.feedback.hint_count,
            min_rating: i64::from(config.feedback.min_rating),
        }
    }
}

pub struct OrchestratorBuilder {
    handlers: HandlerSet,
    llm: Arc<LLMRouter>,
    audit: Arc<AuditRepository>,
    guard: Option<SafetyGuard>,
    permissions: Option<Arc<PermissionManager>>,
    boundary: Option<Arc<dyn ExecutionBoundary>>,
    confirmer: Option<Arc<dyn Confirmer>>,
    feedback: Option<Arc<FeedbackRepository>>,
    context: Option<ContextBuilder>,
    sandbox: Sandbox,
    settings: RunSettings,
}

impl OrchestratorBuilder {
    pub fn guard(mut self, guard: SafetyGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn permissions(mut self, permissions: Arc<PermissionManager>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn boundary(mut self, boundary: Arc<dyn ExecutionBoundary>) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    pub fn feedback(mut self, feedback: Arc<FeedbackRepository>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn context(mut self, context: ContextBuilder) -> Self {
        self.context = Some(context);
        self
    }

    /// Confine approved HIGH_RISK commands; off unless set
    pub fn sandbox(mut self, sandbox: Sandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Fill unset collaborators with defaults
    ///
    /// HIGH_RISK actions are declined unless a confirmer is supplied.
    pub fn build(self) -> Result<Orchestrator, StewardError> {
        let guard = match self.guard {
            Some(guard) => guard,
            None => SafetyGuard::new()?,
        };
        let permissions = self.permissions.unwrap_or_else(|| {
            Arc::new(PermissionManager::new(PermissionPolicy::from_config(
                &Config::default(),
            )))
        });
        let boundary = self
            .boundary
            .unwrap_or_else(|| Arc::new(ProcessBoundary::new()));
        let confirmer = self
            .confirmer
            .unwrap_or_else(|| Arc::new(FixedConfirmer(Decision::Deny)));
        let context = self
            .context
            .unwrap_or_else(|| ContextBuilder::new(Arc::new(ProcessBoundary::new())));

        let runtime = Arc::new(StepRuntime {
            handlers: self.handlers,
            llm: self.llm.clone(),
            guard,
            permissions,
            boundary,
            confirmer,
            audit: self.audit,
            sandbox: self.sandbox,
            step_timeout: self.settings.step_timeout,
        });

        Ok(Orchestrator {
            planner: Planner::new(self.llm),
            executor: Executor::new(runtime.clone()),
            runtime,
            feedback: self.feedback,
            context,
            settings: self.settings,
        })
    }
}

pub struct Orchestrator {
    planner: Planner,
    executor: Executor,
    runtime: Arc<StepRuntime>,
    feedback: Option<Arc<FeedbackRepository>>,
    context: ContextBuilder,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn builder(
        handlers: HandlerSet,
        llm: Arc<LLMRouter>,
        audit: Arc<AuditRepository>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            handlers,
            llm,
            audit,
            guard: None,
            permissions: None,
            boundary: None,
            confirmer: None,
            feedback: None,
            context: None,
            sandbox: Sandbox::disabled(),
            settings: RunSettings::default(),
        }
    }

    pub fn handlers(&self) -> &HandlerSet {
        &self.runtime.handlers
    }

    pub fn guard(&self) -> &SafetyGuard {
        &self.runtime.guard
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.runtime.permissions
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Produce a plan with one model call (two if the first reply is unparseable)
    pub async fn plan(&self, task: &str) -> Plan {
        let context = if ContextBuilder::categories_for(task).is_empty() {
            "none".to_string()
        } else {
            self.context.snapshot(task).await.render()
        };
        let hints = self.hints(task).await;
        let directory = self.runtime.handlers.directory();

        let input = PlanningInput {
            task,
            context: &context,
            hints: &hints,
            directory: &directory,
        };
        self.planner.plan(&input, &self.runtime.handlers).await
    }

    async fn hints(&self, task: &str) -> Vec<SimilarFeedback> {
        let Some(feedback) = &self.feedback else {
            return Vec::new();
        };
        match feedback
            .find_similar(task, self.settings.hint_count, self.settings.min_rating)
            .await
        {
            Ok(hints) => hints,
            Err(e) => {
                warn!("Feedback lookup failed, planning without hints: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Run every step of `plan` in the configured mode
    pub async fn execute(&self, plan: Plan, cancel: &CancelToken) -> Plan {
        let plan = match self.settings.mode {
            ExecutionMode::Sequential => self.executor.run_sequential(plan, cancel).await,
            ExecutionMode::Concurrent => {
                self.executor
                    .run_concurrent(plan, cancel, self.settings.max_concurrency)
                    .await
            }
        };
        info!(
            "Plan {} finished: {} succeeded, {} failed, {} skipped",
            plan.id,
            plan.count(StepStatus::Success),
            plan.count(StepStatus::Failed),
            plan.count(StepStatus::Skipped)
        );
        plan
    }

    /// Plan, then execute
    pub async fn run(&self, task: &str, cancel: &CancelToken) -> Plan {
        let plan = self.plan(task).await;
        if plan.error.is_some() {
            return plan;
        }
        self.execute(plan, cancel).await
    }

    /// Execute a saved workflow without a planning call
    ///
    /// Unknown handlers fail their step up front, as they do in a planned run.
    pub async fn run_workflow(
        &self,
        workflow: &Workflow,
        vars: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Plan {
        let mut plan = match workflow.instantiate(vars) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Workflow {} not started: {}", workflow.name, e);
                return Plan::failed(format!("workflow {}", workflow.name), &e, 0);
            }
        };
        for step in &mut plan.steps {
            if self.runtime.handlers.get(&step.handler).is_none() {
                let err = StewardError::HandlerNotFound(step.handler.clone());
                step.fail(&err);
            }
        }
        info!("Running workflow {} ({} step(s))", workflow.name, plan.steps.len());
        self.execute(plan, cancel).await
    }
}
