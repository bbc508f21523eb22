//! Step execution
//!
//! Every step goes through the same pipeline: handler lookup, tool
//! resolution, safety classification, permission checks and finally the
//! execution boundary. Each terminal step is written to the audit trail
//! exactly once. Failures stay local to their step.

use futures::future::join_all;
use sdk::errors::{ErrorReport, StewardError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::agent::HandlerSet;
use crate::command_executor::{ExecutionBoundary, Sandbox};
use crate::conductor::types::{CancelToken, Plan, Step, StepStatus};
use crate::dispatch::Action;
use crate::llm::router::LLMRouter;
use crate::permissions::PermissionManager;
use crate::safety::{Confirmer, Decision, RiskTier, SafetyGuard, Verdict};
use crate::store::{AuditRepository, NewAuditRecord};

const BOUNDARY_GRACE: Duration = Duration::from_millis(500);

/// Shared collaborators of every step
pub struct StepRuntime {
    pub(crate) handlers: HandlerSet,
    pub(crate) llm: Arc<LLMRouter>,
    pub(crate) guard: SafetyGuard,
    pub(crate) permissions: Arc<PermissionManager>,
    pub(crate) boundary: Arc<dyn ExecutionBoundary>,
    pub(crate) confirmer: Arc<dyn Confirmer>,
    pub(crate) audit: Arc<AuditRepository>,
    pub(crate) sandbox: Sandbox,
    pub(crate) step_timeout: Duration,
}

impl StepRuntime {
    /// Drive one PENDING step to a terminal state
    pub async fn run_step(&self, plan_id: &str, step: &mut Step) {
        if !step.transition(StepStatus::Running) {
            return;
        }
        let started = Instant::now();
        info!("{} -> {}: {}", step.id, step.handler, step.task);

        match self.drive(step).await {
            Ok(output) => step.succeed(output),
            Err(report) => {
                warn!("{} failed: {}", step.id, report);
                step.fail_with(report);
            }
        }
        step.duration_ms = started.elapsed().as_millis() as u64;
        self.record(plan_id, step).await;
    }

    async fn drive(&self, step: &mut Step) -> Result<String, ErrorReport> {
        let handler = self
            .handlers
            .get(&step.handler)
            .ok_or_else(|| StewardError::HandlerNotFound(step.handler.clone()))?;

        let resolution = handler.resolve(&step.task, &self.llm).await?;
        step.tool = Some(resolution.tool().to_string());
        step.tier = Some(resolution.tier);
        step.tokens_used = step.tokens_used.saturating_add(resolution.tokens_used);
        debug!(
            "{} resolved to {}.{} via {} ({:.2})",
            step.id,
            step.handler,
            resolution.tool(),
            resolution.tier,
            resolution.confidence
        );

        let action = handler.prepare(&resolution)?;
        let action = self.screen(handler.name(), step, action).await?;

        let policy = self.permissions.snapshot();
        policy.check_operation(handler.name(), resolution.operation)?;
        for path in &action.paths {
            policy.check_path(path, handler.name())?;
        }
        if let Some(integration) = &action.integration {
            policy.check_integration(integration)?;
        }

        // The boundary enforces the timeout itself; the outer bound catches
        // boundaries that do not.
        let outcome = tokio::time::timeout(
            self.step_timeout + BOUNDARY_GRACE,
            handler.execute(action, self.boundary.as_ref(), self.step_timeout),
        )
        .await
        .map_err(|_| StewardError::CommandTimeout(self.step_timeout.as_secs()))?;
        if outcome.success {
            Ok(outcome.output)
        } else {
            Err(outcome.error.unwrap_or_else(|| {
                ErrorReport::from(StewardError::CommandFailed {
                    status: -1,
                    stderr: outcome.output,
                })
            }))
        }
    }

    /// Classify a command action and apply the confirmation decision
    ///
    /// Native actions carry no command string and count as SAFE.
    async fn screen(
        &self,
        handler: &str,
        step: &mut Step,
        action: Action,
    ) -> Result<Action, StewardError> {
        let Some(line) = action.command_line() else {
            step.risk_tier = Some(RiskTier::Safe);
            return Ok(action);
        };

        let verdict = self.analyze(self.guard.assess(&line)).await;
        step.risk_tier = Some(verdict.tier);
        match verdict.tier {
            RiskTier::Safe => {
                if let Some(findings) = &verdict.analysis {
                    warn!("{} lint findings for {}:\n{}", step.id, verdict.action, findings);
                }
                Ok(action)
            }
            RiskTier::Blocked => {
                error!("{} blocked by rule {:?}: {}", step.id, verdict.rule, verdict.action);
                Err(StewardError::ActionBlocked {
                    action: verdict.action,
                    rule: verdict.rule.unwrap_or_default(),
                })
            }
            RiskTier::HighRisk => match self.confirmer.confirm(handler, &verdict).await {
                Decision::Approve => {
                    info!("{} approved: {}", step.id, verdict.action);
                    Ok(self.confine(action))
                }
                Decision::DryRun => match &verdict.preview {
                    Some(preview) => {
                        info!("{} running preview: {}", step.id, preview);
                        Ok(self.confine(action.with_command_line(preview)))
                    }
                    None => Err(StewardError::ConfirmationDeclined(format!(
                        "{} (no dry-run form available)",
                        verdict.action
                    ))),
                },
                Decision::Deny => Err(StewardError::ConfirmationDeclined(verdict.action)),
            },
        }
    }

    /// Attach static analysis findings without blocking the runtime
    async fn analyze(&self, verdict: Verdict) -> Verdict {
        if self.guard.analyzer().is_none() || verdict.tier == RiskTier::Blocked {
            return verdict;
        }
        let guard = self.guard.clone();
        let fallback = verdict.clone();
        match tokio::task::spawn_blocking(move || guard.annotate(verdict)).await {
            Ok(annotated) => annotated,
            Err(e) => {
                warn!("Static analysis failed: {}", e);
                fallback
            }
        }
    }

    /// Wrap an approved HIGH_RISK command in the sandbox, when one is active
    fn confine(&self, mut action: Action) -> Action {
        self.sandbox.wrap(&mut action.invocation);
        action
    }

    /// Append the audit record of a terminal step, once
    pub async fn record(&self, plan_id: &str, step: &mut Step) {
        if step.audited || !step.status.is_terminal() {
            return;
        }
        let entry = NewAuditRecord {
            plan_id: Some(plan_id.to_string()),
            step_id: Some(step.id.clone()),
            handler: step.handler.clone(),
            tool: step.tool.clone(),
            task: step.task.clone(),
            result: step.audit_text(),
            status: step.status.as_str().to_string(),
            risk_tier: step.risk_tier.map(|t| t.to_string()),
            error_code: step.error.as_ref().map(|e| e.code.name().to_string()),
            tokens_used: step.tokens_used,
        };
        match self.audit.record(entry).await {
            Ok(_) => step.audited = true,
            Err(e) => error!("Failed to audit {}: {:#}", step.id, e),
        }
    }

    async fn skip(&self, plan_id: &str, step: &mut Step) {
        debug!("{} skipped after cancellation", step.id);
        step.skip();
        self.record(plan_id, step).await;
    }
}

/// Runs the steps of a plan in order
pub struct Executor {
    runtime: Arc<StepRuntime>,
}

impl Executor {
    pub fn new(runtime: Arc<StepRuntime>) -> Self {
        Self { runtime }
    }

    /// One step at a time, in plan order
    pub async fn run_sequential(&self, mut plan: Plan, cancel: &CancelToken) -> Plan {
        let plan_id = plan.id.clone();
        for step in plan.steps.iter_mut() {
            if step.status.is_terminal() {
                self.runtime.record(&plan_id, step).await;
                continue;
            }
            if cancel.is_cancelled() {
                self.runtime.skip(&plan_id, step).await;
                continue;
            }
            self.runtime.run_step(&plan_id, step).await;
        }
        plan
    }

    /// Up to `max_concurrency` steps at once; results keep plan order
    pub async fn run_concurrent(
        &self,
        mut plan: Plan,
        cancel: &CancelToken,
        max_concurrency: usize,
    ) -> Plan {
        let plan_id = plan.id.clone();
        let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(plan.steps.len());

        for step in plan.steps.iter_mut() {
            if step.status.is_terminal() {
                self.runtime.record(&plan_id, step).await;
                continue;
            }
            let fallback = step.clone();
            let mut owned = step.clone();
            let runtime = self.runtime.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            let plan_id = plan_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        runtime.skip(&plan_id, &mut owned).await;
                        return owned;
                    }
                };
                if cancel.is_cancelled() {
                    runtime.skip(&plan_id, &mut owned).await;
                } else {
                    runtime.run_step(&plan_id, &mut owned).await;
                }
                owned
            });
            handles.push((fallback, handle));
        }

        let (fallbacks, joins): (Vec<Step>, Vec<_>) = handles.into_iter().unzip();
        for (mut fallback, joined) in fallbacks.into_iter().zip(join_all(joins).await) {
            let index = fallback.index;
            let finished = match joined {
                Ok(step) => step,
                Err(e) => {
                    error!("{} task aborted: {}", fallback.id, e);
                    if fallback.transition(StepStatus::Running) {
                        fallback.fail(&StewardError::HandlerCrashed(e.to_string()));
                    }
                    self.runtime.record(&plan_id, &mut fallback).await;
                    fallback
                }
            };
            if let Some(slot) = plan.steps.get_mut(index) {
                *slot = finished;
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_executor::{ExecOutcome, Invocation};
    use crate::config::LLMConfig;
    use crate::llm::{Completion, LLMProvider, Message};
    use crate::permissions::PermissionPolicy;
    use crate::store::Database;
    use async_trait::async_trait;
    use sdk::errors::ErrorCode;
    use sdk::types::ToolOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct SilentProvider;

    #[async_trait]
    impl LLMProvider for SilentProvider {
        fn name(&self) -> &str {
            "silent"
        }
        fn is_local(&self) -> bool {
            true
        }
        fn estimated_cost(&self, _tokens: usize) -> f64 {
            0.0
        }
        async fn generate(&self, _messages: &[Message]) -> crate::llm::Result<Completion> {
            Ok(Completion::new(r#"{"error":"not needed"}"#, 0))
        }
    }

    #[derive(Default)]
    struct CountingBoundary {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionBoundary for CountingBoundary {
        async fn run(&self, invocation: Invocation, _timeout: Duration) -> ExecOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ExecOutcome::ok(
                ToolOutput::text(format!("ran {}", invocation.describe())),
                Duration::ZERO,
            )
        }
    }

    async fn runtime(
        confirmer: Decision,
    ) -> (TempDir, Arc<StepRuntime>, Arc<CountingBoundary>, Arc<AuditRepository>) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("exec.db")).await.unwrap();
        let audit = Arc::new(db.audit(2000));
        let boundary = Arc::new(CountingBoundary::default());
        let llm = Arc::new(LLMRouter::new(
            vec![Box::new(SilentProvider)],
            Arc::new(LLMConfig::default()),
        ));
        let runtime = Arc::new(StepRuntime {
            handlers: HandlerSet::builtin().unwrap(),
            llm,
            guard: SafetyGuard::new().unwrap(),
            permissions: Arc::new(PermissionManager::new(PermissionPolicy::new(&[temp
                .path()
                .to_path_buf()]))),
            boundary: boundary.clone(),
            confirmer: Arc::new(crate::safety::FixedConfirmer(confirmer)),
            audit: audit.clone(),
            sandbox: Sandbox::disabled(),
            step_timeout: Duration::from_secs(5),
        });
        (temp, runtime, boundary, audit)
    }

    #[tokio::test]
    async fn test_safe_step_runs_and_is_audited() {
        let (_temp, runtime, boundary, audit) = runtime(Decision::Deny).await;
        let mut step = Step::new(0, "SysAgent", "check ram usage");
        runtime.run_step("p", &mut step).await;

        assert_eq!(step.status, StepStatus::Success);
        assert_eq!(step.risk_tier, Some(RiskTier::Safe));
        assert_eq!(boundary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(audit.for_plan("p").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_high_risk_denied_never_reaches_boundary() {
        let (_temp, runtime, boundary, audit) = runtime(Decision::Deny).await;
        let mut step = Step::new(0, "SysAgent", "restart the nginx service");
        runtime.run_step("p", &mut step).await;

        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.risk_tier, Some(RiskTier::HighRisk));
        assert_eq!(step.error.as_ref().unwrap().code, ErrorCode::ConfirmationDeclined);
        assert_eq!(boundary.calls.load(Ordering::SeqCst), 0);

        let records = audit.for_plan("p").await.unwrap();
        assert_eq!(records[0].status, "failed");
        assert_eq!(records[0].risk_tier.as_deref(), Some("HIGH_RISK"));
    }

    #[tokio::test]
    async fn test_high_risk_approved_runs() {
        let (_temp, runtime, boundary, _audit) = runtime(Decision::Approve).await;
        let mut step = Step::new(0, "SysAgent", "restart the nginx service");
        runtime.run_step("p", &mut step).await;

        assert_eq!(step.status, StepStatus::Success);
        assert_eq!(boundary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_record_is_written_once() {
        let (_temp, runtime, _boundary, audit) = runtime(Decision::Deny).await;
        let mut step = Step::new(0, "GhostAgent", "x");
        step.fail(&StewardError::HandlerNotFound("GhostAgent".into()));
        runtime.record("p", &mut step).await;
        runtime.record("p", &mut step).await;
        assert_eq!(audit.for_plan("p").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_plan_skips_pending_steps() {
        let (_temp, runtime, boundary, audit) = runtime(Decision::Deny).await;
        let plan = Plan::new(
            "x",
            vec![
                Step::new(0, "SysAgent", "check ram usage"),
                Step::new(1, "SysAgent", "check cpu usage"),
            ],
            0,
        );
        let cancel = CancelToken::new();
        cancel.cancel();

        let plan = Executor::new(runtime).run_concurrent(plan, &cancel, 2).await;
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Skipped));
        assert_eq!(boundary.calls.load(Ordering::SeqCst), 0);
        assert_eq!(audit.for_plan(&plan.id).await.unwrap().len(), 2);
    }
}
