//! Plan and step types

use sdk::errors::{ErrorReport, StewardError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::dispatch::Tier;
use crate::safety::RiskTier;

/// Step lifecycle
///
/// `Pending → Running → {Success, Failed}`, `Pending → Skipped` and
/// `Pending → Failed`. Nothing returns to `Pending` and terminal states
/// never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Pending, Skipped) | (Running, Success) | (Running, Failed)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One handler invocation within a plan
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub id: String,
    pub index: usize,
    pub handler: String,
    pub task: String,
    pub status: StepStatus,
    pub tool: Option<String>,
    pub tier: Option<Tier>,
    pub risk_tier: Option<RiskTier>,
    pub result: Option<String>,
    pub error: Option<ErrorReport>,
    pub tokens_used: u32,
    pub duration_ms: u64,
    #[serde(skip)]
    pub(crate) audited: bool,
}

impl Step {
    pub fn new(index: usize, handler: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: format!("step_{}", index + 1),
            index,
            handler: handler.into(),
            task: task.into(),
            status: StepStatus::Pending,
            tool: None,
            tier: None,
            risk_tier: None,
            result: None,
            error: None,
            tokens_used: 0,
            duration_ms: 0,
            audited: false,
        }
    }

    /// Apply a transition; invalid transitions are ignored
    pub fn transition(&mut self, next: StepStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            tracing::warn!(
                "{}: ignoring transition {} -> {}",
                self.id,
                self.status,
                next
            );
            false
        }
    }

    pub fn succeed(&mut self, output: impl Into<String>) {
        if self.transition(StepStatus::Success) {
            self.result = Some(output.into());
        }
    }

    pub fn fail(&mut self, error: &StewardError) {
        self.fail_with(ErrorReport::from(error));
    }

    pub fn fail_with(&mut self, report: ErrorReport) {
        if self.transition(StepStatus::Failed) {
            self.error = Some(report);
        }
    }

    pub fn skip(&mut self) {
        if self.transition(StepStatus::Skipped) {
            self.error = Some(ErrorReport::from(&StewardError::StepCancelled));
        }
    }

    /// Text persisted in the audit trail
    pub fn audit_text(&self) -> String {
        match (&self.result, &self.error) {
            (Some(result), _) => result.clone(),
            (None, Some(error)) => error.to_user_string(),
            (None, None) => String::new(),
        }
    }
}

/// Ordered steps from one planning call
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: String,
    pub task: String,
    pub steps: Vec<Step>,
    /// Planning-level failure; the step list is empty when set
    pub error: Option<ErrorReport>,
    pub tokens_used: u32,
    pub created_at: i64,
}

impl Plan {
    pub fn new(task: impl Into<String>, steps: Vec<Step>, tokens_used: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            steps,
            error: None,
            tokens_used,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Empty plan carrying a planning error
    pub fn failed(task: impl Into<String>, error: &StewardError, tokens_used: u32) -> Self {
        let mut plan = Self::new(task, Vec::new(), tokens_used);
        plan.error = Some(ErrorReport::from(error));
        plan
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn total_tokens(&self) -> u32 {
        self.tokens_used + self.steps.iter().map(|s| s.tokens_used).sum::<u32>()
    }
}

/// User-level abort signal
///
/// Steps not yet started when it fires are skipped; running steps finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
