//! Conductor
//!
//! Plans a request into handler steps and drives them to completion.

pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod types;
pub mod workflow;

pub use executor::{Executor, StepRuntime};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunSettings};
pub use planner::{Planner, PlanningInput, RawPlanStep};
pub use types::{CancelToken, Plan, Step, StepStatus};
pub use workflow::{Workflow, WorkflowStep, WorkflowStore};
