//! Planner
//!
//! Turns a request into an ordered list of `(handler, task)` steps with a
//! single model call. The reply must be `{"steps": [{"handler", "task"}]}`;
//! anything else counts as a parse failure and is retried exactly once.

use sdk::errors::StewardError;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::HandlerSet;
use crate::conductor::types::{Plan, Step};
use crate::llm::router::LLMRouter;
use crate::llm::{extract_json_object, Message};
use crate::store::SimilarFeedback;

/// Parse attempts per planning call
const MAX_PARSE_ATTEMPTS: usize = 2;

#[derive(Debug, Deserialize)]
struct RawPlan {
    steps: Vec<RawPlanStep>,
}

/// Intermediate deserialization type for model JSON output
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPlanStep {
    #[serde(alias = "agent")]
    pub handler: String,
    pub task: String,
}

/// Everything the planning prompt is built from
#[derive(Debug, Clone, Default)]
pub struct PlanningInput<'a> {
    pub task: &'a str,
    pub context: &'a str,
    pub hints: &'a [SimilarFeedback],
    pub directory: &'a str,
}

pub struct Planner {
    llm: Arc<LLMRouter>,
}

impl Planner {
    pub fn new(llm: Arc<LLMRouter>) -> Self {
        Self { llm }
    }

    pub fn messages(input: &PlanningInput<'_>) -> Vec<Message> {
        let hints = if input.hints.is_empty() {
            "none".to_string()
        } else {
            input
                .hints
                .iter()
                .map(|h| {
                    format!(
                        "- \"{}\" -> {}.{} (rated {}/5)",
                        h.record.query, h.record.handler, h.record.tool, h.record.rating
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let system = format!(
            "You plan work for a local system assistant. Split the user's request into \
             steps. Each step goes to exactly one of these handlers:\n{}\n\n\
             Current system state:\n{}\n\n\
             Similar past requests the user rated well:\n{}\n\n\
             Reply with JSON only, in this shape:\n\
             {{\"steps\": [{{\"handler\": \"<handler name>\", \"task\": \"<instruction for that handler>\"}}]}}\n\
             Use as few steps as possible. Write each task so it makes sense on its own.",
            input.directory, input.context, hints
        );

        vec![Message::system(system), Message::user(input.task)]
    }

    /// Parse a planning reply, tolerating code fences and surrounding prose
    pub fn parse(content: &str) -> Result<Vec<RawPlanStep>, StewardError> {
        let value = extract_json_object(content).ok_or_else(|| {
            StewardError::LLMInvalidJson("planning reply contains no JSON object".to_string())
        })?;
        let raw: RawPlan = serde_json::from_value(value)
            .map_err(|e| StewardError::LLMInvalidJson(format!("planning reply: {}", e)))?;

        raw.steps
            .into_iter()
            .map(|s| {
                let handler = s.handler.trim().to_string();
                let task = s.task.trim().to_string();
                if handler.is_empty() || task.is_empty() {
                    return Err(StewardError::LLMInvalidJson(
                        "planning step with empty handler or task".to_string(),
                    ));
                }
                Ok(RawPlanStep { handler, task })
            })
            .collect()
    }

    /// Ask the model for a plan
    ///
    /// Never fails: a transport error or a second parse failure yields an
    /// empty plan carrying `PlanningFailed`. Steps naming unknown handlers
    /// are marked FAILED immediately; the rest stay PENDING.
    pub async fn plan(&self, input: &PlanningInput<'_>, handlers: &HandlerSet) -> Plan {
        let messages = Self::messages(input);
        let mut tokens = 0u32;
        let mut last_error = String::new();

        for attempt in 1..=MAX_PARSE_ATTEMPTS {
            let (completion, provider) = match self.llm.call(&messages).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Planning call failed: {}", e);
                    let err = StewardError::PlanningFailed(StewardError::from(e).to_string());
                    return Plan::failed(input.task, &err, tokens);
                }
            };
            tokens = tokens.saturating_add(completion.tokens);

            match Self::parse(&completion.content) {
                Ok(raw) => {
                    info!(
                        "Planned {} step(s) via {} on attempt {}",
                        raw.len(),
                        provider,
                        attempt
                    );
                    return Self::build(input.task, raw, tokens, handlers);
                }
                Err(e) => {
                    warn!("Plan parse failed on attempt {}: {}", attempt, e);
                    debug!("Unparseable planning reply: {}", completion.content);
                    last_error = e.to_string();
                }
            }
        }

        let err = StewardError::PlanningFailed(format!(
            "no usable plan after {} attempts ({})",
            MAX_PARSE_ATTEMPTS, last_error
        ));
        Plan::failed(input.task, &err, tokens)
    }

    fn build(task: &str, raw: Vec<RawPlanStep>, tokens: u32, handlers: &HandlerSet) -> Plan {
        let steps = raw
            .into_iter()
            .enumerate()
            .map(|(index, r)| {
                let mut step = Step::new(index, r.handler, r.task);
                if handlers.get(&step.handler).is_none() {
                    warn!("{} names unknown handler {}", step.id, step.handler);
                    let err = StewardError::HandlerNotFound(step.handler.clone());
                    step.fail(&err);
                }
                step
            })
            .collect::<Vec<_>>();
        Plan::new(task, steps, tokens)
    }
}
