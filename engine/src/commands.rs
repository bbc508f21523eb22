//! Command handlers for CLI operations
//!
//! - run: plan and execute a request
//! - plan: plan only
//! - classify / check-path: safety and permission verdicts
//! - handlers: the handler directory
//! - history / stats: audit trail views
//! - rate: feedback on a past routing decision
//! - explain: breakdown of a command line
//! - workflow: saved plans

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::HandlerSet;
use crate::command_executor::Sandbox;
use crate::conductor::{
    CancelToken, Orchestrator, Plan, RunSettings, StepStatus, WorkflowStore,
};
use crate::config::{expand_path, ConfirmPolicy, Config, EmbedderKind, ExecutionMode};
use crate::explain::Explainer;
use crate::llm::embedding::{EmbeddingProvider, HashingEmbedder, OllamaEmbedder};
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::router::LLMRouter;
use crate::llm::LLMProvider;
use crate::permissions::{PermissionManager, PermissionPolicy};
use crate::safety::{
    Confirmer, Decision, FixedConfirmer, RiskTier, SafetyGuard, Shellcheck, TerminalConfirmer,
    Verdict,
};
use crate::store::Database;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Per-invocation overrides from `steward run`
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub concurrent: bool,
    pub approve: bool,
    pub dry_run: bool,
}

fn db_path(config: &Config) -> Result<PathBuf> {
    let data_dir = expand_path(&config.core.data_dir)?;
    Ok(data_dir.join("steward.db"))
}

async fn open_database(config: &Config) -> Result<Database> {
    let path = db_path(config)?;
    Database::new(&path).await.context("Failed to open database")
}

/// Ollama always; the OpenAI-compatible provider only when its key is set
pub fn build_router(config: &Config) -> Arc<LLMRouter> {
    let mut providers: Vec<Box<dyn LLMProvider>> = vec![Box::new(OllamaProvider::new(
        config.llm.ollama.base_url.clone(),
        config.llm.ollama.model.clone(),
    ))];

    match OpenAIProvider::from_env(config.llm.openai.clone()) {
        Some(provider) => providers.push(Box::new(provider)),
        None => tracing::debug!(
            "{} not set, OpenAI provider disabled",
            config.llm.openai.api_key_env
        ),
    }

    Arc::new(LLMRouter::new(providers, Arc::new(config.llm.clone())))
}

pub fn build_embedder(config: &Config) -> Arc<dyn EmbeddingProvider> {
    match config.feedback.embedder {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
        EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
            config.llm.ollama.base_url.clone(),
            config.llm.ollama.embedding_model.clone(),
        )),
    }
}

fn build_confirmer(config: &Config, options: RunOptions) -> Arc<dyn Confirmer> {
    if options.approve {
        return Arc::new(FixedConfirmer(Decision::Approve));
    }
    if options.dry_run {
        return Arc::new(FixedConfirmer(Decision::DryRun));
    }
    match config.execution.confirm {
        ConfirmPolicy::Ask => Arc::new(TerminalConfirmer::new()),
        ConfirmPolicy::Approve => Arc::new(FixedConfirmer(Decision::Approve)),
        ConfirmPolicy::Deny => Arc::new(FixedConfirmer(Decision::Deny)),
        ConfirmPolicy::DryRun => Arc::new(FixedConfirmer(Decision::DryRun)),
    }
}

/// The guard, with shellcheck attached when enabled and installed
pub fn build_guard(config: &Config) -> Result<SafetyGuard> {
    let guard = SafetyGuard::new()?;
    if !config.execution.static_analysis {
        return Ok(guard);
    }
    Ok(match Shellcheck::detect() {
        Some(analyzer) => guard.with_analyzer(Arc::new(analyzer)),
        None => {
            tracing::debug!("shellcheck not found, static analysis disabled");
            guard
        }
    })
}

fn build_orchestrator(
    config: &Config,
    db: &Database,
    options: RunOptions,
) -> Result<Orchestrator> {
    let mut settings = RunSettings::from_config(config);
    if options.concurrent {
        settings.mode = ExecutionMode::Concurrent;
    }

    let orchestrator = Orchestrator::builder(
        HandlerSet::builtin()?,
        build_router(config),
        Arc::new(db.audit(config.execution.result_cap_bytes)),
    )
    .permissions(Arc::new(PermissionManager::new(
        PermissionPolicy::from_config(config),
    )))
    .guard(build_guard(config)?)
    .confirmer(build_confirmer(config, options))
    .sandbox(Sandbox::detect(config.execution.sandbox))
    .feedback(Arc::new(db.feedback(build_embedder(config))))
    .settings(settings)
    .build()?;
    Ok(orchestrator)
}

fn print_plan(plan: &Plan, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(plan)?),
        OutputFormat::Text => {
            if let Some(error) = &plan.error {
                println!("✗ {}", error.to_user_string());
                return Ok(());
            }
            println!("Plan {} ({} step(s))", plan.id, plan.steps.len());
            for (i, step) in plan.steps.iter().enumerate() {
                let tool = match (&step.tool, step.tier) {
                    (Some(tool), Some(tier)) => format!(" {} via {}", tool, tier),
                    _ => String::new(),
                };
                let risk = step
                    .risk_tier
                    .filter(|t| *t != RiskTier::Safe)
                    .map(|t| format!(" [{}]", t))
                    .unwrap_or_default();
                println!(
                    "  {}. [{}] {}{}{}: {}",
                    i + 1,
                    step.status.as_str().to_uppercase(),
                    step.handler,
                    tool,
                    risk,
                    step.task
                );
                if let Some(result) = &step.result {
                    for line in result.lines() {
                        println!("       {}", line);
                    }
                }
                if let Some(error) = &step.error {
                    for line in error.to_user_string().lines() {
                        println!("       {}", line);
                    }
                }
            }
            println!();
            println!(
                "{} succeeded, {} failed, {} skipped, {} tokens",
                plan.count(StepStatus::Success),
                plan.count(StepStatus::Failed),
                plan.count(StepStatus::Skipped),
                plan.total_tokens()
            );
        }
    }
    Ok(())
}

/// Ctrl-C cancels `cancel`; abort the handle once the run is over
fn watch_interrupt(cancel: &CancelToken) -> tokio::task::JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, skipping remaining steps");
            cancel.cancel();
        }
    })
}

/// Plan and execute; Ctrl-C skips steps that have not started yet
pub async fn handle_run(
    task: String,
    options: RunOptions,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let db = open_database(config).await?;
    let orchestrator = build_orchestrator(config, &db, options)?;

    let cancel = CancelToken::new();
    let watcher = watch_interrupt(&cancel);
    let plan = orchestrator.run(&task, &cancel).await;
    watcher.abort();
    print_plan(&plan, format)?;
    db.close().await?;

    if let Some(error) = &plan.error {
        anyhow::bail!("{}", error);
    }
    Ok(())
}

pub async fn handle_plan(task: String, config: &Config, format: OutputFormat) -> Result<()> {
    let db = open_database(config).await?;
    let orchestrator = build_orchestrator(config, &db, RunOptions::default())?;
    let plan = orchestrator.plan(&task).await;
    print_plan(&plan, format)?;
    db.close().await?;
    Ok(())
}

fn print_analysis(verdict: &Verdict) {
    if let Some(analysis) = &verdict.analysis {
        for line in analysis.lines() {
            println!("  Lint: {}", line);
        }
    }
}

pub fn handle_classify(action: String, config: &Config, format: OutputFormat) -> Result<()> {
    let guard = build_guard(config)?;
    let verdict = guard.annotate(guard.assess(&action));
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&verdict)?),
        OutputFormat::Text => {
            println!("{}: {}", verdict.tier, verdict.action);
            if let Some(rule) = &verdict.rule {
                println!("  Rule: {}", rule);
            }
            if let Some(preview) = &verdict.preview {
                println!("  Preview: {}", preview);
            }
            print_analysis(&verdict);
        }
    }
    Ok(())
}

/// Break a command line into parts; `offline` skips the model
pub async fn handle_explain(
    command: String,
    offline: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let mut explainer = Explainer::new(build_guard(config)?);
    if !offline {
        explainer = explainer.with_model(build_router(config));
    }
    let explanation = explainer.explain(&command).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&explanation)?),
        OutputFormat::Text => {
            println!("{}: {}", explanation.verdict.tier, explanation.command);
            if let Some(summary) = &explanation.summary {
                println!("  {}", summary);
            }
            let width = explanation
                .parts
                .iter()
                .map(|p| p.part.chars().count())
                .max()
                .unwrap_or(0);
            for part in &explanation.parts {
                println!("  {:<width$}  {}", part.part, part.meaning, width = width);
            }
            print_analysis(&explanation.verdict);
            if explanation.offline && !offline {
                println!("  (model unavailable, offline breakdown)");
            }
        }
    }
    Ok(())
}

pub fn handle_check_path(
    path: &Path,
    handler: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let policy = PermissionPolicy::from_config(config);
    let verdict = policy.check_path(path, handler);
    match format {
        OutputFormat::Json => {
            let output = match &verdict {
                Ok(resolved) => json!({
                    "allowed": true,
                    "path": resolved,
                    "handler": handler,
                }),
                Err(e) => json!({
                    "allowed": false,
                    "path": path,
                    "handler": handler,
                    "error": sdk::errors::ErrorReport::from(e),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => match &verdict {
            Ok(resolved) => println!("✓ {} may access {}", handler, resolved.display()),
            Err(e) => {
                use sdk::errors::StewardErrorExt;
                println!("✗ {}", e.to_user_string());
            }
        },
    }
    Ok(())
}

pub fn handle_handlers(format: OutputFormat) -> Result<()> {
    let handlers = HandlerSet::builtin()?;
    match format {
        OutputFormat::Json => {
            let output: Vec<_> = handlers
                .iter()
                .map(|h| {
                    json!({
                        "name": h.name(),
                        "capabilities": h.capabilities(),
                        "tools": h.tools().iter().map(|t| t.summary()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => println!("{}", handlers.directory()),
    }
    Ok(())
}

pub async fn handle_history(limit: i64, config: &Config, format: OutputFormat) -> Result<()> {
    let db = open_database(config).await?;
    let records = db
        .audit(config.execution.result_cap_bytes)
        .recent(limit)
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No audit records yet.");
            }
            for r in &records {
                let when = chrono::DateTime::<chrono::Utc>::from_timestamp(r.timestamp, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| r.timestamp.to_string());
                println!(
                    "#{:<5} {} {:<8} {}.{} {}",
                    r.id,
                    when,
                    r.status,
                    r.handler,
                    r.tool.as_deref().unwrap_or("-"),
                    r.task
                );
            }
        }
    }
    db.close().await?;
    Ok(())
}

pub async fn handle_stats(config: &Config, format: OutputFormat) -> Result<()> {
    let db = open_database(config).await?;
    let stats = db
        .audit(config.execution.result_cap_bytes)
        .aggregate_by_handler()
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("{:<12} {:>6} {:>9} {:>8}", "HANDLER", "STEPS", "SUCCEEDED", "TOKENS");
            for s in &stats {
                println!(
                    "{:<12} {:>6} {:>9} {:>8}",
                    s.handler, s.count, s.successes, s.tokens_used
                );
            }
        }
    }
    db.close().await?;
    Ok(())
}

/// Which routing decision a rating applies to
#[derive(Debug, Clone)]
pub enum RateTarget {
    /// The n-th most recent executed step (1 = latest)
    Last(i64),
    Explicit {
        query: String,
        handler: String,
        tool: String,
    },
}

pub async fn handle_rate(
    target: RateTarget,
    rating: i64,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let db = open_database(config).await?;

    let (query, handler, tool) = match target {
        RateTarget::Explicit {
            query,
            handler,
            tool,
        } => (query, handler, tool),
        RateTarget::Last(n) => {
            if n < 1 {
                anyhow::bail!("--last counts from 1, got {}", n);
            }
            let record = db
                .audit(config.execution.result_cap_bytes)
                .nth_rateable(n)
                .await?
                .with_context(|| format!("No executed step #{} to rate", n))?;
            let tool = record
                .tool
                .with_context(|| format!("Audit record #{} has no tool", record.id))?;
            tracing::debug!("Rating audit record #{}", record.id);
            (record.task, record.handler, tool)
        }
    };

    let handlers = HandlerSet::builtin()?;
    let known = handlers
        .get(&handler)
        .map(|h| h.tools().get(&tool).is_some())
        .unwrap_or(false);
    if !known {
        tracing::warn!("Rating an unknown handler/tool pair: {}.{}", handler, tool);
    }

    let record = db
        .feedback(build_embedder(config))
        .record_feedback(&query, &handler, &tool, rating)
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Text => println!(
            "✓ Recorded rating {}/5 for {}.{} on \"{}\"",
            record.rating, record.handler, record.tool, record.query
        ),
    }
    db.close().await?;
    Ok(())
}

pub fn handle_workflow_list(config: &Config, format: OutputFormat) -> Result<()> {
    let store = WorkflowStore::from_config(config)?;
    let workflows = store.list()?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&workflows)?),
        OutputFormat::Text => {
            if workflows.is_empty() {
                println!("No workflows in {}", store.dir().display());
            }
            for w in &workflows {
                println!("{:<20} {} step(s)  {}", w.name, w.steps.len(), w.description);
            }
        }
    }
    Ok(())
}

pub fn handle_workflow_show(name: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let workflow = WorkflowStore::from_config(config)?.load(name)?;
    let variables = workflow.variables()?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "workflow": workflow,
                "variables": variables,
            }))?
        ),
        OutputFormat::Text => {
            println!("{}: {}", workflow.name, workflow.description);
            for (i, step) in workflow.steps.iter().enumerate() {
                println!("  {}. {}: {}", i + 1, step.handler, step.task);
            }
            if !variables.is_empty() {
                let names: Vec<&str> = variables.iter().map(String::as_str).collect();
                println!("  Variables: {}", names.join(", "));
            }
        }
    }
    Ok(())
}

/// Run a saved workflow; same safety and permission path as `run`
pub async fn handle_workflow_run(
    name: &str,
    vars: Vec<(String, String)>,
    options: RunOptions,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let workflow = WorkflowStore::from_config(config)?.load(name)?;
    let vars: BTreeMap<String, String> = vars.into_iter().collect();

    let db = open_database(config).await?;
    let orchestrator = build_orchestrator(config, &db, options)?;

    let cancel = CancelToken::new();
    let watcher = watch_interrupt(&cancel);
    let plan = orchestrator.run_workflow(&workflow, &vars, &cancel).await;
    watcher.abort();
    print_plan(&plan, format)?;
    db.close().await?;

    if let Some(error) = &plan.error {
        anyhow::bail!("{}", error);
    }
    Ok(())
}
