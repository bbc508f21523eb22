// Steward system assistant
// Main entry point for the steward binary

use clap::Parser;
use steward_engine::cli::{Cli, Command, WorkflowCommand};
use steward_engine::commands::{
    handle_check_path, handle_classify, handle_explain, handle_handlers, handle_history,
    handle_plan, handle_rate, handle_run, handle_stats, handle_workflow_list,
    handle_workflow_run, handle_workflow_show, OutputFormat, RateTarget, RunOptions,
};
use steward_engine::config::Config;
use steward_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::debug!("Steward v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run {
            task,
            concurrent,
            yes,
            dry_run,
        } => {
            tracing::info!("Executing request: {}", task);
            let options = RunOptions {
                concurrent,
                approve: yes,
                dry_run,
            };
            handle_run(task, options, &config, format).await
        }

        Command::Plan { task } => handle_plan(task, &config, format).await,

        Command::Classify { action } => handle_classify(action, &config, format),

        Command::CheckPath { path, handler } => handle_check_path(&path, &handler, &config, format),

        Command::Handlers => handle_handlers(format),

        Command::History { limit } => handle_history(limit, &config, format).await,

        Command::Stats => handle_stats(&config, format).await,

        Command::Rate {
            query,
            handler,
            tool,
            last,
            rating,
        } => {
            let target = match (last, query, handler, tool) {
                (Some(n), ..) => RateTarget::Last(n),
                (None, Some(query), Some(handler), Some(tool)) => RateTarget::Explicit {
                    query,
                    handler,
                    tool,
                },
                _ => anyhow::bail!("rate needs a query with --handler and --tool, or --last"),
            };
            handle_rate(target, rating, &config, format).await
        }

        Command::Explain { command, offline } => {
            handle_explain(command, offline, &config, format).await
        }

        Command::Workflow(WorkflowCommand::List) => handle_workflow_list(&config, format),

        Command::Workflow(WorkflowCommand::Show { name }) => {
            handle_workflow_show(&name, &config, format)
        }

        Command::Workflow(WorkflowCommand::Run {
            name,
            vars,
            concurrent,
            yes,
            dry_run,
        }) => {
            tracing::info!("Running workflow: {}", name);
            let options = RunOptions {
                concurrent,
                approve: yes,
                dry_run,
            };
            handle_workflow_run(&name, vars, options, &config, format).await
        }
    }
}
