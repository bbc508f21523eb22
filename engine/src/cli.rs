//! CLI interface for Steward
//!
//! Defines all commands and global flags using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Steward system assistant
///
/// Turns plain-language requests into local system actions, screened by a
/// safety guard and a permission policy, with every step audited.
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plan and execute a request
    Run {
        /// The request, in plain language
        task: String,

        /// Run independent steps concurrently
        #[arg(long)]
        concurrent: bool,

        /// Approve HIGH_RISK actions without asking
        #[arg(long, conflicts_with = "dry_run")]
        yes: bool,

        /// Run the preview form of HIGH_RISK actions instead of asking
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the plan for a request without executing it
    Plan {
        /// The request, in plain language
        task: String,
    },

    /// Classify a command line with the safety guard
    Classify {
        /// Command line to classify
        action: String,
    },

    /// Check whether a handler may touch a path
    CheckPath {
        path: PathBuf,

        /// Handler name, e.g. FileAgent
        #[arg(long)]
        handler: String,
    },

    /// List handlers and their tools
    Handlers,

    /// Show recent audit records
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// Show per-handler totals from the audit trail
    Stats,

    /// Rate how a past request was routed
    Rate {
        /// The original request text
        #[arg(required_unless_present = "last", requires_all = ["handler", "tool"])]
        query: Option<String>,

        #[arg(long)]
        handler: Option<String>,

        #[arg(long)]
        tool: Option<String>,

        /// Rate the Nth most recent executed step instead (default 1)
        #[arg(
            long,
            value_name = "N",
            num_args = 0..=1,
            default_missing_value = "1",
            conflicts_with_all = ["query", "handler", "tool"]
        )]
        last: Option<i64>,

        /// 1 (wrong) to 5 (exactly right)
        #[arg(long)]
        rating: i64,
    },

    /// Explain what a command line does without running it
    Explain {
        /// Command line to explain
        command: String,

        /// Use the built-in table instead of the model
        #[arg(long)]
        offline: bool,
    },

    /// Saved workflows
    #[command(subcommand)]
    Workflow(WorkflowCommand),
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// List saved workflows
    List,

    /// Show the steps and placeholders of a workflow
    Show { name: String },

    /// Run a workflow
    Run {
        name: String,

        /// Placeholder value, repeatable
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Run independent steps concurrently
        #[arg(long)]
        concurrent: bool,

        /// Approve HIGH_RISK actions without asking
        #[arg(long, conflicts_with = "dry_run")]
        yes: bool,

        /// Run the preview form of HIGH_RISK actions instead of asking
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}
