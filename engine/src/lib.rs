//! Steward Engine Library
//!
//! Core of the steward assistant. Used by the binary and the integration
//! tests.

/// Configuration management module
pub mod config;

/// Execution boundary for side-effecting actions
pub mod command_executor;

/// Safety guard: risk tiers and dry-run previews
pub mod safety;

/// Path whitelist, operation scopes and integration toggles
pub mod permissions;

/// Audit and feedback persistence
pub mod store;

/// LLM provider abstraction layer
pub mod llm;

/// Two-tier tool dispatch
pub mod dispatch;

/// Domain handlers
pub mod agent;

/// Built-in tool sets of the domain handlers
pub mod tools;

/// Context snapshot for planning
pub mod context;

/// Planning and plan execution
pub mod conductor;

/// Plain-language breakdown of command lines
pub mod explain;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod commands;
