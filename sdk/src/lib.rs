//! Steward SDK
//!
//! Shared types for Steward components: the structured error taxonomy and
//! the tool input/output types every handler speaks.

/// Error types and handling
pub mod errors;

/// Tool input/output types
pub mod types;

// Re-export commonly used types
pub use errors::{ErrorCode, ErrorDomain, ErrorReport, Severity, StewardError, StewardErrorExt};
pub use types::{ToolError, ToolInput, ToolOutput};
