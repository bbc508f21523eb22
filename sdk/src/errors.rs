//! Error types and handling
//!
//! This module provides the error taxonomy shared by every Steward component.
//! Each error maps to a stable numeric [`ErrorCode`], a [`Severity`] and a
//! recovery suggestion through the [`StewardErrorExt`] trait.
//!
//! Codes are grouped by domain:
//!
//! | Range | Domain                |
//! |-------|-----------------------|
//! | 1xx   | Permission            |
//! | 2xx   | File / path           |
//! | 3xx   | Network               |
//! | 4xx   | Model service         |
//! | 5xx   | Handler / tool        |
//! | 6xx   | System / execution    |
//! | 7xx   | Configuration         |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// How bad an error is for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, the task still partially succeeded
    Low,
    /// The step failed but the system is stable
    Medium,
    /// A handler crashed, sibling steps may be affected
    High,
    /// System-level failure that needs attention
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Error domain derived from the hundreds digit of a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    Permission,
    File,
    Network,
    Model,
    Handler,
    System,
    Config,
}

/// Stable numeric error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum ErrorCode {
    // Permission (1xx)
    PathDenied = 101,
    PathNotWhitelisted = 102,
    ConnectionDisabled = 103,
    OsPermissionDenied = 104,
    WriteNotAllowed = 105,
    ActionBlocked = 106,
    OperationNotPermitted = 107,
    ConfirmationDeclined = 108,

    // File (2xx)
    FileNotFound = 201,
    DirNotFound = 202,
    FileExists = 203,
    DiskFull = 204,
    IoFailure = 205,

    // Network (3xx)
    HostUnreachable = 301,
    Timeout = 302,
    DnsFailure = 303,
    PortClosed = 304,

    // Model (4xx)
    LlmConnectionFailed = 401,
    LlmEmptyResponse = 402,
    LlmInvalidJson = 403,
    LlmTimeout = 404,
    PlanningFailed = 405,

    // Handler (5xx)
    AgentNotFound = 501,
    ToolNotFound = 502,
    InvalidArgs = 503,
    AgentCrashed = 504,
    HandlerTimeout = 505,
    ToolSelectionFailed = 506,
    StepCancelled = 507,

    // System (6xx)
    CommandNotFound = 601,
    CommandTimeout = 602,
    ServiceUnavailable = 603,
    DependencyMissing = 604,
    StoreFailure = 605,
    CommandRejected = 606,
    CommandFailed = 607,

    // Config (7xx)
    ConfigInvalid = 701,
    ConfigKeyMissing = 702,
}

impl ErrorCode {
    /// Numeric value of the code
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Domain this code belongs to
    pub fn domain(self) -> ErrorDomain {
        match self.as_u16() / 100 {
            1 => ErrorDomain::Permission,
            2 => ErrorDomain::File,
            3 => ErrorDomain::Network,
            4 => ErrorDomain::Model,
            5 => ErrorDomain::Handler,
            6 => ErrorDomain::System,
            _ => ErrorDomain::Config,
        }
    }

    /// Upper-case name, e.g. `PATH_DENIED`
    pub fn name(self) -> &'static str {
        match self {
            Self::PathDenied => "PATH_DENIED",
            Self::PathNotWhitelisted => "PATH_NOT_WHITELISTED",
            Self::ConnectionDisabled => "CONNECTION_DISABLED",
            Self::OsPermissionDenied => "OS_PERMISSION_DENIED",
            Self::WriteNotAllowed => "WRITE_NOT_ALLOWED",
            Self::ActionBlocked => "ACTION_BLOCKED",
            Self::OperationNotPermitted => "OPERATION_NOT_PERMITTED",
            Self::ConfirmationDeclined => "CONFIRMATION_DECLINED",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::DirNotFound => "DIR_NOT_FOUND",
            Self::FileExists => "FILE_EXISTS",
            Self::DiskFull => "DISK_FULL",
            Self::IoFailure => "IO_FAILURE",
            Self::HostUnreachable => "HOST_UNREACHABLE",
            Self::Timeout => "TIMEOUT",
            Self::DnsFailure => "DNS_FAILURE",
            Self::PortClosed => "PORT_CLOSED",
            Self::LlmConnectionFailed => "LLM_CONNECTION_FAILED",
            Self::LlmEmptyResponse => "LLM_EMPTY_RESPONSE",
            Self::LlmInvalidJson => "LLM_INVALID_JSON",
            Self::LlmTimeout => "LLM_TIMEOUT",
            Self::PlanningFailed => "PLANNING_FAILED",
            Self::AgentNotFound => "AGENT_NOT_FOUND",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::InvalidArgs => "INVALID_ARGS",
            Self::AgentCrashed => "AGENT_CRASHED",
            Self::HandlerTimeout => "HANDLER_TIMEOUT",
            Self::ToolSelectionFailed => "TOOL_SELECTION_FAILED",
            Self::StepCancelled => "STEP_CANCELLED",
            Self::CommandNotFound => "COMMAND_NOT_FOUND",
            Self::CommandTimeout => "COMMAND_TIMEOUT",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::DependencyMissing => "DEPENDENCY_MISSING",
            Self::StoreFailure => "STORE_FAILURE",
            Self::CommandRejected => "COMMAND_REJECTED",
            Self::CommandFailed => "COMMAND_FAILED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigKeyMissing => "CONFIG_KEY_MISSING",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u16())
    }
}

/// Structured error extensions
///
/// Every [`StewardError`] exposes a code, a severity and a suggestion that is
/// safe to show to the user.
pub trait StewardErrorExt {
    /// Stable numeric code
    fn code(&self) -> ErrorCode;

    /// Severity of the failure
    fn severity(&self) -> Severity;

    /// Human-readable recovery suggestion
    fn suggestion(&self) -> &str;

    /// Whether retrying (as a separate user action) can succeed
    fn is_recoverable(&self) -> bool;

    /// `[CODE] message` followed by the fix line
    fn to_user_string(&self) -> String;
}

/// Main error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{ErrorCode, StewardError, StewardErrorExt};
/// use std::path::PathBuf;
///
/// let error = StewardError::PathDenied(PathBuf::from("/etc/shadow"));
/// assert_eq!(error.code(), ErrorCode::PathDenied);
/// assert_eq!(error.code().as_u16(), 101);
/// println!("{}", error.to_user_string());
/// ```
#[derive(Debug, Error)]
pub enum StewardError {
    // Permission errors
    #[error("Path is on the blocked list: {0:?}")]
    PathDenied(PathBuf),

    #[error("Path is outside every allowed root: {0:?}")]
    PathNotWhitelisted(PathBuf),

    #[error("Integration '{0}' is disabled")]
    IntegrationDisabled(String),

    #[error("OS denied access: {0}")]
    OsPermissionDenied(String),

    #[error("Write not allowed: {0}")]
    WriteNotAllowed(String),

    #[error("Action blocked by safety rule '{rule}': {action}")]
    ActionBlocked { action: String, rule: String },

    #[error("{handler} is not permitted to {operation}")]
    OperationNotPermitted { handler: String, operation: String },

    #[error("High-risk action was not confirmed: {0}")]
    ConfirmationDeclined(String),

    // File errors
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),

    #[error("Directory not found: {0:?}")]
    DirNotFound(PathBuf),

    #[error("File already exists: {0:?}")]
    FileExists(PathBuf),

    #[error("Disk full")]
    DiskFull,

    // Network errors
    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("DNS lookup failed for {0}")]
    DnsFailure(String),

    #[error("Port closed: {0}")]
    PortClosed(String),

    // Model errors
    #[error("Model service unreachable: {0}")]
    LLMConnectionFailed(String),

    #[error("Model returned an empty response")]
    LLMEmptyResponse,

    #[error("Model returned malformed JSON: {0}")]
    LLMInvalidJson(String),

    #[error("Model call timed out after {0}s")]
    LLMTimeout(u64),

    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    // Handler errors
    #[error("Unknown handler: {0}")]
    HandlerNotFound(String),

    #[error("{handler} has no tool named '{tool}'")]
    ToolNotFound { handler: String, tool: String },

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Handler crashed: {0}")]
    HandlerCrashed(String),

    #[error("Handler call timed out after {0}s")]
    HandlerTimeout(u64),

    #[error("No tool fits the task: {0}")]
    ToolSelectionFailed(String),

    #[error("Step skipped after cancellation")]
    StepCancelled,

    // System errors
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command timed out after {0}s")]
    CommandTimeout(u64),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Missing dependency: {0}")]
    DependencyMissing(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Command exited with status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },

    // Config errors
    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("Missing configuration key: {0}")]
    ConfigKeyMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StewardErrorExt for StewardError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::PathDenied(_) => ErrorCode::PathDenied,
            Self::PathNotWhitelisted(_) => ErrorCode::PathNotWhitelisted,
            Self::IntegrationDisabled(_) => ErrorCode::ConnectionDisabled,
            Self::OsPermissionDenied(_) => ErrorCode::OsPermissionDenied,
            Self::WriteNotAllowed(_) => ErrorCode::WriteNotAllowed,
            Self::ActionBlocked { .. } => ErrorCode::ActionBlocked,
            Self::OperationNotPermitted { .. } => ErrorCode::OperationNotPermitted,
            Self::ConfirmationDeclined(_) => ErrorCode::ConfirmationDeclined,

            Self::FileNotFound(_) => ErrorCode::FileNotFound,
            Self::DirNotFound(_) => ErrorCode::DirNotFound,
            Self::FileExists(_) => ErrorCode::FileExists,
            Self::DiskFull => ErrorCode::DiskFull,

            Self::HostUnreachable(_) => ErrorCode::HostUnreachable,
            Self::NetworkTimeout(_) => ErrorCode::Timeout,
            Self::DnsFailure(_) => ErrorCode::DnsFailure,
            Self::PortClosed(_) => ErrorCode::PortClosed,

            Self::LLMConnectionFailed(_) => ErrorCode::LlmConnectionFailed,
            Self::LLMEmptyResponse => ErrorCode::LlmEmptyResponse,
            Self::LLMInvalidJson(_) => ErrorCode::LlmInvalidJson,
            Self::LLMTimeout(_) => ErrorCode::LlmTimeout,
            Self::PlanningFailed(_) => ErrorCode::PlanningFailed,

            Self::HandlerNotFound(_) => ErrorCode::AgentNotFound,
            Self::ToolNotFound { .. } => ErrorCode::ToolNotFound,
            Self::InvalidArgs(_) => ErrorCode::InvalidArgs,
            Self::HandlerCrashed(_) => ErrorCode::AgentCrashed,
            Self::HandlerTimeout(_) => ErrorCode::HandlerTimeout,
            Self::ToolSelectionFailed(_) => ErrorCode::ToolSelectionFailed,
            Self::StepCancelled => ErrorCode::StepCancelled,

            Self::CommandNotFound(_) => ErrorCode::CommandNotFound,
            Self::CommandTimeout(_) => ErrorCode::CommandTimeout,
            Self::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            Self::DependencyMissing(_) => ErrorCode::DependencyMissing,
            Self::Store(_) => ErrorCode::StoreFailure,
            Self::CommandRejected(_) => ErrorCode::CommandRejected,
            Self::CommandFailed { .. } => ErrorCode::CommandFailed,

            Self::ConfigInvalid(_) => ErrorCode::ConfigInvalid,
            Self::ConfigKeyMissing(_) => ErrorCode::ConfigKeyMissing,

            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::FileNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::OsPermissionDenied,
                std::io::ErrorKind::AlreadyExists => ErrorCode::FileExists,
                _ => ErrorCode::IoFailure,
            },
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Self::StepCancelled | Self::FileExists(_) => Severity::Low,

            Self::HandlerCrashed(_) | Self::DiskFull | Self::ActionBlocked { .. } => {
                Severity::High
            }

            Self::Store(_) | Self::ConfigInvalid(_) | Self::ConfigKeyMissing(_) => {
                Severity::Critical
            }

            _ => Severity::Medium,
        }
    }

    fn suggestion(&self) -> &str {
        match self.code() {
            ErrorCode::PathDenied => "This path is protected and can never be accessed",
            ErrorCode::PathNotWhitelisted => {
                "Add the path to 'permissions.allowed_paths' in config.toml"
            }
            ErrorCode::ConnectionDisabled => {
                "Enable the integration under [integrations] in config.toml"
            }
            ErrorCode::OsPermissionDenied => {
                "Run with appropriate permissions or check file ownership"
            }
            ErrorCode::WriteNotAllowed => "Only read operations are permitted here",
            ErrorCode::ActionBlocked => "This action is destructive and cannot be overridden",
            ErrorCode::OperationNotPermitted => {
                "Adjust 'permissions.operation_scopes' if this handler needs the operation"
            }
            ErrorCode::ConfirmationDeclined => "Re-run with --yes to approve or --dry-run to preview",
            ErrorCode::FileNotFound | ErrorCode::DirNotFound => "Check the path and try again",
            ErrorCode::FileExists => "Choose a different name or remove the existing file",
            ErrorCode::DiskFull => "Free some disk space and try again",
            ErrorCode::IoFailure => "File system operation failed",
            ErrorCode::HostUnreachable | ErrorCode::PortClosed => {
                "Check the host name and your network connection"
            }
            ErrorCode::Timeout => "The network is slow or down. Try again later",
            ErrorCode::DnsFailure => "Check the host name and your DNS settings",
            ErrorCode::LlmConnectionFailed => "Ensure Ollama is running: 'ollama serve'",
            ErrorCode::LlmEmptyResponse | ErrorCode::LlmInvalidJson => {
                "The model answered badly. Rephrase the request or try another model"
            }
            ErrorCode::LlmTimeout => "Try a simpler query or check that the model is loaded",
            ErrorCode::PlanningFailed => "Rephrase the request as a more concrete action",
            ErrorCode::AgentNotFound => "Run 'steward handlers' to see available handlers",
            ErrorCode::ToolNotFound | ErrorCode::ToolSelectionFailed => {
                "Run 'steward handlers' to see what each handler can do"
            }
            ErrorCode::InvalidArgs => "Mention the missing value explicitly in the request",
            ErrorCode::AgentCrashed => "The handler failed internally. Check the logs",
            ErrorCode::HandlerTimeout | ErrorCode::CommandTimeout => {
                "The operation took too long. Raise 'execution.step_timeout_secs' or retry"
            }
            ErrorCode::StepCancelled => "Run the request again to execute skipped steps",
            ErrorCode::CommandNotFound | ErrorCode::DependencyMissing => {
                "Install the required tool or check your PATH"
            }
            ErrorCode::ServiceUnavailable => "Start the service and try again",
            ErrorCode::StoreFailure => "Check that the data directory is writable",
            ErrorCode::CommandRejected => "Command contains unsafe characters",
            ErrorCode::CommandFailed => "Inspect the command output for details",
            ErrorCode::ConfigInvalid | ErrorCode::ConfigKeyMissing => {
                "Check your config.toml file for errors"
            }
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::PathDenied(_)
                | Self::ActionBlocked { .. }
                | Self::ConfigInvalid(_)
                | Self::ConfigKeyMissing(_)
        )
    }

    fn to_user_string(&self) -> String {
        format!(
            "[{}] {}\n  Fix: {}",
            self.code().name(),
            self,
            self.suggestion()
        )
    }
}

/// Serializable snapshot of a [`StewardError`]
///
/// `StewardError` wraps `std::io::Error` and therefore cannot be cloned or
/// persisted. Step results carry this report instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
}

impl ErrorReport {
    /// Render like [`StewardErrorExt::to_user_string`]
    pub fn to_user_string(&self) -> String {
        format!(
            "[{}] {}\n  Fix: {}",
            self.code.name(),
            self.message,
            self.suggestion
        )
    }
}

impl From<&StewardError> for ErrorReport {
    fn from(err: &StewardError) -> Self {
        Self {
            code: err.code(),
            severity: err.severity(),
            message: err.to_string(),
            suggestion: err.suggestion().to_string(),
        }
    }
}

impl From<StewardError> for ErrorReport {
    fn from(err: StewardError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.name(), self.message)
    }
}
