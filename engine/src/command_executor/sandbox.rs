//! Optional firejail confinement for approved HIGH_RISK commands
//!
//! Wrapping happens after classification and confirmation, so the guard
//! always sees the command the user asked for. Native calls pass through.

use std::path::PathBuf;

use super::{find_in_path, Invocation};

const FIREJAIL_FLAGS: &[&str] = &["--quiet", "--noprofile"];

#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    program: Option<PathBuf>,
}

impl Sandbox {
    /// Never wraps anything
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Use firejail when `enabled` and installed
    pub fn detect(enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }
        if cfg!(windows) {
            tracing::warn!("Sandboxing is not supported on Windows; running unsandboxed");
            return Self::disabled();
        }
        match find_in_path("firejail") {
            Some(program) => {
                tracing::debug!("Sandboxing HIGH_RISK commands with {:?}", program);
                Self::with_program(program)
            }
            None => {
                tracing::warn!("Sandbox enabled but firejail was not found; running unsandboxed");
                Self::disabled()
            }
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.program.is_some()
    }

    /// Prefix a command invocation with the sandbox launcher
    pub fn wrap(&self, invocation: &mut Invocation) {
        let (Some(program), Invocation::Command { argv, .. }) = (&self.program, invocation) else {
            return;
        };
        let launcher = std::iter::once(program.display().to_string())
            .chain(FIREJAIL_FLAGS.iter().map(|f| f.to_string()));
        argv.splice(0..0, launcher);
    }
}
