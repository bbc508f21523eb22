//! Static analysis of command lines
//!
//! A second opinion attached to a [`Verdict`](super::Verdict). Findings
//! never change the tier; they are shown next to the confirmation prompt,
//! logged for SAFE commands and printed by `steward classify`.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::command_executor::find_in_path;

pub trait StaticAnalyzer: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Findings for `action`, `None` when there is nothing to report
    fn analyze(&self, action: &str) -> Option<String>;
}

/// Runs `shellcheck` over the command as a one-line `sh` script
#[derive(Debug, Clone)]
pub struct Shellcheck {
    program: PathBuf,
}

impl Shellcheck {
    /// Locate `shellcheck` on `PATH`
    pub fn detect() -> Option<Self> {
        find_in_path("shellcheck").map(Self::at)
    }

    pub fn at(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl StaticAnalyzer for Shellcheck {
    fn name(&self) -> &str {
        "shellcheck"
    }

    fn analyze(&self, action: &str) -> Option<String> {
        let mut child = match Command::new(&self.program)
            .args(["--format=gcc", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("shellcheck unavailable at {:?}: {}", self.program, e);
                return None;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let script = format!("#!/bin/sh\n{}\n", action);
            if let Err(e) = stdin.write_all(script.as_bytes()) {
                tracing::warn!("Failed to feed shellcheck: {}", e);
            }
        }

        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("shellcheck failed: {}", e);
                return None;
            }
        };
        if output.status.success() {
            return None;
        }
        parse_gcc_findings(&String::from_utf8_lossy(&output.stdout))
    }
}

/// `-:2:6: warning: ... [SC2086]` lines, without the `-:` file prefix
fn parse_gcc_findings(stdout: &str) -> Option<String> {
    let findings: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.strip_prefix("-:").unwrap_or(l))
        .collect();
    if findings.is_empty() {
        None
    } else {
        Some(findings.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gcc_findings() {
        let stdout = "-:2:6: warning: Double quote to prevent globbing and word splitting. [SC2086]\n\n";
        assert_eq!(
            parse_gcc_findings(stdout).as_deref(),
            Some("2:6: warning: Double quote to prevent globbing and word splitting. [SC2086]")
        );
        assert_eq!(parse_gcc_findings("  \n"), None);
    }

    #[test]
    fn test_missing_program_reports_nothing() {
        let analyzer = Shellcheck::at("/nonexistent/shellcheck");
        assert_eq!(analyzer.analyze("rm $FILE"), None);
    }
}
