//! Context snapshot
//!
//! A short description of the machine's state for the planning prompt.
//! The OS line and a working-directory listing are always included; the
//! more expensive gauges run only when the task mentions their category.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::command_executor::{ExecutionBoundary, Invocation};
use crate::dispatch::{normalize, Keyword};
use crate::tools::format_size;
use crate::tools::system::{CpuGauge, MemoryGauge};

const GATHER_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_LISTED: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Performance,
    Git,
    Network,
    Docker,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Performance,
        Category::Git,
        Category::Network,
        Category::Docker,
    ];

    fn triggers(self) -> &'static [&'static str] {
        match self {
            Category::Performance => &[
                "slow", "lag", "freeze", "memory", "ram", "cpu", "disk", "space",
                "performance", "speed", "hanging", "kill process", "top", "resource",
            ],
            Category::Git => &[
                "git", "commit", "commits", "push", "pull", "branch", "merge", "diff", "stash",
                "repo", "repository",
            ],
            Category::Network => &[
                "network", "internet", "ping", "dns", "connect", "connection", "wifi", "port",
                "online", "offline",
            ],
            Category::Docker => &["docker", "container", "containers", "compose"],
        }
    }

    /// Whether `normalized` mentions any trigger word of this category
    pub fn matches(self, normalized: &str) -> bool {
        self.triggers()
            .iter()
            .any(|t| Keyword::weak(t).found_in(normalized))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Performance => "System",
            Category::Git => "Git",
            Category::Network => "Network",
            Category::Docker => "Docker",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextSnapshot {
    pub lines: Vec<String>,
    pub categories: Vec<Category>,
}

impl ContextSnapshot {
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Builds snapshots; gauges run through their own execution boundary
pub struct ContextBuilder {
    boundary: Arc<dyn ExecutionBoundary>,
    cwd: Option<PathBuf>,
}

impl ContextBuilder {
    pub fn new(boundary: Arc<dyn ExecutionBoundary>) -> Self {
        Self {
            boundary,
            cwd: None,
        }
    }

    /// List `dir` instead of the process working directory
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Categories `task` triggers, in fixed order
    pub fn categories_for(task: &str) -> Vec<Category> {
        let normalized = normalize(task);
        Category::ALL
            .into_iter()
            .filter(|c| c.matches(&normalized))
            .collect()
    }

    pub async fn snapshot(&self, task: &str) -> ContextSnapshot {
        let categories = Self::categories_for(task);
        let mut lines = vec![os_line()];
        lines.extend(self.cwd_lines());

        for category in &categories {
            let line = match category {
                Category::Performance => self.resource_line().await,
                Category::Git => self.git_line().await,
                Category::Network => self.network_line().await,
                Category::Docker => self.docker_line().await,
            };
            lines.push(line);
        }

        tracing::debug!("Context snapshot with categories {:?}", categories);
        ContextSnapshot { lines, categories }
    }

    fn cwd_lines(&self) -> Vec<String> {
        let cwd = match &self.cwd {
            Some(dir) => dir.clone(),
            None => match std::env::current_dir() {
                Ok(dir) => dir,
                Err(_) => return Vec::new(),
            },
        };

        let Ok(entries) = std::fs::read_dir(&cwd) else {
            return vec![format!("[CWD] {}", cwd.display())];
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => dirs.push(name),
                Ok(ft) if ft.is_file() => files.push(name),
                _ => {}
            }
        }
        dirs.sort();
        files.sort();
        dirs.truncate(MAX_LISTED);
        files.truncate(MAX_LISTED);

        let join = |v: &[String]| {
            if v.is_empty() {
                "none".to_string()
            } else {
                v.join(", ")
            }
        };
        vec![
            format!("[CWD] {}", cwd.display()),
            format!("[Dirs] {}", join(&dirs)),
            format!("[Files] {}", join(&files)),
        ]
    }

    async fn resource_line(&self) -> String {
        let outcome = self
            .boundary
            .run(
                Invocation::native("context_resources", || {
                    let cpu = CpuGauge::read();
                    let mem = MemoryGauge::read();
                    Ok(sdk::types::ToolOutput::text(format!(
                        "CPU: {:.0}% | RAM: {:.0}% ({} free)",
                        cpu.usage_percent,
                        mem.used_percent(),
                        format_size(mem.available)
                    )))
                }),
                GATHER_TIMEOUT,
            )
            .await;
        if outcome.success {
            format!("[{}] {}", Category::Performance, outcome.output)
        } else {
            format!("[{}] unavailable", Category::Performance)
        }
    }

    async fn git_line(&self) -> String {
        let mut branch_inv = Invocation::command(["git", "branch", "--show-current"]);
        let mut status_inv = Invocation::command(["git", "status", "--short"]);
        if let Some(dir) = &self.cwd {
            branch_inv = branch_inv.in_dir(dir.clone());
            status_inv = status_inv.in_dir(dir.clone());
        }

        let branch = self.boundary.run(branch_inv, GATHER_TIMEOUT).await;
        if !branch.success {
            return format!("[{}] Not a git repository", Category::Git);
        }
        let status = self.boundary.run(status_inv, GATHER_TIMEOUT).await;
        let changed = if status.success {
            status.output.lines().filter(|l| !l.trim().is_empty()).count().to_string()
        } else {
            "unknown".to_string()
        };
        format!(
            "[{}] Branch: {} | {} changed files",
            Category::Git,
            branch.output.trim(),
            changed
        )
    }

    async fn network_line(&self) -> String {
        let outcome = self
            .boundary
            .run(
                Invocation::native("context_network", || {
                    let addr = std::net::SocketAddr::from(([8, 8, 8, 8], 53));
                    let connected =
                        std::net::TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok();
                    Ok(sdk::types::ToolOutput::text(if connected {
                        "Internet: Connected"
                    } else {
                        "Internet: Disconnected"
                    }))
                }),
                GATHER_TIMEOUT,
            )
            .await;
        format!("[{}] {}", Category::Network, outcome.output)
    }

    async fn docker_line(&self) -> String {
        let outcome = self
            .boundary
            .run(
                Invocation::command(["docker", "ps", "--format", "{{.Names}}: {{.Status}}"]),
                GATHER_TIMEOUT,
            )
            .await;
        let running: Vec<&str> = outcome.output.lines().take(5).collect();
        if outcome.success && !running.is_empty() {
            format!("[{}] Running: {}", Category::Docker, running.join(", "))
        } else {
            format!(
                "[{}] No containers running (or Docker not installed)",
                Category::Docker
            )
        }
    }
}

fn os_line() -> String {
    format!(
        "[OS] {} {} ({})",
        sysinfo::System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
        sysinfo::System::os_version().unwrap_or_default(),
        std::env::consts::ARCH
    )
}
