//! Saved workflows
//!
//! A workflow is a fixed plan kept as a TOML file under
//! `<data_dir>/workflows/`. Running one skips the planning call; every step
//! still goes through dispatch, the safety guard and the permission checks.
//!
//! ```toml
//! description = "Morning health check"
//!
//! [[steps]]
//! handler = "SysAgent"
//! task = "check disk usage"
//!
//! [[steps]]
//! handler = "GitAgent"
//! task = "git status of {{repo}}"
//! ```
//!
//! `{{name}}` placeholders are filled from `--var name=value`.

use regex::Regex;
use sdk::errors::StewardError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::conductor::types::{Plan, Step};
use crate::config::{expand_path, Config};

const EXTENSION: &str = "toml";

const PLACEHOLDER: &str = r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}";

fn placeholder() -> Result<Regex, StewardError> {
    Regex::new(PLACEHOLDER)
        .map_err(|e| StewardError::ConfigInvalid(format!("Invalid placeholder pattern: {}", e)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub handler: String,
    pub task: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    /// Defaults to the file stem
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn from_toml(content: &str) -> Result<Self, StewardError> {
        let workflow: Workflow = toml::from_str(content)
            .map_err(|e| StewardError::ConfigInvalid(format!("Invalid workflow: {}", e)))?;
        if workflow.steps.is_empty() {
            return Err(StewardError::ConfigInvalid(
                "Workflow has no steps".to_string(),
            ));
        }
        if let Some(step) = workflow
            .steps
            .iter()
            .find(|s| s.handler.trim().is_empty() || s.task.trim().is_empty())
        {
            return Err(StewardError::ConfigInvalid(format!(
                "Workflow step needs both a handler and a task: {:?}",
                step
            )));
        }
        Ok(workflow)
    }

    pub fn load(path: &Path) -> Result<Self, StewardError> {
        if !path.exists() {
            return Err(StewardError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let mut workflow = Self::from_toml(&content)?;
        if workflow.name.is_empty() {
            workflow.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(workflow)
    }

    /// Placeholder names used by any step, sorted
    pub fn variables(&self) -> Result<BTreeSet<String>, StewardError> {
        let pattern = placeholder()?;
        Ok(self
            .steps
            .iter()
            .flat_map(|s| pattern.captures_iter(&s.task))
            .map(|c| c[1].to_string())
            .collect())
    }

    /// Build a plan with every `{{name}}` replaced from `vars`
    ///
    /// # Errors
    ///
    /// `InvalidArgs` naming every placeholder `vars` does not supply.
    pub fn instantiate(&self, vars: &BTreeMap<String, String>) -> Result<Plan, StewardError> {
        let missing: Vec<String> = self
            .variables()?
            .into_iter()
            .filter(|v| !vars.contains_key(v))
            .collect();
        if !missing.is_empty() {
            return Err(StewardError::InvalidArgs(format!(
                "workflow '{}' needs values for: {}",
                self.name,
                missing.join(", ")
            )));
        }

        let pattern = placeholder()?;
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let task = pattern.replace_all(&step.task, |c: &regex::Captures| {
                    vars.get(&c[1]).cloned().unwrap_or_default()
                });
                Step::new(index, step.handler.clone(), task.into_owned())
            })
            .collect();

        Ok(Plan::new(format!("workflow {}", self.name), steps, 0))
    }
}

/// Directory of workflow files
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    dir: PathBuf,
}

impl WorkflowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Result<Self, StewardError> {
        Ok(Self::new(expand_path(&config.core.data_dir)?.join("workflows")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StewardError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StewardError::InvalidArgs(format!(
                "workflow names use letters, digits, '-' and '_': {:?}",
                name
            )));
        }
        Ok(self.dir.join(format!("{}.{}", name, EXTENSION)))
    }

    pub fn load(&self, name: &str) -> Result<Workflow, StewardError> {
        Workflow::load(&self.path_for(name)?)
    }

    /// Every parseable workflow, by name; broken files are logged and skipped
    pub fn list(&self) -> Result<Vec<Workflow>, StewardError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut workflows = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match Workflow::load(&path) {
                Ok(workflow) => workflows.push(workflow),
                Err(e) => tracing::warn!("Skipping workflow {:?}: {}", path, e),
            }
        }
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }
}
