//! Permission manager
//!
//! Access-control oracle over three things:
//!
//! 1. Filesystem paths: a fixed, non-configurable blacklist of system
//!    locations and a configured whitelist of roots. Paths are canonicalized
//!    (symlinks, `.` and `..` resolved) before any comparison, and the
//!    blacklist always wins over the whitelist.
//! 2. Per-handler operation scopes (read / write / execute / delete).
//! 3. Third-party integration toggles, disabled unless configured on.
//!
//! The policy is an immutable snapshot behind an `Arc`. [`PermissionManager::reload`]
//! swaps in a new snapshot; checks already in flight keep the one they started with.

use sdk::errors::StewardError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::config::{expand_path, Config};

/// Kind of access a tool performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
    Execute,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Execute => "execute",
            Operation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// System locations that can never be accessed
#[cfg(unix)]
const BLOCKED_PATHS: &[&str] = &[
    "/etc", "/boot", "/root", "/var/log", "/usr/sbin", "/proc", "/sys", "/dev",
];

#[cfg(windows)]
const BLOCKED_PATHS: &[&str] = &[
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
];

/// Built-in operation scopes per handler
fn default_scopes() -> BTreeMap<String, BTreeSet<Operation>> {
    use Operation::*;
    let entries: [(&str, &[Operation]); 5] = [
        ("FileAgent", &[Read, Write, Execute]),
        ("SysAgent", &[Read, Execute]),
        ("GitAgent", &[Read, Write, Execute]),
        ("NetAgent", &[Execute]),
        ("DockerAgent", &[Read, Execute]),
    ];
    entries
        .iter()
        .map(|(name, ops)| (name.to_string(), ops.iter().copied().collect()))
        .collect()
}

/// Immutable permission snapshot
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    allowed_roots: Vec<PathBuf>,
    blocked_roots: Vec<PathBuf>,
    scopes: BTreeMap<String, BTreeSet<Operation>>,
    integrations: BTreeMap<String, bool>,
}

impl PermissionPolicy {
    /// Build a policy from explicit whitelist roots
    ///
    /// Roots are canonicalized now; relative roots resolve against the
    /// current working directory.
    pub fn new(allowed_paths: &[PathBuf]) -> Self {
        let allowed_roots = allowed_paths
            .iter()
            .filter_map(|p| expand_path(p).ok())
            .filter_map(|p| canonicalize_lenient(&p).ok())
            .collect();

        let mut blocked_roots: Vec<PathBuf> = Vec::new();
        for raw in BLOCKED_PATHS {
            let raw = PathBuf::from(raw);
            if let Ok(canonical) = canonicalize_lenient(&raw) {
                if canonical != raw {
                    blocked_roots.push(canonical);
                }
            }
            blocked_roots.push(raw);
        }

        Self {
            allowed_roots,
            blocked_roots,
            scopes: default_scopes(),
            integrations: BTreeMap::new(),
        }
    }

    /// Build the policy described by a configuration
    pub fn from_config(config: &Config) -> Self {
        let mut policy = Self::new(&config.permissions.allowed_paths);
        for (handler, ops) in &config.permissions.operation_scopes {
            policy = policy.with_scope(handler, ops);
        }
        policy.integrations = config.integrations.flags.clone();
        policy
    }

    /// Replace one handler's operation scope
    pub fn with_scope(mut self, handler: &str, ops: &[Operation]) -> Self {
        self.scopes
            .insert(handler.to_string(), ops.iter().copied().collect());
        self
    }

    /// Set one integration toggle
    pub fn with_integration(mut self, name: &str, enabled: bool) -> Self {
        self.integrations.insert(name.to_string(), enabled);
        self
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    pub fn blocked_roots(&self) -> &[PathBuf] {
        &self.blocked_roots
    }

    fn is_blocked(&self, path: &Path) -> bool {
        self.blocked_roots.iter().any(|b| path.starts_with(b))
    }

    /// Validate a path and return its canonical form
    ///
    /// # Security Gates
    ///
    /// 1. Blacklist check on the absolute, lexically normalized input
    /// 2. Component-wise canonicalization of the raw input (symlinks resolved,
    ///    `..` applied after each symlink, including past missing segments)
    /// 3. Blacklist check on the canonical path (catches symlink bypasses)
    /// 4. Whitelist root containment
    pub fn check_path(&self, path: &Path, handler: &str) -> Result<PathBuf, StewardError> {
        let expanded = expand_path(path)?;
        let absolute = absolutize(&expanded)?;

        let lexical = normalize_lexically(&absolute);
        if self.is_blocked(&lexical) {
            tracing::warn!(handler, "BLOCKED path: {:?}", lexical);
            return Err(StewardError::PathDenied(lexical));
        }

        // `link/..` is the parent of the link target, not the link's directory
        let canonical = canonicalize_lenient(&absolute)?;

        if self.is_blocked(&canonical) {
            tracing::warn!(handler, "BLOCKED path after resolution: {:?}", canonical);
            return Err(StewardError::PathDenied(canonical));
        }

        if !self.allowed_roots.iter().any(|r| canonical.starts_with(r)) {
            tracing::warn!(handler, "DENIED path outside allowed roots: {:?}", canonical);
            return Err(StewardError::PathNotWhitelisted(canonical));
        }

        Ok(canonical)
    }

    pub fn is_path_allowed(&self, path: &Path, handler: &str) -> bool {
        self.check_path(path, handler).is_ok()
    }

    pub fn check_operation(&self, handler: &str, operation: Operation) -> Result<(), StewardError> {
        let allowed = self
            .scopes
            .get(handler)
            .is_some_and(|ops| ops.contains(&operation));
        if allowed {
            Ok(())
        } else {
            tracing::warn!("DENIED: {} cannot perform {}", handler, operation);
            Err(StewardError::OperationNotPermitted {
                handler: handler.to_string(),
                operation: operation.to_string(),
            })
        }
    }

    pub fn is_operation_allowed(&self, handler: &str, operation: Operation) -> bool {
        self.check_operation(handler, operation).is_ok()
    }

    pub fn is_integration_enabled(&self, name: &str) -> bool {
        self.integrations.get(name).copied().unwrap_or(false)
    }

    pub fn check_integration(&self, name: &str) -> Result<(), StewardError> {
        if self.is_integration_enabled(name) {
            Ok(())
        } else {
            tracing::info!("Integration '{}' is disabled", name);
            Err(StewardError::IntegrationDisabled(name.to_string()))
        }
    }
}

/// Shared, reloadable handle over the current [`PermissionPolicy`]
#[derive(Debug)]
pub struct PermissionManager {
    current: RwLock<Arc<PermissionPolicy>>,
}

impl PermissionManager {
    pub fn new(policy: PermissionPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
        }
    }

    /// The snapshot in force right now
    pub fn snapshot(&self) -> Arc<PermissionPolicy> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically replace the policy
    pub fn reload(&self, policy: PermissionPolicy) {
        let next = Arc::new(policy);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!("Permission policy reloaded");
    }

    pub fn is_path_allowed(&self, path: &Path, handler: &str) -> bool {
        self.snapshot().is_path_allowed(path, handler)
    }

    pub fn is_operation_allowed(&self, handler: &str, operation: Operation) -> bool {
        self.snapshot().is_operation_allowed(handler, operation)
    }

    pub fn is_integration_enabled(&self, name: &str) -> bool {
        self.snapshot().is_integration_enabled(name)
    }
}

/// Make a path absolute against the working directory, keeping `..` intact
fn absolutize(path: &Path) -> Result<PathBuf, StewardError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Symlink hops followed before giving up, matching Linux `MAXSYMLINKS`
const MAX_LINK_HOPS: usize = 40;

/// Canonicalize a path that may not exist yet
///
/// Components are resolved left to right the way the OS walks them once
/// missing directories are created: every existing prefix is canonicalized
/// (resolving symlinks), `..` pops the resolved prefix, and dangling
/// symlinks are followed to their target. A `..` after a missing component
/// therefore still lands wherever a later symlink points.
pub fn canonicalize_lenient(path: &Path) -> Result<PathBuf, StewardError> {
    let absolute = absolutize(path)?;

    if let Ok(canonical) = absolute.canonicalize() {
        return Ok(canonical);
    }
    resolve_components(&absolute, 0)
}

fn resolve_components(path: &Path, hops: usize) -> Result<PathBuf, StewardError> {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                if let Ok(canonical) = resolved.canonicalize() {
                    resolved = canonical;
                } else if let Ok(target) = std::fs::read_link(&resolved) {
                    if hops >= MAX_LINK_HOPS {
                        return Err(StewardError::Io(std::io::Error::other(format!(
                            "too many levels of symbolic links: {}",
                            path.display()
                        ))));
                    }
                    let base = resolved.parent().map(Path::to_path_buf).unwrap_or_default();
                    resolved = resolve_components(&base.join(target), hops + 1)?;
                }
            }
        }
    }
    Ok(resolved)
}
