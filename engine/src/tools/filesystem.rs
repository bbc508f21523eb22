//! FileAgent: listing, inspecting, finding, creating and moving files
//!
//! Every tool records the paths it touches on its [`Action`]; the step
//! runtime checks them against the permission policy before anything runs.

use regex::Regex;
use sdk::errors::StewardError;
use sdk::types::{ToolInput, ToolOutput};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

use super::{format_size, tool_path, PATH_TOKEN};
use crate::agent::DomainHandler;
use crate::dispatch::{Action, ParamKind, ParamSpec, Tool};
use crate::permissions::Operation;

pub const NAME: &str = "FileAgent";

const FIND_MAX_DEPTH: usize = 6;
const FIND_MAX_RESULTS: usize = 200;

pub fn handler() -> Result<DomainHandler, StewardError> {
    let in_path = format!(r"(?i)\b(?:in|of|at|under|inside)\s+{}", PATH_TOKEN);
    let about_path = format!(r"(?i)\b(?:of|for|about|on)\s+{}", PATH_TOKEN);

    DomainHandler::new(
        NAME,
        "Files and folders: list directories, file details, find files by name, create folders, move or rename files",
    )
    .with_tools(vec![
        Tool::new("list_directory", "List the entries of a directory", Operation::Read, |input: &ToolInput| {
            let path = tool_path(input.arg_str_opt("path").unwrap_or("."))?;
            let target = path.clone();
            Ok(Action::native("list_directory", move || list_directory(&target)).touching(path))
        })
        .strong(&["list files", "list directory", "list folder", "ls", "directory listing", "show files"])
        .weak(&["files", "folder", "directory", "list", "contents"])
        .param(ParamSpec::optional("path", ParamKind::String).with_default(json!(".")))
        .extract("path", &in_path)?,
        Tool::new("file_info", "Size, type and modification time of a file", Operation::Read, |input: &ToolInput| {
            let path = tool_path(input.arg_str("path")?)?;
            let target = path.clone();
            Ok(Action::native("file_info", move || file_info(&target)).touching(path))
        })
        .strong(&["file info", "file size", "file details", "stat"])
        .weak(&["size", "info", "details", "modified"])
        .param(ParamSpec::required("path", ParamKind::String))
        .extract("path", &about_path)?
        .extract("path", PATH_TOKEN)?,
        Tool::new("find_files", "Find files by name pattern (* and ? wildcards)", Operation::Read, |input: &ToolInput| {
            let pattern = glob_to_regex(input.arg_str("pattern")?)?;
            let root = tool_path(input.arg_str_opt("path").unwrap_or("."))?;
            let target = root.clone();
            Ok(Action::native("find_files", move || find_files(&target, &pattern)).touching(root))
        })
        .strong(&["find files", "find file", "search files", "locate"])
        .weak(&["find", "search", "named", "where"])
        .param(ParamSpec::required("pattern", ParamKind::String))
        .param(ParamSpec::optional("path", ParamKind::String).with_default(json!(".")))
        .extract("pattern", r"(?i)\b(?:named|called|matching)\s+(\S+)|(\*\S*)")?
        .extract("path", &in_path)?,
        Tool::new("create_directory", "Create a directory and any missing parents", Operation::Write, |input: &ToolInput| {
            let path = tool_path(input.arg_str("path")?)?;
            let target = path.clone();
            Ok(Action::native("create_directory", move || create_directory(&target)).touching(path))
        })
        .strong(&["create directory", "create folder", "make directory", "new folder", "mkdir"])
        .weak(&["create", "folder", "directory"])
        .param(ParamSpec::required("path", ParamKind::String))
        .extract("path", r"(?i)\b(?:directory|folder|mkdir)\s+(?:called\s+|named\s+)?(\S+)")?,
        Tool::new("move_file", "Move or rename a file", Operation::Write, |input: &ToolInput| {
            let source = tool_path(input.arg_str("source")?)?;
            let destination = tool_path(input.arg_str("destination")?)?;
            let (from, to) = (source.clone(), destination.clone());
            Ok(Action::native("move_file", move || move_file(&from, &to))
                .touching(source)
                .touching(destination))
        })
        .strong(&["move", "rename"])
        .weak(&["file", "to"])
        .param(ParamSpec::required("source", ParamKind::String))
        .param(ParamSpec::required("destination", ParamKind::String))
        .extract("source", r"(?i)\b(?:move|rename)\s+(?:file\s+)?(\S+)\s+(?:to|into|as)\s+\S+")?
        .extract("destination", r"(?i)\b(?:move|rename)\s+(?:file\s+)?\S+\s+(?:to|into|as)\s+(\S+)")?,
    ])
}

fn io_error(path: &Path, e: std::io::Error) -> StewardError {
    match e.kind() {
        std::io::ErrorKind::NotFound => StewardError::FileNotFound(path.to_path_buf()),
        std::io::ErrorKind::AlreadyExists => StewardError::FileExists(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => {
            StewardError::OsPermissionDenied(path.display().to_string())
        }
        _ => StewardError::Io(e),
    }
}

fn list_directory(path: &Path) -> Result<ToolOutput, StewardError> {
    if !path.is_dir() {
        return Err(StewardError::DirNotFound(path.to_path_buf()));
    }
    let entries = fs::read_dir(path).map_err(|e| io_error(path, e))?;

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut links = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| io_error(path, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        let ft = entry.file_type().map_err(|e| io_error(path, e))?;
        if ft.is_dir() {
            dirs.push(format!("d  {}/", name));
        } else if ft.is_symlink() {
            links.push(format!("l  {}", name));
        } else {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(format!("f  {:>8}  {}", format_size(size), name));
        }
    }

    dirs.sort();
    files.sort();
    links.sort();

    let total = dirs.len() + files.len() + links.len();
    let mut out = Vec::with_capacity(total + 1);
    out.push(format!("{}/  ({} entries)", path.display(), total));
    out.extend(dirs);
    out.extend(files);
    out.extend(links);
    Ok(ToolOutput::with_data(out.join("\n"), json!({ "entries": total })))
}

fn file_info(path: &Path) -> Result<ToolOutput, StewardError> {
    let meta = fs::symlink_metadata(path).map_err(|e| io_error(path, e))?;
    let kind = if meta.is_dir() {
        "directory"
    } else if meta.file_type().is_symlink() {
        "symlink"
    } else {
        "file"
    };
    let modified = meta
        .modified()
        .ok()
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());

    let text = format!(
        "{}: {}, {}{}",
        path.display(),
        kind,
        format_size(meta.len()),
        modified
            .as_deref()
            .map(|m| format!(", modified {}", m))
            .unwrap_or_default()
    );
    Ok(ToolOutput::with_data(
        text,
        json!({ "kind": kind, "size": meta.len(), "modified": modified, "readonly": meta.permissions().readonly() }),
    ))
}

/// Translate a `*`/`?` wildcard into an anchored regex over file names
fn glob_to_regex(glob: &str) -> Result<Regex, StewardError> {
    let mut pattern = String::from("(?i)^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    if !glob.contains(['*', '?']) {
        // Bare names match as substrings
        pattern = format!("(?i){}", regex::escape(glob));
    } else {
        pattern.push('$');
    }
    Regex::new(&pattern).map_err(|e| StewardError::InvalidArgs(format!("find_files: {}", e)))
}

fn find_files(root: &Path, pattern: &Regex) -> Result<ToolOutput, StewardError> {
    if !root.is_dir() {
        return Err(StewardError::DirNotFound(root.to_path_buf()));
    }

    let mut found: Vec<PathBuf> = Vec::new();
    let mut stack: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];
    while let Some((dir, depth)) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if pattern.is_match(&entry.file_name().to_string_lossy()) {
                found.push(path.clone());
                if found.len() >= FIND_MAX_RESULTS {
                    break;
                }
            }
            if is_dir && depth + 1 < FIND_MAX_DEPTH {
                stack.push((path, depth + 1));
            }
        }
        if found.len() >= FIND_MAX_RESULTS {
            break;
        }
    }

    found.sort();
    let count = found.len();
    let lines: Vec<String> = found.iter().map(|p| p.display().to_string()).collect();
    let text = if lines.is_empty() {
        format!("No files matching in {}", root.display())
    } else {
        format!("{} match(es):\n{}", count, lines.join("\n"))
    };
    Ok(ToolOutput::with_data(text, json!({ "matches": lines })))
}

fn create_directory(path: &Path) -> Result<ToolOutput, StewardError> {
    if path.is_dir() {
        return Ok(ToolOutput::text(format!("{} already exists", path.display())));
    }
    if path.exists() {
        return Err(StewardError::FileExists(path.to_path_buf()));
    }
    fs::create_dir_all(path).map_err(|e| io_error(path, e))?;
    tracing::info!("Created directory {}", path.display());
    Ok(ToolOutput::text(format!("Created {}", path.display())))
}

fn move_file(source: &Path, destination: &Path) -> Result<ToolOutput, StewardError> {
    if !source.exists() {
        return Err(StewardError::FileNotFound(source.to_path_buf()));
    }
    let target = if destination.is_dir() {
        match source.file_name() {
            Some(name) => destination.join(name),
            None => return Err(StewardError::InvalidArgs("move_file: bad source".to_string())),
        }
    } else {
        destination.to_path_buf()
    };
    if target.exists() {
        return Err(StewardError::FileExists(target));
    }
    fs::rename(source, &target).map_err(|e| io_error(source, e))?;
    tracing::info!("Moved {} -> {}", source.display(), target.display());
    Ok(ToolOutput::text(format!(
        "Moved {} to {}",
        source.display(),
        target.display()
    )))
}
