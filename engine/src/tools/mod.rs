//! Built-in tool sets
//!
//! Each submodule builds one domain handler. Tool bodies are thin: they
//! validate their arguments and return an [`Action`](crate::dispatch::Action);
//! the work itself happens later at the execution boundary.

pub mod docker;
pub mod filesystem;
pub mod git;
pub mod network;
pub mod system;

use sdk::errors::StewardError;
use std::path::PathBuf;

use crate::config::expand_path;

/// Capture for a path-like token: `/abs`, `./rel`, `~/home`, `.`, `..` or `name.ext`
pub(crate) const PATH_TOKEN: &str = r"((?:~|\.{1,2})?/[^\s]*|~|\.{1,2}|[\w-][\w.-]*\.[A-Za-z0-9]{1,8})";

/// Capture for a dotted host name or IPv4 address
pub(crate) const HOST_TOKEN: &str = r"([A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9-]+)+)";

/// Expand `~` in a tool path argument
pub(crate) fn tool_path(raw: &str) -> Result<PathBuf, StewardError> {
    expand_path(&PathBuf::from(raw))
}

pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0K");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0M");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0G");
    }

    #[test]
    fn test_path_token() {
        let re = Regex::new(PATH_TOKEN).unwrap();
        let cap = |s: &str| re.captures(s).map(|c| c[1].to_string());
        assert_eq!(cap("info on /tmp/a.txt").as_deref(), Some("/tmp/a.txt"));
        assert_eq!(cap("size of notes.md").as_deref(), Some("notes.md"));
        assert_eq!(cap("look in ~/Documents").as_deref(), Some("~/Documents"));
        assert_eq!(cap("nothing here"), None);
    }

    #[test]
    fn test_host_token() {
        let re = Regex::new(HOST_TOKEN).unwrap();
        let cap = |s: &str| re.captures(s).map(|c| c[1].to_string());
        assert_eq!(cap("ping example.com now").as_deref(), Some("example.com"));
        assert_eq!(cap("ping 10.0.0.1").as_deref(), Some("10.0.0.1"));
        assert_eq!(cap("ping the router"), None);
    }
}
