//! GitAgent: repository state and commits
//!
//! All tools shell out to `git` inside the repository directory, which is
//! recorded as a touched path.

use sdk::errors::StewardError;
use sdk::types::ToolInput;
use serde_json::json;

use super::{tool_path, PATH_TOKEN};
use crate::agent::DomainHandler;
use crate::dispatch::{Action, ParamKind, ParamSpec, Tool};
use crate::permissions::Operation;

pub const NAME: &str = "GitAgent";

fn repo_param() -> ParamSpec {
    ParamSpec::optional("path", ParamKind::String).with_default(json!("."))
}

fn git(input: &ToolInput, args: &[&str]) -> Result<Action, StewardError> {
    let repo = tool_path(input.arg_str_opt("path").unwrap_or("."))?;
    let argv = std::iter::once("git").chain(args.iter().copied());
    Ok(Action::command(argv).in_dir(repo))
}

pub fn handler() -> Result<DomainHandler, StewardError> {
    let in_repo = format!(r"(?i)\b(?:in|of|for)\s+{}", PATH_TOKEN);

    DomainHandler::new(
        NAME,
        "Version control: repository status, commit history, diffs, branches, commits",
    )
    .with_tools(vec![
        Tool::new("git_status", "Working tree status", Operation::Read, |input: &ToolInput| {
            git(input, &["status", "--short", "--branch"])
        })
        .strong(&["git status", "repo status", "repository status", "uncommitted"])
        .weak(&["git", "status", "changes", "repo"])
        .param(repo_param())
        .extract("path", &in_repo)?,
        Tool::new("git_log", "Recent commit history", Operation::Read, |input: &ToolInput| {
            let limit = input.arg_i64_opt("limit").unwrap_or(10).clamp(1, 500).to_string();
            git(input, &["log", "--oneline", "-n", limit.as_str()])
        })
        .strong(&["git log", "commit history", "commits"])
        .weak(&["history", "log", "recent"])
        .param(ParamSpec::optional("limit", ParamKind::Integer).with_default(json!(10)))
        .param(repo_param())
        .extract("limit", r"(?i)\b(?:last|recent|latest)\s+(\d+)")?
        .extract("path", &in_repo)?,
        Tool::new("git_diff", "Summary of unstaged changes", Operation::Read, |input: &ToolInput| {
            git(input, &["diff", "--stat"])
        })
        .strong(&["git diff", "diff"])
        .weak(&["changes", "changed", "modified"])
        .param(repo_param())
        .extract("path", &in_repo)?,
        Tool::new("git_branch", "Local branches and the current branch", Operation::Read, |input: &ToolInput| {
            git(input, &["branch", "--list"])
        })
        .strong(&["git branch", "branches", "current branch"])
        .weak(&["branch"])
        .param(repo_param())
        .extract("path", &in_repo)?,
        Tool::new("git_commit", "Commit staged changes with a message", Operation::Write, |input: &ToolInput| {
            let message = input.arg_str("message")?;
            if message.trim().is_empty() {
                return Err(StewardError::InvalidArgs("git_commit: empty message".to_string()));
            }
            git(input, &["commit", "-m", message])
        })
        .strong(&["git commit", "commit"])
        .weak(&["staged", "save"])
        .param(ParamSpec::required("message", ParamKind::String))
        .param(repo_param())
        .extract("message", r#"(?i)\bmessage\s*[:=]?\s*(.+)$"#)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Handler;
    use crate::command_executor::Invocation;
    use std::path::PathBuf;

    #[test]
    fn test_git_status_runs_in_repo_dir() {
        let handler = handler().unwrap();
        let res = handler.tools().tier1("git status of /tmp/repo").unwrap();
        assert_eq!(res.tool(), "git_status");

        let action = handler.prepare(&res).unwrap();
        assert_eq!(
            action.command_line().as_deref(),
            Some("git status --short --branch")
        );
        assert_eq!(action.paths, vec![PathBuf::from("/tmp/repo")]);
        match action.invocation {
            Invocation::Command { cwd, .. } => assert_eq!(cwd, Some(PathBuf::from("/tmp/repo"))),
            other => panic!("unexpected invocation {:?}", other),
        }
    }

    #[test]
    fn test_git_log_limit() {
        let handler = handler().unwrap();
        let res = handler.tools().tier1("show the last 3 commits").unwrap();
        assert_eq!(res.tool(), "git_log");
        let action = handler.prepare(&res).unwrap();
        assert_eq!(action.command_line().as_deref(), Some("git log --oneline -n 3"));
    }

    #[test]
    fn test_commits_does_not_trigger_git_commit() {
        let handler = handler().unwrap();
        let res = handler.tools().tier1("show recent commits").unwrap();
        assert_eq!(res.tool(), "git_log");
    }

    #[test]
    fn test_commit_requires_message() {
        let handler = handler().unwrap();
        assert!(handler.tools().tier1("commit everything").is_err());

        let res = handler
            .tools()
            .tier1("commit with message fix typo in readme")
            .unwrap();
        assert_eq!(res.tool(), "git_commit");
        assert_eq!(res.operation, Operation::Write);
        let action = handler.prepare(&res).unwrap();
        match action.invocation {
            Invocation::Command { argv, .. } => {
                assert_eq!(argv, vec!["git", "commit", "-m", "fix typo in readme"])
            }
            other => panic!("unexpected invocation {:?}", other),
        }
    }
}
