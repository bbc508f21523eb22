//! Explain mode
//!
//! Breaks a command line into its parts without running it. The model is
//! asked first; when it is unavailable or its reply is unusable a small
//! offline table is used instead. Every explanation carries the safety
//! verdict so the user sees the tier the command would get.

use sdk::errors::StewardError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::{extract_json_object, router::LLMRouter, Message};
use crate::safety::{SafetyGuard, Verdict};

const EXPLAIN_PROMPT: &str = "You explain shell command lines to a careful user. \
Do not suggest changes and do not run anything. Break the command into its parts \
(program, subcommands, flags, arguments, pipes and redirections) in order. \
Reply with JSON only: {\"parts\": [{\"part\": \"...\", \"meaning\": \"...\"}], \
\"summary\": \"one sentence on what the whole command does\"}";

/// Programs the offline table knows by name
const PROGRAMS: &[(&str, &str)] = &[
    ("ls", "List directory contents"),
    ("cd", "Change the working directory"),
    ("cp", "Copy files or directories"),
    ("mv", "Move or rename files"),
    ("rm", "Remove files or directories"),
    ("mkdir", "Create directories"),
    ("cat", "Print file contents"),
    ("grep", "Search text for a pattern"),
    ("find", "Search for files in a directory tree"),
    ("chmod", "Change file permissions"),
    ("chown", "Change file owner and group"),
    ("tar", "Create or extract archives"),
    ("curl", "Transfer data from or to a URL"),
    ("ssh", "Open a remote shell"),
    ("ps", "List running processes"),
    ("kill", "Send a signal to a process"),
    ("df", "Show disk space usage"),
    ("du", "Estimate file space usage"),
    ("git", "Version control"),
    ("docker", "Manage containers and images"),
    ("docker-compose", "Manage multi-container applications"),
    ("systemctl", "Control system services"),
    ("apt", "Debian package manager"),
    ("pip", "Python package installer"),
    ("npm", "Node.js package manager"),
];

/// Prefixes that run the next word as a program
const WRAPPERS: &[(&str, &str)] = &[
    ("sudo", "Run the following command as root"),
    ("env", "Run the following command with a modified environment"),
    ("nohup", "Keep the following command running after logout"),
    ("time", "Time the following command"),
];

const OPERATORS: &[(&str, &str)] = &[
    ("|", "Pipe: send output to the next command"),
    ("||", "Run the next command only if this one fails"),
    ("&&", "Run the next command only if this one succeeds"),
    (";", "Run the next command afterwards"),
    (">", "Redirect output to a file, replacing it"),
    (">>", "Append output to a file"),
    ("<", "Read input from a file"),
    ("2>", "Redirect errors to a file"),
    ("&", "Run in the background"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainedPart {
    pub part: String,
    pub meaning: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub command: String,
    pub parts: Vec<ExplainedPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub verdict: Verdict,
    /// Produced from the offline table
    pub offline: bool,
    pub tokens_used: u32,
}

#[derive(Debug, Deserialize)]
struct ModelExplanation {
    parts: Vec<ExplainedPart>,
    #[serde(default)]
    summary: Option<String>,
}

pub struct Explainer {
    guard: SafetyGuard,
    llm: Option<Arc<LLMRouter>>,
}

impl Explainer {
    /// Offline only
    pub fn new(guard: SafetyGuard) -> Self {
        Self { guard, llm: None }
    }

    pub fn with_model(mut self, llm: Arc<LLMRouter>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub async fn explain(&self, command: &str) -> Explanation {
        let verdict = self.assess(command).await;

        if let Some(llm) = &self.llm {
            match ask_model(llm, &verdict.action).await {
                Ok((parsed, tokens)) => {
                    return Explanation {
                        command: verdict.action.clone(),
                        parts: parsed.parts,
                        summary: parsed.summary.filter(|s| !s.trim().is_empty()),
                        verdict,
                        offline: false,
                        tokens_used: tokens,
                    };
                }
                Err(e) => warn!("Model explanation unavailable, using offline table: {}", e),
            }
        }

        Explanation {
            command: verdict.action.clone(),
            parts: explain_offline(&verdict.action),
            summary: None,
            verdict,
            offline: true,
            tokens_used: 0,
        }
    }

    /// Shellcheck is a subprocess, so annotation runs off the async workers
    async fn assess(&self, command: &str) -> Verdict {
        let verdict = self.guard.assess(command);
        if self.guard.analyzer().is_none() {
            return verdict;
        }
        let guard = self.guard.clone();
        let fallback = verdict.clone();
        tokio::task::spawn_blocking(move || guard.annotate(verdict))
            .await
            .unwrap_or(fallback)
    }
}

async fn ask_model(llm: &LLMRouter, command: &str) -> Result<(ModelExplanation, u32), StewardError> {
    let messages = [
        Message::system(EXPLAIN_PROMPT),
        Message::user(format!("Command: {}", command)),
    ];
    let (completion, provider) = llm.call(&messages).await?;
    debug!("Explanation from {}: {}", provider, completion.content);

    let value = extract_json_object(&completion.content).ok_or_else(|| {
        StewardError::LLMInvalidJson("no JSON object in explanation".to_string())
    })?;
    let parsed: ModelExplanation = serde_json::from_value(value)
        .map_err(|e| StewardError::LLMInvalidJson(e.to_string()))?;
    if parsed.parts.is_empty() {
        return Err(StewardError::LLMInvalidJson(
            "explanation has no parts".to_string(),
        ));
    }
    Ok((parsed, completion.tokens))
}

/// Word-by-word breakdown from the built-in tables
pub fn explain_offline(command: &str) -> Vec<ExplainedPart> {
    let mut parts = Vec::new();
    let mut expect_program = true;

    for word in command.split_whitespace() {
        let meaning = if let Some((_, m)) = OPERATORS.iter().find(|(op, _)| *op == word) {
            expect_program = !word.contains('>') && word != "<";
            m.to_string()
        } else if expect_program {
            let name = word.rsplit('/').next().unwrap_or(word);
            if let Some((_, m)) = WRAPPERS.iter().find(|(w, _)| *w == name) {
                m.to_string()
            } else {
                expect_program = false;
                PROGRAMS
                    .iter()
                    .find(|(p, _)| *p == name)
                    .map(|(_, m)| m.to_string())
                    .unwrap_or_else(|| "Program to run".to_string())
            }
        } else if word.starts_with('-') {
            "Flag or option".to_string()
        } else {
            "Argument".to_string()
        };

        parts.push(ExplainedPart {
            part: word.to_string(),
            meaning,
        });
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::RiskTier;

    fn meanings(command: &str) -> Vec<(String, String)> {
        explain_offline(command)
            .into_iter()
            .map(|p| (p.part, p.meaning))
            .collect()
    }

    #[test]
    fn test_offline_breakdown_of_a_pipeline() {
        let parts = meanings("ps aux | grep -i nginx > out.txt");
        let expected = [
            ("ps", "List running processes"),
            ("aux", "Argument"),
            ("|", "Pipe: send output to the next command"),
            ("grep", "Search text for a pattern"),
            ("-i", "Flag or option"),
            ("nginx", "Argument"),
            (">", "Redirect output to a file, replacing it"),
            ("out.txt", "Argument"),
        ];
        assert_eq!(parts.len(), expected.len());
        for ((part, meaning), (want_part, want_meaning)) in parts.iter().zip(expected) {
            assert_eq!(part, want_part);
            assert_eq!(meaning, want_meaning);
        }
    }

    #[test]
    fn test_wrappers_and_paths_keep_program_position() {
        let parts = meanings("sudo /usr/bin/systemctl restart nginx && unknowntool -v");
        assert_eq!(parts[0].1, "Run the following command as root");
        assert_eq!(parts[1].1, "Control system services");
        assert_eq!(parts[2].1, "Argument");
        assert_eq!(parts[5].1, "Program to run");
        assert_eq!(parts[6].1, "Flag or option");
    }

    #[tokio::test]
    async fn test_offline_explanation_carries_verdict() {
        let explainer = Explainer::new(SafetyGuard::new().unwrap());
        let explanation = explainer.explain("  git   push --force ").await;

        assert!(explanation.offline);
        assert_eq!(explanation.command, "git push --force");
        assert_eq!(explanation.verdict.tier, RiskTier::HighRisk);
        assert_eq!(explanation.parts[0].meaning, "Version control");
        assert_eq!(explanation.tokens_used, 0);
        assert!(explanation.summary.is_none());
    }
}
