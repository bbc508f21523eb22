//! Safety guard
//!
//! Classifies a concrete command string into one of three risk tiers:
//!
//! - **BLOCKED**: catastrophic (recursive deletion of root-level paths, raw
//!   disk formatting or overwrites, fork bombs). Never executed, never
//!   overridable by confirmation.
//! - **HIGH_RISK**: destructive but sometimes legitimate (recursive deletes
//!   elsewhere, privileged mutation, forced history rewrites, service state
//!   changes). Requires confirmation; a preview rewrite is offered when the
//!   command family has one.
//! - **SAFE**: everything else.
//!
//! Rules are evaluated as an ordered cascade: every BLOCKED rule first, then
//! every HIGH_RISK rule, first match wins. The table is closed and total, so
//! classification is deterministic.

use async_trait::async_trait;
use regex::Regex;
use sdk::errors::StewardError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::Arc;

pub mod analysis;
pub mod dry_run;

pub use analysis::{Shellcheck, StaticAnalyzer};
pub use dry_run::{DryRunRule, DryRunTable};

/// Risk tier of a concrete action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Safe,
    HighRisk,
    Blocked,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Safe => write!(f, "SAFE"),
            RiskTier::HighRisk => write!(f, "HIGH_RISK"),
            RiskTier::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// A root-level target: `/`, `~`, `.`, a top-level system directory, or a
/// glob directly inside one of them
macro_rules! root_operand {
    () => {
        r"(?:/\*?|~/?\*?|\./?\*?|/(?:bin|boot|dev|etc|home|lib|lib64|opt|root|sbin|srv|sys|usr|var)/?\*?)"
    };
}

/// One `rm` argument; command separators end the argument list
macro_rules! rm_arg {
    () => {
        r"[^\s;&|]+"
    };
}

/// The recursive flag, bundled (`-rf`, `-Rv`) or long
macro_rules! recursive_flag {
    () => {
        r"(?:-[a-z]*r[a-z]*|--recursive)\b"
    };
}

const BLOCKED_RULES: &[(&str, &str)] = &[
    (
        "root_recursive_delete",
        concat!(
            r"(?i)\brm(?:\s+", rm_arg!(), r")*?\s+",
            "(?:",
            recursive_flag!(), r"(?:\s+", rm_arg!(), r")*?\s+", root_operand!(), r"(?:\s|$)",
            "|",
            root_operand!(), r"\s+(?:", rm_arg!(), r"\s+)*?", recursive_flag!(),
            ")",
        ),
    ),
    ("windows_recursive_delete", r"(?i)\bdel\s+/s\s+/q\s+[a-z]:\\"),
    ("format_drive", r"(?i)\bformat\s+[a-z]:"),
    ("make_filesystem", r"(?i)\bmkfs\b"),
    (
        "disk_overwrite",
        r"(?i)\bdd\s+.*\bof=/dev/(?:sd|hd|vd|nvme|mmcblk)",
    ),
    ("raw_disk_redirect", r">\s*/dev/(?:sd|hd|vd|nvme)[a-z0-9]*"),
    ("world_writable_root", r"(?i)\bchmod\s+-R\s+777\s+/"),
    ("chown_root", r"(?i)\bchown\s+-R\s+[^;&|]*\s/\*?(?:\s|$)"),
    (
        "find_root_delete",
        r"(?i)\bfind\s+(?:/|~|/(?:bin|boot|dev|etc|home|lib|lib64|opt|root|sbin|srv|sys|usr|var))/?\s+(?:[^;&|]*\s)?(?:-delete\b|-exec\s+rm\b)",
    ),
    ("fork_bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
];

const HIGH_RISK_RULES: &[(&str, &str)] = &[
    ("recursive_delete", r"(?i)\brm\s+(?:-{1,2}[a-z-]+\s+)*(?:-[a-z]*r|--recursive)"),
    ("windows_recursive_rmdir", r"(?i)\brmdir\s+/s"),
    ("find_delete", r"(?i)\bfind\b[^;&|]*\s(?:-delete\b|-exec\s+rm\b)"),
    ("privileged_delete", r"(?i)\bsudo\s+rm\b"),
    (
        "privileged_mutation",
        r"(?i)\bsudo\s+(?:chmod|chown|mv|dd|tee|sed|truncate)\b",
    ),
    ("force_kill", r"(?i)\bkill\s+-(?:9|kill)\b"),
    ("process_kill", r"(?i)\b(?:pkill|killall)\b"),
    ("shutdown", r"(?i)\b(?:shutdown|poweroff|halt)\b"),
    ("reboot", r"(?i)\breboot\b"),
    (
        "service_state_change",
        r"(?i)\bsystemctl\s+(?:stop|restart|disable|mask|kill)\b",
    ),
    ("firewall_flush", r"(?i)\biptables\s+-F"),
    ("container_prune", r"(?i)\bdocker\s+(?:system|image|volume|container)\s+prune"),
    ("git_force_push", r"(?i)\bgit\s+push\b.*(?:--force|\s-f\b)"),
    ("git_hard_reset", r"(?i)\bgit\s+reset\s+--hard"),
    ("git_clean", r"(?i)\bgit\s+clean\s+-[a-z]*f"),
    ("sql_drop", r"(?i)\bDROP\s+(?:TABLE|DATABASE)\b"),
    ("sql_delete", r"(?i)\bDELETE\s+FROM\b"),
    ("sql_truncate", r"(?i)\bTRUNCATE\b"),
    ("pip_uninstall", r"(?i)\bpip3?\s+uninstall\b"),
    ("npm_global_uninstall", r"(?i)\bnpm\s+uninstall\s+-g\b"),
    (
        "package_removal",
        r"(?i)\b(?:apt|apt-get|dnf|yum)\s+(?:remove|purge|autoremove|erase)\b",
    ),
    ("rsync_delete", r"(?i)\brsync\b.*--delete"),
];

/// A named pattern belonging to one tier
#[derive(Debug, Clone)]
pub struct SafetyRule {
    pub name: String,
    pub tier: RiskTier,
    pattern: Regex,
}

impl SafetyRule {
    pub fn new(name: &str, tier: RiskTier, pattern: &str) -> Result<Self, StewardError> {
        let pattern = Regex::new(pattern).map_err(|e| {
            StewardError::ConfigInvalid(format!("Invalid safety rule '{}': {}", name, e))
        })?;
        Ok(Self {
            name: name.to_string(),
            tier,
            pattern,
        })
    }

    pub fn matches(&self, action: &str) -> bool {
        self.pattern.is_match(action)
    }
}

/// Outcome of classifying one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Normalized action text that was classified
    pub action: String,
    pub tier: RiskTier,
    /// Name of the rule that matched, `None` for SAFE
    pub rule: Option<String>,
    /// Non-destructive rewrite, only offered for HIGH_RISK actions
    pub preview: Option<String>,
    /// Static analysis findings; informational only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

/// Lower-level rule cascade plus the preview table
#[derive(Debug, Clone)]
pub struct SafetyGuard {
    blocked: Vec<SafetyRule>,
    high_risk: Vec<SafetyRule>,
    previews: DryRunTable,
    analyzer: Option<Arc<dyn StaticAnalyzer>>,
}

impl SafetyGuard {
    /// Guard with the built-in rules and preview table
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self, StewardError> {
        let blocked = BLOCKED_RULES
            .iter()
            .map(|(name, p)| SafetyRule::new(name, RiskTier::Blocked, p))
            .collect::<Result<_, _>>()?;
        let high_risk = HIGH_RISK_RULES
            .iter()
            .map(|(name, p)| SafetyRule::new(name, RiskTier::HighRisk, p))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            blocked,
            high_risk,
            previews: DryRunTable::builtin(),
            analyzer: None,
        })
    }

    /// Replace the preview table
    pub fn with_previews(mut self, previews: DryRunTable) -> Self {
        self.previews = previews;
        self
    }

    /// Attach a static analyzer to non-BLOCKED verdicts
    pub fn with_analyzer(mut self, analyzer: Arc<dyn StaticAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn analyzer(&self) -> Option<&Arc<dyn StaticAnalyzer>> {
        self.analyzer.as_ref()
    }

    /// Run the analyzer over a verdict's action
    ///
    /// BLOCKED actions never run, so they are not analyzed. Blocks on the
    /// analyzer process; async callers should move this off the runtime.
    pub fn annotate(&self, mut verdict: Verdict) -> Verdict {
        if verdict.tier != RiskTier::Blocked {
            if let Some(analyzer) = &self.analyzer {
                verdict.analysis = analyzer.analyze(&verdict.action);
            }
        }
        verdict
    }

    /// Append a rule to the end of its tier
    pub fn add_rule(&mut self, rule: SafetyRule) -> Result<(), StewardError> {
        match rule.tier {
            RiskTier::Blocked => self.blocked.push(rule),
            RiskTier::HighRisk => self.high_risk.push(rule),
            RiskTier::Safe => {
                return Err(StewardError::ConfigInvalid(format!(
                    "Rule '{}' cannot target SAFE; unmatched actions are already safe",
                    rule.name
                )))
            }
        }
        Ok(())
    }

    pub fn classify(&self, action: &str) -> RiskTier {
        self.assess(action).tier
    }

    /// Classify an action and compute its preview
    pub fn assess(&self, action: &str) -> Verdict {
        let action = normalize_action(action);
        let operands = canonical_operands(&action);
        let hit = |rule: &&SafetyRule| rule.matches(&action) || rule.matches(&operands);

        if let Some(rule) = self.blocked.iter().find(hit) {
            tracing::warn!(rule = %rule.name, "BLOCKED action: {}", action);
            return Verdict {
                action,
                tier: RiskTier::Blocked,
                rule: Some(rule.name.clone()),
                preview: None,
                analysis: None,
            };
        }

        if let Some(rule) = self.high_risk.iter().find(hit) {
            let preview = self.previews.rewrite(&action);
            tracing::warn!(rule = %rule.name, "HIGH_RISK action: {}", action);
            return Verdict {
                action,
                tier: RiskTier::HighRisk,
                rule: Some(rule.name.clone()),
                preview,
                analysis: None,
            };
        }

        Verdict {
            action,
            tier: RiskTier::Safe,
            rule: None,
            preview: None,
            analysis: None,
        }
    }
}

/// Trim and collapse whitespace
pub fn normalize_action(action: &str) -> String {
    action.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rewrite every path-like token to its plainest spelling
///
/// Quotes are stripped, `$HOME` becomes `~`, and repeated `/`, `.` and `..`
/// segments are folded, so `rm -rf "//./"` is seen as `rm -rf /`. Only used
/// for rule matching; the verdict keeps the action as written.
pub fn canonical_operands(action: &str) -> String {
    action
        .split_whitespace()
        .map(canonical_operand)
        .collect::<Vec<_>>()
        .join(" ")
}

fn canonical_operand(token: &str) -> String {
    let unquoted = token.trim_matches(|c| c == '"' || c == '\'');
    let expanded = if let Some(rest) = unquoted.strip_prefix("${HOME}") {
        format!("~{}", rest)
    } else if let Some(rest) = unquoted.strip_prefix("$HOME") {
        format!("~{}", rest)
    } else {
        unquoted.to_string()
    };

    let (lead, body) = if let Some(body) = expanded.strip_prefix('/') {
        ("/", body)
    } else if let Some(body) = expanded.strip_prefix('~') {
        if !(body.is_empty() || body.starts_with('/')) {
            // `~user` is someone else's home, leave it alone
            return expanded;
        }
        ("~/", body)
    } else if expanded == "." || expanded.starts_with("./") {
        ("./", &expanded[1..])
    } else {
        return expanded;
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in body.split('/') {
        match segment {
            "" | "." => {}
            ".." if lead == "/" => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    match (lead, segments.is_empty()) {
        ("/", true) => "/".to_string(),
        ("~/", true) => "~".to_string(),
        ("./", true) => ".".to_string(),
        _ => format!("{}{}", lead, segments.join("/")),
    }
}

/// Answer to a HIGH_RISK confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Deny,
    /// Run the preview form instead
    DryRun,
}

/// Asks whether a HIGH_RISK action may run
///
/// Never consulted for BLOCKED actions.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, handler: &str, verdict: &Verdict) -> Decision;
}

/// Returns the same decision every time
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirmer(pub Decision);

#[async_trait]
impl Confirmer for FixedConfirmer {
    async fn confirm(&self, _handler: &str, _verdict: &Verdict) -> Decision {
        self.0
    }
}

/// Prompts on the terminal; one prompt at a time
#[derive(Debug, Default)]
pub struct TerminalConfirmer {
    lock: tokio::sync::Mutex<()>,
}

impl TerminalConfirmer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn confirm(&self, handler: &str, verdict: &Verdict) -> Decision {
        let _guard = self.lock.lock().await;

        let mut prompt = format!(
            "HIGH RISK ({}): [{}] {}\n",
            verdict.rule.as_deref().unwrap_or("unknown"),
            handler,
            verdict.action
        );
        if let Some(analysis) = &verdict.analysis {
            for line in analysis.lines() {
                prompt.push_str(&format!("  Lint: {}\n", line));
            }
        }
        if let Some(preview) = &verdict.preview {
            prompt.push_str(&format!("  Preview available: {}\n", preview));
            prompt.push_str("Type 'yes' to run, 'dry' to preview, anything else to cancel: ");
        } else {
            prompt.push_str("Type 'yes' to run, anything else to cancel: ");
        }

        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(prompt.as_bytes());
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => match line.trim().to_lowercase().as_str() {
                "yes" | "y" => Decision::Approve,
                "dry" | "d" if verdict.preview.is_some() => Decision::DryRun,
                _ => Decision::Deny,
            },
            _ => Decision::Deny,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> SafetyGuard {
        SafetyGuard::new().unwrap()
    }

    #[test]
    fn test_root_recursive_delete_is_blocked() {
        let guard = guard();
        for action in [
            "rm -rf /",
            "rm -rf /*",
            "rm -rf ~",
            "rm -rf .",
            "rm -fr /",
            "rm -r -f /",
            "rm --recursive --force /",
            "sudo rm -rf /",
            "rm -rf /etc",
            "rm -rf /usr/",
            "rm -rf / --no-preserve-root",
            "  rm   -rf    /   ",
        ] {
            assert_eq!(guard.classify(action), RiskTier::Blocked, "{}", action);
        }
    }

    #[test]
    fn test_root_target_among_other_operands_is_blocked() {
        let guard = guard();
        for action in [
            "rm -rf /tmp/x /",
            "rm -rf / /tmp/x",
            "rm -rf /etc /var",
            "rm -rf /tmp/a /tmp/b ~",
            "rm -rf -- /",
            "rm -rf /usr/*",
            "rm -rf /*",
            "rm -r -v /tmp/cache /home",
            "rm / -rf",
            "rm -f /boot -r",
            "sudo rm -rf build /var/",
        ] {
            let verdict = guard.assess(action);
            assert_eq!(verdict.tier, RiskTier::Blocked, "{}", action);
            assert_eq!(verdict.rule.as_deref(), Some("root_recursive_delete"), "{}", action);
        }
    }

    #[test]
    fn test_root_spelled_differently_is_blocked() {
        let guard = guard();
        for action in [
            "rm -rf //",
            "rm -rf /./",
            "rm -rf /*/",
            "rm -rf \"/\"",
            "rm -rf '/'",
            "rm -rf $HOME",
            "rm -rf ${HOME}",
            "rm -rf \"$HOME/\"",
            "rm -rf /tmp/..",
            "rm -rf /usr//",
            "rm -rf /tmp/x \"/etc\"",
        ] {
            let verdict = guard.assess(action);
            assert_eq!(verdict.tier, RiskTier::Blocked, "{}", action);
            // The verdict shows the command as written
            assert_eq!(verdict.action, normalize_action(action));
        }
    }

    #[test]
    fn test_canonical_operands() {
        assert_eq!(canonical_operands("rm -rf //./"), "rm -rf /");
        assert_eq!(canonical_operands("rm -rf \"${HOME}/\""), "rm -rf ~");
        assert_eq!(canonical_operands("rm -rf /usr/./local/../"), "rm -rf /usr");
        assert_eq!(canonical_operands("rm -rf ./build/"), "rm -rf ./build");
        assert_eq!(canonical_operands("rm -rf ~alice"), "rm -rf ~alice");
        assert_eq!(canonical_operands("git push --force"), "git push --force");
    }

    #[test]
    fn test_find_delete_rules() {
        let guard = guard();
        for action in ["find / -delete", "find / -name '*.log' -delete", "find /etc -exec rm {} ;", "find ~ -type f -delete"] {
            let verdict = guard.assess(action);
            assert_eq!(verdict.tier, RiskTier::Blocked, "{}", action);
            assert_eq!(verdict.rule.as_deref(), Some("find_root_delete"), "{}", action);
        }
        for action in ["find . -name '*.pyc' -delete", "find /tmp/build -type f -delete", "find src -exec rm {} ;"] {
            let verdict = guard.assess(action);
            assert_eq!(verdict.tier, RiskTier::HighRisk, "{}", action);
            assert_eq!(verdict.rule.as_deref(), Some("find_delete"), "{}", action);
        }
        assert_eq!(guard.classify("find / -name notes.txt"), RiskTier::Safe);
    }

    #[test]
    fn test_root_looking_prefixes_are_not_root_targets() {
        let guard = guard();
        for action in [
            "rm -rf /tmp/build /tmp/cache",
            "rm -rf ./target",
            "rm -rf ~/projects/old",
            "rm -rf /usr/local/share/app",
            "rm -rf /homework",
        ] {
            assert_eq!(guard.classify(action), RiskTier::HighRisk, "{}", action);
        }
        // A plain delete of a root-level path without recursion
        assert_eq!(guard.classify("rm /tmp/x"), RiskTier::Safe);
    }

    #[test]
    fn test_disk_destroyers_are_blocked() {
        let guard = guard();
        for action in [
            "mkfs.ext4 /dev/sdb1",
            "dd if=/dev/zero of=/dev/sda bs=1M",
            "echo x > /dev/sda",
            "format C:",
            "del /s /q C:\\",
            ":(){ :|:& };:",
            "chmod -R 777 /",
            "chown -R nobody /",
        ] {
            assert_eq!(guard.classify(action), RiskTier::Blocked, "{}", action);
        }
    }

    #[test]
    fn test_recursive_delete_elsewhere_is_high_risk() {
        let guard = guard();
        let verdict = guard.assess("rm -rf /tmp/build");
        assert_eq!(verdict.tier, RiskTier::HighRisk);
        assert_eq!(verdict.rule.as_deref(), Some("recursive_delete"));
        assert_eq!(verdict.preview, None);

        assert_eq!(guard.classify("rm -r ./target"), RiskTier::HighRisk);
        assert_eq!(guard.classify("rm -rf /home/me/project"), RiskTier::HighRisk);
    }

    #[test]
    fn test_high_risk_families() {
        let guard = guard();
        for action in [
            "sudo rm file.txt",
            "kill -9 4242",
            "pkill firefox",
            "shutdown -h now",
            "reboot",
            "systemctl stop nginx",
            "iptables -F",
            "docker system prune -a",
            "git push --force origin main",
            "git push origin main -f",
            "git reset --hard HEAD~3",
            "DROP TABLE users",
            "delete from users",
            "pip uninstall requests",
            "npm uninstall -g typescript",
            "apt-get remove nginx",
            "rsync -a --delete src/ dst/",
        ] {
            assert_eq!(guard.classify(action), RiskTier::HighRisk, "{}", action);
        }
        // Flagged, but pip has no uninstall preview
        assert_eq!(guard.assess("pip uninstall requests").preview, None);
    }

    #[test]
    fn test_high_risk_offers_preview_when_registered() {
        let guard = guard();
        let verdict = guard.assess("git push --force origin main");
        assert_eq!(
            verdict.preview.as_deref(),
            Some("git push --dry-run --force origin main")
        );

        let verdict = guard.assess("rsync -a --delete src/ dst/");
        assert_eq!(
            verdict.preview.as_deref(),
            Some("rsync --dry-run -a --delete src/ dst/")
        );
    }

    #[test]
    fn test_empty_preview_table_offers_nothing() {
        let guard = guard().with_previews(DryRunTable::empty());
        let verdict = guard.assess("git push --force");
        assert_eq!(verdict.tier, RiskTier::HighRisk);
        assert_eq!(verdict.preview, None);
    }

    #[test]
    fn test_everyday_commands_are_safe() {
        let guard = guard();
        for action in [
            "ls -la",
            "git status",
            "git log --oneline -n 10",
            "ping -c 4 example.com",
            "df -h",
            "systemctl status nginx",
            "rm notes.txt",
            "git push origin main",
        ] {
            assert_eq!(guard.classify(action), RiskTier::Safe, "{}", action);
        }
    }

    #[test]
    fn test_blocked_wins_over_high_risk() {
        // Matches both recursive_delete and root_recursive_delete
        let verdict = guard().assess("rm -rf /");
        assert_eq!(verdict.tier, RiskTier::Blocked);
        assert_eq!(verdict.rule.as_deref(), Some("root_recursive_delete"));
        assert_eq!(verdict.preview, None);
    }

    #[test]
    fn test_custom_rule_is_appended() {
        let mut guard = guard();
        guard
            .add_rule(SafetyRule::new("crontab_wipe", RiskTier::HighRisk, r"crontab\s+-r").unwrap())
            .unwrap();
        assert_eq!(guard.classify("crontab -r"), RiskTier::HighRisk);

        let safe_rule = SafetyRule::new("noop", RiskTier::Safe, "x").unwrap();
        assert!(guard.add_rule(safe_rule).is_err());
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        assert!(SafetyRule::new("broken", RiskTier::Blocked, "(unclosed").is_err());
    }

    #[test]
    fn test_normalize_action() {
        assert_eq!(normalize_action("  git\t status \n"), "git status");
    }

    #[derive(Debug)]
    struct FixedFindings(&'static str);

    impl StaticAnalyzer for FixedFindings {
        fn name(&self) -> &str {
            "fixed"
        }

        fn analyze(&self, _action: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[test]
    fn test_analysis_annotates_without_changing_tier() {
        let guard = guard().with_analyzer(Arc::new(FixedFindings("SC2086: quote this")));

        let verdict = guard.annotate(guard.assess("git push --force origin main"));
        assert_eq!(verdict.tier, RiskTier::HighRisk);
        assert_eq!(verdict.analysis.as_deref(), Some("SC2086: quote this"));

        let verdict = guard.annotate(guard.assess("ls -la"));
        assert_eq!(verdict.tier, RiskTier::Safe);
        assert!(verdict.analysis.is_some());

        let verdict = guard.annotate(guard.assess("rm -rf /"));
        assert_eq!(verdict.tier, RiskTier::Blocked);
        assert_eq!(verdict.analysis, None);

        // assess alone never runs the analyzer
        assert_eq!(guard.assess("ls -la").analysis, None);
    }

    #[test]
    fn test_analysis_is_omitted_from_json_when_absent() {
        let json = serde_json::to_value(guard().assess("ls")).unwrap();
        assert!(json.get("analysis").is_none());
        assert_eq!(json["tier"], "SAFE");
    }

    #[tokio::test]
    async fn test_fixed_confirmer() {
        let verdict = guard().assess("reboot");
        assert_eq!(
            FixedConfirmer(Decision::Deny).confirm("SysAgent", &verdict).await,
            Decision::Deny
        );
    }
}
