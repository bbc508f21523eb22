//! Preview rewrites for high-risk command families
//!
//! Maps a command prefix (one or more leading words) to a flag that turns
//! the command into a non-destructive preview. The table is open: callers
//! register their own families, and a command with no registered family
//! has no preview.

use serde::{Deserialize, Serialize};

/// One command family and its preview flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunRule {
    /// Leading words, e.g. `["git", "push"]`
    pub prefix: Vec<String>,
    /// Flag inserted right after the prefix, e.g. `--dry-run`
    pub flag: String,
}

impl DryRunRule {
    pub fn new(prefix: &str, flag: &str) -> Self {
        Self {
            prefix: prefix.split_whitespace().map(str::to_string).collect(),
            flag: flag.to_string(),
        }
    }
}

/// Lookup table of preview rewrites
#[derive(Debug, Clone, Default)]
pub struct DryRunTable {
    rules: Vec<DryRunRule>,
}

impl DryRunTable {
    /// An empty table: nothing has a preview
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Families with a known preview flag
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for (prefix, flag) in [
            ("rsync", "--dry-run"),
            ("apt", "--simulate"),
            ("apt-get", "--simulate"),
            ("dnf", "--assumeno"),
            ("pip install", "--dry-run"),
            ("git push", "--dry-run"),
            ("git clean", "--dry-run"),
            ("docker-compose up", "--no-start"),
        ] {
            table.register(DryRunRule::new(prefix, flag));
        }
        table
    }

    /// Add a family; a later rule with the same prefix replaces the earlier one
    pub fn register(&mut self, rule: DryRunRule) {
        if rule.prefix.is_empty() {
            return;
        }
        self.rules.retain(|r| r.prefix != rule.prefix);
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite `action` into its preview form.
    ///
    /// The longest matching prefix wins. A leading `sudo` is kept in place.
    /// Returns `None` when no family matches or the flag is already present.
    pub fn rewrite(&self, action: &str) -> Option<String> {
        let words: Vec<&str> = action.split_whitespace().collect();
        let offset = usize::from(words.first().is_some_and(|w| *w == "sudo"));
        let body = &words[offset..];

        let rule = self
            .rules
            .iter()
            .filter(|r| {
                r.prefix.len() <= body.len()
                    && r.prefix.iter().zip(body).all(|(p, w)| p.as_str() == *w)
            })
            .max_by_key(|r| r.prefix.len())?;

        if body.contains(&rule.flag.as_str()) {
            return None;
        }

        let split = offset + rule.prefix.len();
        let mut out: Vec<&str> = Vec::with_capacity(words.len() + 1);
        out.extend_from_slice(&words[..split]);
        out.push(rule.flag.as_str());
        out.extend_from_slice(&words[split..]);
        Some(out.join(" "))
    }
}
