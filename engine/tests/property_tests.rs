use proptest::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

use sdk::errors::StewardError;
use steward_engine::agent::{Handler, HandlerSet};
use steward_engine::config::Config;
use steward_engine::dispatch::normalize;
use steward_engine::permissions::PermissionPolicy;
use steward_engine::safety::{RiskTier, SafetyGuard};
use steward_engine::store::truncate_to_cap;

fn guard() -> SafetyGuard {
    SafetyGuard::new().unwrap()
}

/// Re-join `words` with arbitrary runs of spaces and tabs
fn respace(words: &[&str], gaps: &[String]) -> String {
    let mut out = gaps.first().cloned().unwrap_or_default();
    for (i, word) in words.iter().enumerate() {
        out.push_str(word);
        out.push_str(gaps.get(i + 1).map(String::as_str).unwrap_or(" "));
    }
    out
}

// Configuration survives a TOML round trip
proptest! {
    #[test]
    fn test_config_parsing_round_trip(
        log_level in "error|warn|info|debug|trace",
        default_provider in "ollama|openai",
        sensitivity in 0.0..=1.0f64,
        max_concurrency in 1..=64usize,
        result_cap in 64..=65536usize,
    ) {
        let mut config = Config::default();
        config.core.log_level = log_level;
        config.llm.default_provider = default_provider;
        config.llm.sensitivity_threshold = sensitivity;
        config.execution.max_concurrency = max_concurrency;
        config.execution.result_cap_bytes = result_cap;

        let toml_string = toml::to_string(&config).expect("Failed to serialize Config to string");
        let parsed: Config = toml::from_str(&toml_string).expect("Failed to deserialize TOML to Config");

        prop_assert_eq!(config.core.log_level, parsed.core.log_level);
        prop_assert_eq!(config.llm.default_provider, parsed.llm.default_provider);
        prop_assert_eq!(config.llm.sensitivity_threshold, parsed.llm.sensitivity_threshold);
        prop_assert_eq!(config.execution.max_concurrency, parsed.execution.max_concurrency);
        prop_assert_eq!(config.execution.result_cap_bytes, parsed.execution.result_cap_bytes);
    }
}

// Recursive deletion of a root-level target is BLOCKED however it is spelled,
// wherever the target sits among the operands
proptest! {
    #[test]
    fn test_root_recursive_delete_always_blocked(
        flags in prop::sample::select(vec!["-rf", "-fr", "-r -f", "-Rf", "--recursive --force", "-rfv", "-r -v"]),
        target in prop::sample::select(vec![
            "/", "/*", "~", "~/", "/etc", "/usr/", "/usr/*", "/home", "/var", "/boot/*",
            "//", "/./", "/*/", "\"/\"", "'/etc'", "$HOME", "${HOME}/", "/tmp/..", "/usr//",
        ]),
        before in prop::collection::vec(
            prop::sample::select(vec!["/tmp/x", "build", "./cache", "--", "-v", "/opt/app/logs"]),
            0..3,
        ),
        after in prop::collection::vec(
            prop::sample::select(vec!["/tmp/y", "notes.txt", "/srv/www/old", "--no-preserve-root"]),
            0..3,
        ),
        sudo in any::<bool>(),
        gaps in prop::collection::vec("[ \t]{1,3}", 12),
    ) {
        let mut words: Vec<&str> = Vec::new();
        if sudo {
            words.push("sudo");
        }
        words.push("rm");
        words.extend(flags.split(' '));
        words.extend(before.iter().copied());
        words.push(target);
        words.extend(after.iter().copied());

        let action = respace(&words, &gaps);
        prop_assert_eq!(guard().classify(&action), RiskTier::Blocked, "{:?}", action);
    }

    // The same holds when the flags come after the operands
    #[test]
    fn test_trailing_recursive_flag_is_blocked(
        target in prop::sample::select(vec!["/", "/etc", "/var/", "~", "/usr/*", "\"//\"", "$HOME"]),
        others in prop::collection::vec(prop::sample::select(vec!["/tmp/x", "build"]), 0..3),
        flag in prop::sample::select(vec!["-r", "-rf", "-R", "--recursive"]),
    ) {
        let mut words: Vec<&str> = vec!["rm"];
        words.extend(others.iter().copied());
        words.push(target);
        words.push(flag);

        let action = words.join(" ");
        prop_assert_eq!(guard().classify(&action), RiskTier::Blocked, "{:?}", action);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    // Extra whitespace never changes the verdict
    #[test]
    fn test_classification_ignores_whitespace(
        words in prop::collection::vec(
            prop::sample::select(vec![
                "rm", "-rf", "/", "/tmp/x", "git", "push", "--force", "origin", "ls", "-la",
                "systemctl", "restart", "nginx", "sudo", "chmod", "kill", "-9", "echo", "hi",
            ]),
            1..7,
        ),
        gaps in prop::collection::vec("[ \t]{1,4}", 8),
    ) {
        let guard = guard();
        let compact = words.join(" ");
        let spaced = respace(&words, &gaps);
        prop_assert_eq!(guard.classify(&compact), guard.classify(&spaced));
    }

    // Prefixing with sudo never lowers the tier
    #[test]
    fn test_sudo_prefix_is_monotone(action in "[a-z/ -]{0,40}") {
        let guard = guard();
        let plain = guard.classify(&action);
        let privileged = guard.classify(&format!("sudo {}", action));
        prop_assert!(privileged >= plain, "{:?}: {} -> {}", action, plain, privileged);
    }

    // Classification is a pure function of the action
    #[test]
    fn test_classification_is_deterministic(action in ".{0,60}") {
        let guard = guard();
        let first = guard.assess(&action);
        let second = guard.assess(&action);
        prop_assert_eq!(first.tier, second.tier);
        prop_assert_eq!(first.rule, second.rule);
        prop_assert_eq!(first.preview, second.preview);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    // Anything under a whitelisted root is allowed and stays under it
    #[test]
    fn test_paths_inside_root_are_allowed(segments in prop::collection::vec("[a-z0-9_]{1,8}", 0..4)) {
        let root = TempDir::new().unwrap();
        let policy = PermissionPolicy::new(&[root.path().to_path_buf()]);

        let mut path = root.path().to_path_buf();
        for s in &segments {
            path.push(s);
        }

        let resolved = policy.check_path(&path, "FileAgent").unwrap();
        let canonical_root = root.path().canonicalize().unwrap();
        prop_assert!(resolved.starts_with(&canonical_root));
    }

    // A sibling directory is outside the whitelist
    #[test]
    fn test_paths_outside_root_are_denied(segments in prop::collection::vec("[a-z0-9_]{1,8}", 0..4)) {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let policy = PermissionPolicy::new(&[root.path().to_path_buf()]);

        let mut path = other.path().to_path_buf();
        for s in &segments {
            path.push(s);
        }

        prop_assert!(
            matches!(policy.check_path(&path, "FileAgent"), Err(StewardError::PathNotWhitelisted(_))),
            "{:?}",
            path
        );
    }

    // The built-in blacklist wins even when its root is whitelisted
    #[cfg(unix)]
    #[test]
    fn test_blacklisted_paths_are_always_denied(
        blocked in prop::sample::select(vec!["/etc", "/boot", "/root", "/var/log", "/proc", "/sys", "/dev"]),
        segments in prop::collection::vec("[a-z0-9_]{1,8}", 0..3),
    ) {
        let policy = PermissionPolicy::new(&[PathBuf::from("/")]);

        let mut path = PathBuf::from(blocked);
        for s in &segments {
            path.push(s);
        }

        prop_assert!(
            matches!(policy.check_path(&path, "FileAgent"), Err(StewardError::PathDenied(_))),
            "{:?}",
            path
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    // Tier 1 is a pure function of the task text
    #[test]
    fn test_tier1_is_deterministic(
        words in prop::collection::vec(
            prop::sample::select(vec![
                "check", "ram", "memory", "usage", "cpu", "disk", "list", "files", "in", "/tmp",
                "git", "status", "log", "ping", "example.com", "show", "the", "please", "read",
            ]),
            1..6,
        ),
    ) {
        let handlers = HandlerSet::builtin().unwrap();
        let task = words.join(" ");

        for handler in handlers.iter() {
            let first = handler.tools().tier1(&task);
            let second = handler.tools().tier1(&task);
            match (&first, &second) {
                (Ok(a), Ok(b)) => {
                    prop_assert_eq!(
                        serde_json::to_value(a).unwrap(),
                        serde_json::to_value(b).unwrap()
                    );
                    prop_assert_eq!(a.tokens_used, 0);
                    let threshold = handler.tools().get(a.tool()).unwrap().threshold;
                    prop_assert!(a.confidence >= threshold);
                }
                (Err(a), Err(b)) => prop_assert_eq!(a, b),
                _ => prop_assert!(false, "tier1 diverged for {:?}", task),
            }
        }
    }

    // Keyword scoring ignores case and spacing
    #[test]
    fn test_keyword_scoring_ignores_case_and_spacing(
        words in prop::collection::vec(
            prop::sample::select(vec!["check", "RAM", "Memory", "usage", "CPU", "list", "Files", "git", "Status"]),
            1..5,
        ),
        gaps in prop::collection::vec("[ \t]{1,3}", 6),
    ) {
        let handlers = HandlerSet::builtin().unwrap();
        let plain = normalize(&words.join(" "));
        let noisy = normalize(&respace(&words, &gaps).to_uppercase());

        for handler in handlers.iter() {
            let a = handler.tools().best_match(&plain).map(|(t, s)| (t.name.clone(), s));
            let b = handler.tools().best_match(&noisy).map(|(t, s)| (t.name.clone(), s));
            prop_assert_eq!(a, b);
        }
    }
}

// Truncation stays within the cap and on a char boundary
proptest! {
    #[test]
    fn test_truncate_to_cap(text in "\\PC{0,200}", cap in 0usize..300) {
        let cut = truncate_to_cap(&text, cap);
        prop_assert!(cut.len() <= cap);
        prop_assert!(text.starts_with(cut));
        prop_assert!(text.is_char_boundary(cut.len()));
        if text.len() <= cap {
            prop_assert_eq!(cut, text.as_str());
        } else {
            // No room was wasted: the next char would not have fit
            let next = text[cut.len()..].chars().next().map(char::len_utf8).unwrap_or(0);
            prop_assert!(cut.len() + next > cap);
        }
    }
}
