//! Message patterns that normalize fingerprints for well-known failures.
//!
//! The first matching pattern wins and produces
//! `[pattern-source, capture(key1), capture(key2), ...]` as the incident
//! fingerprint, so repeated occurrences collapse into a single issue
//! regardless of the owning workload.

use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::{AgentError, Result};

pub struct MessagePattern {
    regex: Regex,
    fingerprint_keys: &'static [&'static str],
}

lazy_static! {
    static ref PATTERNS: Vec<MessagePattern> = vec![
        MessagePattern {
            regex: Regex::new(
                r"Memory cgroup out of memory: Killed process (?P<process_id>\d+) \((?P<process_name>\w+)\).*"
            )
            .expect("invalid OOM-kill pattern"),
            fingerprint_keys: &["process_name"],
        },
        MessagePattern {
            regex: Regex::new(r"Readiness probe failed: .*")
                .expect("invalid readiness-probe pattern"),
            fingerprint_keys: &[],
        },
        MessagePattern {
            regex: Regex::new(r"0/(?P<node_count>\d+) nodes are available.*")
                .expect("invalid scheduling-failure pattern"),
            fingerprint_keys: &[],
        },
        MessagePattern {
            regex: Regex::new(r"Liveness probe failed: .*")
                .expect("invalid liveness-probe pattern"),
            fingerprint_keys: &[],
        },
        MessagePattern {
            regex: Regex::new(
                r#"(?:Exec|HTTP) lifecycle hook \(.+\) for Container "(?P<container_name>[^"]+)" in Pod ".+" failed.*"#
            )
            .expect("invalid lifecycle-hook pattern"),
            fingerprint_keys: &["container_name"],
        },
    ];
}

/// Verify that every fingerprint key names a capture group of its regex.
/// Called once at startup; a mismatch is a fatal configuration error.
pub fn validate_patterns() -> Result<()> {
    validate(&PATTERNS)
}

fn validate(patterns: &[MessagePattern]) -> Result<()> {
    for pattern in patterns {
        let groups: Vec<&str> = pattern.regex.capture_names().flatten().collect();
        for key in pattern.fingerprint_keys {
            if !groups.contains(key) {
                return Err(AgentError::Config(format!(
                    "invalid pattern: cannot find {key:?} in pattern {:?}",
                    pattern.regex.as_str()
                )));
            }
        }
    }
    Ok(())
}

/// Match `message` against the pattern table, first match wins.
pub fn match_message(message: &str) -> Option<Vec<String>> {
    match_against(&PATTERNS, message)
}

fn match_against(patterns: &[MessagePattern], message: &str) -> Option<Vec<String>> {
    for pattern in patterns {
        if let Some(captures) = pattern.regex.captures(message) {
            let mut fingerprint = vec![pattern.regex.as_str().to_string()];
            for key in pattern.fingerprint_keys {
                fingerprint.push(
                    captures
                        .name(key)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                );
            }
            return Some(fingerprint);
        }
    }
    None
}
