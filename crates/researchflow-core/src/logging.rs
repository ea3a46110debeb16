//! Secret scrubbing for anything that reaches the logs.
//!
//! Agent failure causes can echo request headers or provider error bodies, so
//! they pass through [`redact`] before being recorded.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret",
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9\-_]{8,})").expect("invalid sk_token regex"),
        ),
    ]
});

/// Text with secrets replaced, plus the names of the patterns that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redacted {
    pub text: String,
    pub redactions: BTreeSet<&'static str>,
}

pub fn redact(input: &str) -> Redacted {
    let mut text = input.to_string();
    let mut redactions = BTreeSet::new();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        text = regex
            .replace_all(&text, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .into_owned();
        if matched {
            redactions.insert(*name);
        }
    }
    Redacted { text, redactions }
}

/// Shorthand for log fields.
pub fn scrub(input: impl std::fmt::Display) -> String {
    redact(&input.to_string()).text
}
