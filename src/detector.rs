//! Failure classification
//!
//! Maps an attempt's raw diagnostics (stderr, stdout, tool error strings,
//! echoed HTTP statuses) onto a [`FailureKind`]. Rules are ordered; the first
//! match wins and anything unmatched is a `ProcessError`.

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::error::{Result, SluiceError};
use crate::models::FailureKind;

/// Swappable classification seam used by the orchestrator
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, diagnostics: &str) -> FailureKind;
}

/// Active bot detection, IP bans and dead identities
pub const DEFAULT_BLOCK_PATTERNS: &[&str] = &[
    r"blocked",
    r"\b403\b",
    r"\b429\b",
    r"too many requests",
    r"\bbot\b",
    r"captcha",
    r"rate[- ]?limit",
    r"ip[- ]?ban|\bbanned\b",
    r"forbidden",
    r"unusual traffic",
    r"tunnel connection failed|proxy ?error",
];

/// The content itself has nothing to extract
pub const DEFAULT_UNAVAILABLE_PATTERNS: &[&str] = &[
    r"no transcripts? (is |are )?available",
    r"no transcripts? (were )?found",
    r"transcripts? (is |are )?disabled|transcriptsdisabled",
    r"video (is )?unavailable|videounavailable",
    r"private video",
    r"has been removed|no longer available",
    r"does not exist",
    r"\b404\b",
    r"unsupported url",
    r"could not extract video id|invalid video id",
    r"members[- ]only",
    r"\bdrm\b",
];

const LOGGED_DIAGNOSTICS_LEN: usize = 300;

#[derive(Debug, Clone)]
struct Rule {
    pattern: Regex,
    kind: FailureKind,
}

/// Ordered pattern rules
#[derive(Debug, Clone)]
pub struct BlockDetector {
    rules: Vec<Rule>,
}

impl BlockDetector {
    /// Built-in rules only
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_BLOCK_PATTERNS
                .iter()
                .map(|p| (*p, FailureKind::Blocked))
                .chain(
                    DEFAULT_UNAVAILABLE_PATTERNS
                        .iter()
                        .map(|p| (*p, FailureKind::PermanentlyUnavailable)),
                )
                .filter_map(|(p, kind)| compile(p).ok().map(|pattern| Rule { pattern, kind }))
                .collect(),
        }
    }

    /// No rules at all; every failure classifies as `ProcessError`
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Built-in rules plus extra patterns
    ///
    /// Extra block patterns are checked after the built-in block rules and
    /// before any unavailable rule.
    pub fn with_extra_patterns(
        extra_block: &[String],
        extra_unavailable: &[String],
    ) -> Result<Self> {
        let mut detector = Self::empty();
        for pattern in DEFAULT_BLOCK_PATTERNS {
            detector.push_rule(pattern, FailureKind::Blocked)?;
        }
        for pattern in extra_block {
            detector.push_rule(pattern, FailureKind::Blocked)?;
        }
        for pattern in DEFAULT_UNAVAILABLE_PATTERNS {
            detector.push_rule(pattern, FailureKind::PermanentlyUnavailable)?;
        }
        for pattern in extra_unavailable {
            detector.push_rule(pattern, FailureKind::PermanentlyUnavailable)?;
        }
        Ok(detector)
    }

    /// Append a case-insensitive rule at the lowest priority
    pub fn push_rule(&mut self, pattern: &str, kind: FailureKind) -> Result<()> {
        let compiled = compile(pattern).map_err(|e| SluiceError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.rules.push(Rule {
            pattern: compiled,
            kind,
        });
        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// First rule matching the diagnostics, if any
    pub fn matched_rule(&self, diagnostics: &str) -> Option<(&str, FailureKind)> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(diagnostics))
            .map(|rule| (rule.pattern.as_str(), rule.kind))
    }
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureClassifier for BlockDetector {
    fn classify(&self, diagnostics: &str) -> FailureKind {
        match self.matched_rule(diagnostics) {
            Some((pattern, kind)) => {
                debug!(pattern, kind = kind.as_str(), "Classified failure");
                kind
            }
            None => {
                // Unmatched text is how the rule set gets refined.
                warn!(
                    diagnostics = %truncate(diagnostics, LOGGED_DIAGNOSTICS_LEN),
                    "Unclassified extraction failure"
                );
                FailureKind::ProcessError
            }
        }
    }
}

fn compile(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Cut to at most `max` bytes on a char boundary
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
