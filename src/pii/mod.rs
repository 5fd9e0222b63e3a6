//! PII detection engine.
//!
//! - [`patterns`]: the [`PatternRegistry`](patterns::PatternRegistry) of
//!   built-in and custom patterns, plus checksum validators
//! - [`allowlist`]: suppression rules applied to candidate matches
//! - [`detector`]: [`PiiDetector`](detector::PiiDetector), the scan entry point
//! - [`redact`]: span-preserving placeholder rewriting
//! - [`json`]: scanning and redaction of decoded JSON string values

pub mod allowlist;
pub mod detector;
pub mod json;
pub mod patterns;
pub mod redact;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WiretapsError};

/// Severity level attached to every pattern.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Post-match check run on the regex candidate (e.g. Luhn for card numbers).
pub type Validator = fn(&str) -> bool;

/// A named detection pattern: compiled regex, optional validator, severity.
#[derive(Debug, Clone)]
pub struct PatternSpec {
    pub name: String,
    pub regex: Regex,
    pub validator: Option<Validator>,
    pub severity: Severity,
    pub builtin: bool,
}

impl PatternSpec {
    /// Compile a user-supplied pattern.
    pub fn custom(name: &str, regex: &str, severity: Severity) -> Result<Self> {
        let regex = Regex::new(regex).map_err(|source| WiretapsError::InvalidPattern {
            name: name.to_string(),
            source,
        })?;
        Ok(Self {
            name: name.to_string(),
            regex,
            validator: None,
            severity,
            builtin: false,
        })
    }

    /// All non-overlapping matches of this pattern in `text`.
    pub fn find_all(&self, text: &str) -> Vec<PiiMatch> {
        self.regex
            .find_iter(text)
            .filter(|m| self.validator.map_or(true, |check| check(m.as_str())))
            .map(|m| PiiMatch {
                pattern_name: self.name.clone(),
                matched_text: m.as_str().to_string(),
                start: m.start(),
                end: m.end(),
                severity: self.severity,
            })
            .collect()
    }
}

/// A single finding produced by a scan. `start..end` are byte offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PiiMatch {
    pub pattern_name: String,
    pub matched_text: String,
    pub start: usize,
    pub end: usize,
    pub severity: Severity,
}

impl PiiMatch {
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }
}

/// Distinct pattern names in order of first appearance.
pub fn distinct_types(matches: &[PiiMatch]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for m in matches {
        if !names.contains(&m.pattern_name) {
            names.push(m.pattern_name.clone());
        }
    }
    names
}
