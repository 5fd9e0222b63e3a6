//! Allowlist rules that suppress known-safe matches.
//!
//! A rule can name a PII type, an exact value, a regex, or any combination.
//! All fields set on a rule must hold for it to suppress a match; a match is
//! dropped if any rule suppresses it.

use regex::Regex;

use super::PiiMatch;
use crate::error::{Result, WiretapsError};

/// A single compiled suppression rule.
#[derive(Debug, Clone)]
pub struct AllowlistRule {
    pub pii_type: Option<String>,
    pub value: Option<String>,
    /// Anchored so it must match the whole matched text.
    pub pattern: Option<Regex>,
}

impl AllowlistRule {
    /// Compile a rule. At least one of `pii_type`, `value`, `pattern` must be set.
    pub fn new(
        pii_type: Option<String>,
        value: Option<String>,
        pattern: Option<&str>,
    ) -> Result<Self> {
        if pii_type.is_none() && value.is_none() && pattern.is_none() {
            return Err(WiretapsError::Config(
                "allowlist rule needs at least one of type, value or pattern".to_string(),
            ));
        }
        let pattern = pattern
            .map(|p| {
                Regex::new(&format!("^(?:{})$", p)).map_err(|source| {
                    WiretapsError::InvalidPattern {
                        name: format!("allowlist:{}", pii_type.as_deref().unwrap_or("*")),
                        source,
                    }
                })
            })
            .transpose()?;
        Ok(Self {
            pii_type,
            value,
            pattern,
        })
    }

    /// Suppress every match of one PII type.
    pub fn for_type(pii_type: &str) -> Self {
        Self {
            pii_type: Some(pii_type.to_string()),
            value: None,
            pattern: None,
        }
    }

    pub fn suppresses(&self, m: &PiiMatch) -> bool {
        self.pii_type.as_ref().map_or(true, |t| *t == m.pattern_name)
            && self.value.as_ref().map_or(true, |v| *v == m.matched_text)
            && self
                .pattern
                .as_ref()
                .map_or(true, |re| re.is_match(&m.matched_text))
    }
}

/// The set of configured rules, OR'd together.
#[derive(Debug, Clone, Default)]
pub struct AllowlistFilter {
    rules: Vec<AllowlistRule>,
}

impl AllowlistFilter {
    pub fn new(rules: Vec<AllowlistRule>) -> Self {
        Self { rules }
    }

    pub fn is_allowed(&self, m: &PiiMatch) -> bool {
        self.rules.iter().any(|rule| rule.suppresses(m))
    }

    /// Drop every suppressed match, keeping order.
    pub fn apply(&self, matches: Vec<PiiMatch>) -> Vec<PiiMatch> {
        if self.rules.is_empty() {
            return matches;
        }
        matches.into_iter().filter(|m| !self.is_allowed(m)).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
