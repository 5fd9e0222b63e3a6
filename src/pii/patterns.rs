//! Pattern registry: built-in PII patterns plus user-defined custom patterns.
//!
//! Ships with the following built-in categories:
//!
//! | Name | Detects | Severity |
//! |------|---------|----------|
//! | `email` | Email addresses | Medium |
//! | `phone` | International (`+CC`) and parenthesised-area-code numbers | Medium |
//! | `credit_card` | 16/15-digit card groupings, Luhn-validated | Critical |
//! | `ssn` | US Social Security Numbers | Critical |
//! | `cpf` | Brazilian CPF, check-digit validated | High |
//! | `btc_address` | Legacy and bech32 Bitcoin addresses | Medium |
//! | `eth_address` | Ethereum addresses | Medium |
//! | `private_key` | PEM headers, labelled hex keys, WIF keys | Critical |
//! | `seed_phrase` | Runs of 12 or more mnemonic-shaped words | High |
//!
//! All regexes are compiled once when the registry is built; the registry is
//! read-only afterwards and shared across concurrent scans.

use regex::Regex;
use tracing::warn;

use super::{PatternSpec, Severity, Validator};
use crate::error::{Result, WiretapsError};

/// Names of all built-in patterns, in registry order.
pub const BUILTIN_NAMES: &[&str] = &[
    "email",
    "phone",
    "credit_card",
    "ssn",
    "cpf",
    "btc_address",
    "eth_address",
    "private_key",
    "seed_phrase",
];

fn builtin(name: &str, regex: &str, severity: Severity, validator: Option<Validator>) -> PatternSpec {
    PatternSpec {
        name: name.to_string(),
        // Built-in regexes are constants covered by the tests below.
        regex: Regex::new(regex).unwrap(),
        validator,
        severity,
        builtin: true,
    }
}

/// Build every built-in pattern, in [`BUILTIN_NAMES`] order.
pub fn builtin_patterns() -> Vec<PatternSpec> {
    vec![
        // === Contact ===
        builtin(
            "email",
            r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
            Severity::Medium,
            None,
        ),
        // Requires a "+CC" prefix or a "(area)" group so bare digit runs
        // (card numbers, ids) are left to the other patterns.
        builtin(
            "phone",
            r"(?:\+\d{1,3}[-. ]?\(?\d{1,4}\)?[-. ]?\d{3,5}[-. ]?\d{4}|\(\d{2,3}\)[-. ]?\d{3,5}[-. ]?\d{4})\b",
            Severity::Medium,
            None,
        ),
        // === Financial / government ids ===
        builtin(
            "credit_card",
            r"\b(?:\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}|\d{4}[- ]?\d{6}[- ]?\d{5})\b",
            Severity::Critical,
            Some(luhn_valid),
        ),
        builtin("ssn", r"\b\d{3}-\d{2}-\d{4}\b", Severity::Critical, None),
        builtin(
            "cpf",
            r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b",
            Severity::High,
            Some(cpf_valid),
        ),
        // === Crypto ===
        builtin(
            "btc_address",
            r"\b(?:bc1[a-z0-9]{39,59}|[13][a-km-zA-HJ-NP-Z1-9]{25,34})\b",
            Severity::Medium,
            None,
        ),
        builtin("eth_address", r"\b0x[a-fA-F0-9]{40}\b", Severity::Medium, None),
        builtin(
            "private_key",
            concat!(
                r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |ENCRYPTED )?PRIVATE KEY-----",
                r#"|(?i:priv(?:ate)?[_ -]?key|secret[_ -]?key)(?:\\?["'])?\s*[:=]\s*(?:\\?["'])?(?:0x)?[a-fA-F0-9]{64}\b"#,
                r"|\b[5KL][1-9A-HJ-NP-Za-km-z]{50,51}\b",
            ),
            Severity::Critical,
            None,
        ),
        // A 12 or 24 word mnemonic can sit anywhere inside a longer run of
        // same-shaped words, so the whole run is reported.
        builtin(
            "seed_phrase",
            r"\b[a-z]{3,8}(?: [a-z]{3,8}){11,}\b",
            Severity::High,
            None,
        ),
    ]
}

/// Luhn checksum over the digits of `candidate` (separators ignored).
pub fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Brazilian CPF check-digit validation. Repeated-digit CPFs are rejected.
pub fn cpf_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 || digits.iter().all(|&d| d == digits[0]) {
        return false;
    }
    let check_digit = |len: usize| -> u32 {
        let sum: u32 = digits[..len]
            .iter()
            .enumerate()
            .map(|(i, &d)| d * (len as u32 + 1 - i as u32))
            .sum();
        let rem = (sum * 10) % 11;
        if rem == 10 {
            0
        } else {
            rem
        }
    };
    check_digit(9) == digits[9] && check_digit(10) == digits[10]
}

/// Compiled, read-only set of patterns used by the detector.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    patterns: Vec<PatternSpec>,
}

impl PatternRegistry {
    /// Registry with every built-in pattern and no custom ones.
    pub fn new() -> Self {
        Self {
            patterns: builtin_patterns(),
        }
    }

    /// Registry with only the named built-ins. Unknown names are warned about and ignored.
    pub fn with_patterns(pattern_names: &[String]) -> Self {
        for name in pattern_names {
            if !BUILTIN_NAMES.contains(&name.as_str()) {
                warn!("Unknown built-in PII pattern '{}' ignored", name);
            }
        }
        let patterns = builtin_patterns()
            .into_iter()
            .filter(|p| pattern_names.contains(&p.name))
            .collect();
        Self { patterns }
    }

    /// Build the registry from a built-in selection (`None` = all) plus custom patterns.
    ///
    /// Fails with [`WiretapsError::DuplicatePattern`] when a custom name collides
    /// with a built-in or another custom pattern.
    pub fn build(builtins: Option<&[String]>, custom: &[PatternSpec]) -> Result<Self> {
        let mut registry = match builtins {
            Some(names) => Self::with_patterns(names),
            None => Self::new(),
        };
        for spec in custom {
            registry.add_custom(spec.clone())?;
        }
        Ok(registry)
    }

    /// Append a custom pattern, rejecting duplicate names.
    pub fn add_custom(&mut self, spec: PatternSpec) -> Result<()> {
        if is_reserved_name(&spec.name) || self.get(&spec.name).is_some() {
            return Err(WiretapsError::DuplicatePattern(spec.name));
        }
        self.patterns.push(spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PatternSpec> {
        self.patterns.iter().find(|p| p.name == name)
    }

    pub fn patterns(&self) -> &[PatternSpec] {
        &self.patterns
    }

    pub fn names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in names stay reserved even when the built-in itself is disabled.
pub fn is_reserved_name(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}
