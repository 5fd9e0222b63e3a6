use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

use super::allowlist::AllowlistFilter;
use super::patterns::PatternRegistry;
use super::PiiMatch;
use crate::error::Result;
use crate::policy::config::ProxyConfig;

/// Runs every registered pattern over a text and returns allowlist-filtered
/// matches ordered by start offset.
///
/// Holds no mutable state besides the per-pattern "already reported" flags,
/// so one detector is shared by all in-flight requests.
#[derive(Debug)]
pub struct PiiDetector {
    registry: PatternRegistry,
    allowlist: AllowlistFilter,
    failed: Vec<AtomicBool>,
}

impl PiiDetector {
    pub fn new(registry: PatternRegistry, allowlist: AllowlistFilter) -> Self {
        let failed = registry.patterns().iter().map(|_| AtomicBool::new(false)).collect();
        Self {
            registry,
            allowlist,
            failed,
        }
    }

    /// All built-in patterns, no allowlist.
    pub fn with_defaults() -> Self {
        Self::new(PatternRegistry::new(), AllowlistFilter::default())
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let registry =
            PatternRegistry::build(config.builtin_patterns.as_deref(), &config.custom_patterns)?;
        Ok(Self::new(
            registry,
            AllowlistFilter::new(config.allowlist.clone()),
        ))
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Scan `text` for PII.
    ///
    /// Matches from different patterns may overlap and are all kept. A pattern
    /// that panics is skipped for this scan and reported once.
    pub fn scan(&self, text: &str) -> Vec<PiiMatch> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut found: Vec<(usize, PiiMatch)> = Vec::new();
        for (idx, pattern) in self.registry.patterns().iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| pattern.find_all(text))) {
                Ok(matches) => found.extend(matches.into_iter().map(|m| (idx, m))),
                Err(_) => {
                    if !self.failed[idx].swap(true, Ordering::Relaxed) {
                        error!("PII pattern '{}' failed during scan; skipping it", pattern.name);
                    }
                }
            }
        }

        found.sort_by(|(ia, a), (ib, b)| {
            a.start
                .cmp(&b.start)
                .then(ia.cmp(ib))
                .then(a.end.cmp(&b.end))
        });
        self.allowlist
            .apply(found.into_iter().map(|(_, m)| m).collect())
    }
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::with_defaults()
    }
}
