//! Configuration types for wiretaps.
//!
//! [`AppConfig`] mirrors the on-disk TOML file. The process entry point turns
//! it into a [`ProxyConfig`] once at startup; that value is immutable for the
//! life of the process and is what the proxy, detector and policy engine see.
//!
//! # Example `config.toml`
//!
//! ```toml
//! [proxy]
//! host = "127.0.0.1"
//! port = 8080
//! target = "https://api.openai.com"
//!
//! [pii]
//! redact = true
//! allowlist = [{ type = "email", pattern = ".*@mycompany\\.com" }]
//! custom = [{ name = "internal_id", regex = "INT-[0-9]{6}", severity = "high" }]
//!
//! [alerts]
//! webhook = "https://hooks.example.com/wiretaps"
//! on = ["pii_detected", "blocked"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, WiretapsError};
use crate::notification::WebhookEvent;
use crate::pii::allowlist::AllowlistRule;
use crate::pii::patterns::is_reserved_name;
use crate::pii::{PatternSpec, Severity};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// `[proxy]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxySection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upstream LLM API base URL.
    #[serde(default = "default_target")]
    pub target: String,
    /// Seconds to wait for upstream response headers.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_target() -> String {
    "https://api.openai.com".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            target: default_target(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// What to do with a custom pattern that fails to load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidPatternPolicy {
    /// Refuse to start.
    #[default]
    Abort,
    /// Drop the pattern and log a warning.
    Skip,
}

/// One `[[pii.allowlist]]` entry as written in the file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AllowlistEntry {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub pii_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// One `[[pii.custom]]` entry as written in the file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomPatternEntry {
    pub name: String,
    pub regex: String,
    #[serde(default)]
    pub severity: Severity,
}

/// `[pii]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PiiSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub redact: bool,
    #[serde(default)]
    pub block: bool,
    /// Subset of built-in patterns to enable. `None` enables all of them.
    #[serde(default)]
    pub patterns: Option<Vec<String>>,
    #[serde(default)]
    pub on_invalid_pattern: InvalidPatternPolicy,
    #[serde(default)]
    pub allowlist: Vec<AllowlistEntry>,
    #[serde(default)]
    pub custom: Vec<CustomPatternEntry>,
}

fn default_true() -> bool {
    true
}

impl Default for PiiSection {
    fn default() -> Self {
        Self {
            enabled: true,
            redact: false,
            block: false,
            patterns: None,
            on_invalid_pattern: InvalidPatternPolicy::Abort,
            allowlist: Vec::new(),
            custom: Vec::new(),
        }
    }
}

/// `[alerts]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertsSection {
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default = "default_events")]
    pub on: Vec<WebhookEvent>,
}

fn default_events() -> Vec<WebhookEvent> {
    vec![WebhookEvent::PiiDetected, WebhookEvent::Blocked]
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            webhook: None,
            on: default_events(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageSection {
    /// SQLite database path. Defaults to `~/.wiretaps/logs.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Capacity of the in-memory event queue in front of the store.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default)]
    pub pii: PiiSection,
    #[serde(default)]
    pub alerts: AlertsSection,
    #[serde(default)]
    pub storage: StorageSection,
}

impl AppConfig {
    /// Load and parse the configuration from a TOML file at the given path.
    ///
    /// Before parsing, `${VAR}` and `$VAR` placeholders in the TOML text are
    /// replaced with the corresponding environment variable values. An error is
    /// returned if a referenced variable is not set.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let content = substitute_env_vars(&content)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`load_from_path`](Self::load_from_path), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Replace `${VAR_NAME}` and `$VAR_NAME` placeholders with environment variable values.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re_braces = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    // Bare form is uppercase-only to leave regex anchors like `foo$` alone.
    let re_bare = Regex::new(r"\$([A-Z_][A-Z0-9_]*)").unwrap();

    let mut result = input.to_string();
    for cap in re_braces.captures_iter(input) {
        let var_name = &cap[1];
        let value = std::env::var(var_name)
            .map_err(|_| WiretapsError::ConfigEnvVar(var_name.to_string()))?;
        result = result.replace(&cap[0], &value);
    }

    let intermediate = result.clone();
    for cap in re_bare.captures_iter(&intermediate) {
        let var_name = &cap[1];
        let value = std::env::var(var_name)
            .map_err(|_| WiretapsError::ConfigEnvVar(var_name.to_string()))?;
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}

/// Runtime proxy configuration, built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Upstream base URL without a trailing slash.
    pub target_url: String,
    pub redact_mode: bool,
    pub block_mode: bool,
    pub pii_enabled: bool,
    /// Enabled built-ins (`None` = all).
    pub builtin_patterns: Option<Vec<String>>,
    pub allowlist: Vec<AllowlistRule>,
    pub custom_patterns: Vec<PatternSpec>,
    pub webhook_url: Option<String>,
    pub webhook_events: Vec<WebhookEvent>,
    pub upstream_timeout: Duration,
    pub max_body_bytes: usize,
    pub queue_capacity: usize,
}

impl ProxyConfig {
    /// Audit-only config forwarding to `target_url` from `127.0.0.1:8080`.
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            target_url: target_url.into().trim_end_matches('/').to_string(),
            redact_mode: false,
            block_mode: false,
            pii_enabled: true,
            builtin_patterns: None,
            allowlist: Vec::new(),
            custom_patterns: Vec::new(),
            webhook_url: None,
            webhook_events: default_events(),
            upstream_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Compile the file configuration, failing fast on invalid input.
    pub fn from_app_config(app: &AppConfig) -> Result<Self> {
        let target_url = validate_target(&app.proxy.target)?;

        if app.pii.redact && app.pii.block {
            warn!("Both redact and block are enabled; block takes precedence");
        }

        let allowlist = app
            .pii
            .allowlist
            .iter()
            .map(|entry| {
                AllowlistRule::new(
                    entry.pii_type.clone(),
                    entry.value.clone(),
                    entry.pattern.as_deref(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut custom_patterns: Vec<PatternSpec> = Vec::new();
        for entry in &app.pii.custom {
            let compiled =
                PatternSpec::custom(&entry.name, &entry.regex, entry.severity).and_then(|spec| {
                    if is_reserved_name(&spec.name)
                        || custom_patterns.iter().any(|c| c.name == spec.name)
                    {
                        Err(WiretapsError::DuplicatePattern(spec.name))
                    } else {
                        Ok(spec)
                    }
                });
            match compiled {
                Ok(spec) => custom_patterns.push(spec),
                Err(e) => match app.pii.on_invalid_pattern {
                    InvalidPatternPolicy::Abort => return Err(e),
                    InvalidPatternPolicy::Skip => warn!("Skipping custom pattern: {}", e),
                },
            }
        }

        if let Some(url) = &app.alerts.webhook {
            validate_target(url)?;
        }

        Ok(Self {
            host: app.proxy.host.clone(),
            port: app.proxy.port,
            target_url,
            redact_mode: app.pii.redact,
            block_mode: app.pii.block,
            pii_enabled: app.pii.enabled,
            builtin_patterns: app.pii.patterns.clone(),
            allowlist,
            custom_patterns,
            webhook_url: app.alerts.webhook.clone(),
            webhook_events: app.alerts.on.clone(),
            upstream_timeout: Duration::from_secs(app.proxy.timeout_secs),
            max_body_bytes: app.proxy.max_body_bytes,
            queue_capacity: app
                .storage
                .queue_capacity
                .unwrap_or(DEFAULT_QUEUE_CAPACITY)
                .max(1),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Human-readable mode name: `block`, `redact` or `audit`.
    pub fn mode_name(&self) -> &'static str {
        if self.block_mode {
            "block"
        } else if self.redact_mode {
            "redact"
        } else {
            "audit"
        }
    }
}

/// Check that `url` is an absolute http(s) URL; returns it without a trailing slash.
fn validate_target(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| WiretapsError::Config(format!("invalid URL '{}': {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(WiretapsError::Config(format!(
            "URL '{}' must use http or https",
            url
        )));
    }
    Ok(url.trim_end_matches('/').to_string())
}
