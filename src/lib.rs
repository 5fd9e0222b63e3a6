//! # wiretaps
//!
//! **See what your AI agents are sending to LLMs.**
//!
//! wiretaps is a local forwarding proxy placed between an agent and an LLM
//! API. Every outgoing request body is scanned for PII (emails, phone numbers,
//! card numbers, national IDs, crypto keys and addresses). Depending on the
//! configured mode the request is forwarded as-is, forwarded with the
//! sensitive spans masked, or rejected. Outcomes are logged to SQLite and can
//! trigger a webhook.
//!
//! ## Architecture
//!
//! - **[`pii`]**: pattern registry, detector, allowlist and redaction
//! - **[`policy`]**: TOML configuration and the pass/redact/block decision
//! - **[`proxy`]**: axum server forwarding to the target with reqwest
//! - **[`sink`]**: off-path recording of completed requests
//! - **[`logging`]**: SQLite-backed `LogEntry` store
//! - **[`notification`]**: webhook alerts
//! - **[`cli`]**: command-line interface (clap)
//! - **[`error`]**: unified error types using `thiserror`
//!
//! ## Quick Start
//!
//! ```bash
//! # Start the proxy in redact mode
//! wiretaps start --target https://api.openai.com --redact
//!
//! # Point the agent at it
//! export OPENAI_BASE_URL=http://127.0.0.1:8080/v1
//!
//! # Inspect what was sent
//! wiretaps logs --pii-only
//! ```

pub mod cli;
pub mod error;
pub mod logging;
pub mod notification;
pub mod pii;
pub mod policy;
pub mod proxy;
pub mod sink;
