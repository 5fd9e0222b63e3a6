use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wiretaps")]
#[command(about = "PII-inspecting forwarding proxy for AI agents talking to LLM APIs")]
#[command(version)]
pub struct Cli {
    /// Path to config file (default: ~/.wiretaps/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy server
    Start {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,
        /// Target API URL
        #[arg(long)]
        target: Option<String>,
        /// Redact PII before sending to the LLM
        #[arg(long)]
        redact: bool,
        /// Block requests containing PII (returns 400)
        #[arg(long)]
        block: bool,
    },
    /// Scan text for PII without starting the proxy
    Scan {
        /// Text to scan
        text: String,
        /// Ignore config file (no allowlist or custom patterns)
        #[arg(long)]
        no_config: bool,
    },
    /// View request logs
    Logs {
        /// Show last N entries
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Show only entries with PII detected
        #[arg(long)]
        pii_only: bool,
    },
    /// Show aggregated request counts
    Stats,
}
