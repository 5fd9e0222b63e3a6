use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wiretaps::cli::{Cli, Commands};
use wiretaps::logging;
use wiretaps::pii::detector::PiiDetector;
use wiretaps::policy::config::{AppConfig, ProxyConfig};
use wiretaps::proxy::ProxyServer;
use wiretaps::sink::EventSink;

fn dirs_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".wiretaps")
}

fn db_path(config: &AppConfig) -> PathBuf {
    match &config.storage.path {
        Some(path) => expand_home(path),
        None => dirs_path().join("logs.db"),
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(rest)
        }
        Err(_) => path.to_path_buf(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wiretaps=info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| dirs_path().join("config.toml"));

    match cli.command {
        Commands::Start {
            host,
            port,
            target,
            redact,
            block,
        } => {
            let mut app = AppConfig::load_or_default(&config_path)?;
            if let Some(host) = host {
                app.proxy.host = host;
            }
            if let Some(port) = port {
                app.proxy.port = port;
            }
            if let Some(target) = target {
                app.proxy.target = target;
            }
            app.pii.redact |= redact;
            app.pii.block |= block;
            cmd_start(&config_path, &app).await?;
        }
        Commands::Scan { text, no_config } => {
            cmd_scan(&config_path, &text, no_config)?;
        }
        Commands::Logs { limit, pii_only } => {
            cmd_logs(&config_path, limit, pii_only)?;
        }
        Commands::Stats => {
            cmd_stats(&config_path)?;
        }
    }

    Ok(())
}

async fn cmd_start(config_path: &Path, app: &AppConfig) -> anyhow::Result<()> {
    let config = ProxyConfig::from_app_config(app)?;
    let db = db_path(app);
    let pool = logging::open_pool(&db)?;

    println!("wiretaps starting...");
    println!("Config:  {}", config_path.display());
    println!("Target:  {}", config.target_url);
    println!("Mode:    {}", config.mode_name());
    println!("Logs:    {}", db.display());

    let (sink, writer) = EventSink::from_config(&config, Some(pool));
    let server = ProxyServer::new(config, sink.clone())?;
    let listener = server.bind().await?;
    let addr = listener.local_addr()?;
    println!("Proxy running on http://{}", addr);
    println!("Point your agent's base URL at http://{}", addr);

    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    println!("\nShutting down...");

    let dropped = sink.dropped();
    drop(sink);
    writer.await?;
    if dropped > 0 {
        println!("{} log entries were dropped under load", dropped);
    }
    Ok(())
}

fn cmd_scan(config_path: &Path, text: &str, no_config: bool) -> anyhow::Result<()> {
    let detector = if no_config {
        PiiDetector::with_defaults()
    } else {
        let app = AppConfig::load_or_default(config_path)?;
        PiiDetector::from_config(&ProxyConfig::from_app_config(&app)?)?
    };

    let matches = detector.scan(text);
    if matches.is_empty() {
        println!("No PII detected.");
        return Ok(());
    }

    println!("Found {} PII match(es):", matches.len());
    for m in &matches {
        println!(
            "  {:<12} {:<9} [{}..{}] {}",
            m.pattern_name,
            format!("{:?}", m.severity).to_lowercase(),
            m.start,
            m.end,
            m.matched_text
        );
    }
    println!("\nRedacted: {}", wiretaps::pii::redact::redact(text, &matches));
    Ok(())
}

fn cmd_logs(config_path: &Path, limit: usize, pii_only: bool) -> anyhow::Result<()> {
    let app = AppConfig::load_or_default(config_path)?;
    let db = db_path(&app);
    if !db.exists() {
        println!("No log database found. Run 'wiretaps start' first.");
        return Ok(());
    }

    let conn = logging::open_db(&db)?;
    let logs = logging::query_recent(&conn, limit, pii_only)?;
    if logs.is_empty() {
        println!("No log entries found.");
        return Ok(());
    }

    for log in &logs {
        let pii = if log.pii_types.is_empty() {
            "-".to_string()
        } else {
            log.pii_types.join(",")
        };
        let status = log
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {} {} status={} action={} tokens={} pii={} redacted={} {}ms{}",
            log.timestamp,
            log.method,
            log.endpoint,
            status,
            log.action.as_str(),
            log.tokens,
            pii,
            log.redacted,
            log.duration_ms,
            log.error
                .as_ref()
                .map(|e| format!(" error=\"{}\"", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_stats(config_path: &Path) -> anyhow::Result<()> {
    let app = AppConfig::load_or_default(config_path)?;
    let db = db_path(&app);
    if !db.exists() {
        println!("No log database found. Run 'wiretaps start' to begin monitoring.");
        return Ok(());
    }

    let conn = logging::open_db(&db)?;
    let stats = logging::query_stats(&conn)?;
    println!("Total requests: {}", stats.total);
    println!("  With PII:  {}", stats.with_pii);
    println!("  Redacted:  {}", stats.redacted);
    println!("  Blocked:   {}", stats.blocked);
    println!("  Errors:    {}", stats.errors);
    Ok(())
}
