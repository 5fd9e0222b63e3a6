use thiserror::Error;

/// Unified error type for the wiretaps library.
#[derive(Debug, Error)]
pub enum WiretapsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Environment variable not set: {0}")]
    ConfigEnvVar(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid regex for pattern '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Duplicate pattern name: {0}")]
    DuplicatePattern(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Notification error: {0}")]
    Notification(String),
}

pub type Result<T> = std::result::Result<T, WiretapsError>;
