use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EconError {
    #[error("invalid dataset configuration: {0}")]
    Configuration(String),

    #[error("unknown dataset '{name}' (available: {available})")]
    UnknownDataset { name: String, available: String },

    #[error("OECD request failed{}: {message}", status_suffix(.status))]
    Fetch { status: Option<u16>, message: String },

    #[error("unexpected CSV layout: {0}")]
    Schema(String),

    #[error("invalid arguments: {0}")]
    Argument(String),

    #[error("invalid time period: {0}")]
    InvalidPeriod(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("HTTP client setup failed: {0}")]
    Http(String),
}

impl EconError {
    pub fn fetch(status: Option<u16>, message: impl Into<String>) -> Self {
        EconError::Fetch {
            status,
            message: message.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" with status {code}"))
        .unwrap_or_default()
}

impl From<rusqlite::Error> for EconError {
    fn from(err: rusqlite::Error) -> Self {
        EconError::Database(err.to_string())
    }
}
