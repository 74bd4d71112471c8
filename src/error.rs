//! Process-level error types.
//!
//! Probe failures are data, not errors: they are recorded as
//! [`CheckResult`](crate::probe::CheckResult)s and never propagate. Only
//! configuration and terminal failures terminate the process.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors. Fatal; the process exits with code 2.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}\nrun 'hydraping init' to create one")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A malformed target entry; carries the zero-based index into
    /// `endpoints.targets` so the user can find the offending line.
    #[error("endpoints.targets[{index}]: {message}")]
    Entry { index: usize, message: String },

    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn entry(index: usize, message: impl Into<String>) -> Self {
        ConfigError::Entry {
            index,
            message: message.into(),
        }
    }
}

/// Top-level error for the binary. Maps each fatal kind to its exit code.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("terminal error: {0}")]
    Terminal(#[source] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Exit code per the CLI contract: 2 config, 3 terminal, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => 2,
            AppError::Terminal(_) => 3,
            AppError::Other(_) => 1,
        }
    }
}
