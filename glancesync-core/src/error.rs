//! Error types for glancesync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the file involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with file path and serde_yaml line context.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration file did not exist at the expected path.
    #[error("configuration not found at {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or pass --config")]
    HomeNotFound,

    #[error("master region is not configured")]
    MissingMasterRegion,

    #[error("target '{target}' has no credential")]
    MissingCredential { target: String },

    #[error("unknown target '{target}'")]
    UnknownTarget { target: String },

    #[error("invalid region id '{0}'")]
    InvalidRegionId(String),

    #[error("invalid metadata_condition for target '{target}': {source}")]
    InvalidCondition {
        target: String,
        #[source]
        source: ConditionError,
    },
}

/// Errors produced while compiling a metadata condition expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("invalid character '{ch}' at offset {offset}")]
    InvalidCharacter { ch: char, offset: usize },

    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unexpected token '{0}'")]
    Unexpected(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
