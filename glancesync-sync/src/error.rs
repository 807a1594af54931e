//! Error types for glancesync-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use glancesync_core::ConfigError;

/// Failures talking to an image repository. Always scoped to one region.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The remote API rejected or failed a call.
    #[error("repository call failed in region {region}: {message}")]
    Api { region: String, message: String },

    /// The image listing did not finish within the target's timeout.
    #[error("listing images of region {region} timed out after {after:?}")]
    Timeout { region: String, after: Duration },

    /// The isolated listing worker panicked or was cancelled.
    #[error("listing worker for region {region} failed: {message}")]
    Worker { region: String, message: String },

    #[error("unknown region {region}")]
    UnknownRegion { region: String },

    #[error("image {id} not found in region {region}")]
    ImageNotFound { region: String, id: String },

    /// Local catalog I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Local catalog JSON error.
    #[error("catalog JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A region task panicked or was cancelled.
    #[error("task for region {region} failed: {message}")]
    Task { region: String, message: String },

    /// JSON serialization error (backups).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn repo_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RepositoryError {
    RepositoryError::Io {
        path: path.into(),
        source,
    }
}
