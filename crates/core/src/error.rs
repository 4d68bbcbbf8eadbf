// crates/core/src/error.rs
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when reading a JSONL log file
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Log file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Permission denied reading file: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur while listing log files
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Cannot access Claude projects directory: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("IO error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Home directory not found")]
    HomeDirNotFound,
}

/// Failure of a whole cache refresh.
///
/// Cloneable because every caller coalesced onto the same in-flight refresh
/// observes the same failure.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("Failed to list log files: {0}")]
    Listing(Arc<DiscoveryError>),
}

impl ParseError {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }
}

impl DiscoveryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }
}

impl From<DiscoveryError> for RefreshError {
    fn from(err: DiscoveryError) -> Self {
        Self::Listing(Arc::new(err))
    }
}
