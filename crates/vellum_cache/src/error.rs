//! Error types for cache operations.

use std::path::PathBuf;

use vellum_common::GeometryError;
use vellum_config::ConfigError;

use crate::header::HeaderError;

/// Errors that can occur during cache operations.
///
/// Reads are fail-safe: the public `get` paths turn every one of these into a
/// cache miss or "no image". This enum carries the detail for logging and for
/// constructors, which fail instead of producing a half-configured store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A file could not be memory-mapped.
    #[error("failed to map {path}: {source}")]
    Map {
        /// The file being mapped.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An artifact file has an invalid or unexpected header.
    #[error("invalid artifact header in {path}: {source}")]
    InvalidHeader {
        /// The artifact file path.
        path: PathBuf,
        /// The header problem.
        source: HeaderError,
    },

    /// An artifact file's length differs from its expected total length.
    #[error("length mismatch in {path}: expected {expected} bytes, found {actual}")]
    LengthMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// Length computed from the requested geometry.
        expected: u64,
        /// Length found on disk.
        actual: u64,
    },

    /// The requested size or scale cannot describe a bitmap.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// An image could not be encoded for persistence.
    #[error("failed to encode image: {reason}")]
    Encode {
        /// Description of the encoder failure.
        reason: String,
    },

    /// The injected renderer failed while drawing.
    #[error("renderer failed: {reason}")]
    Render {
        /// Description of the failure.
        reason: String,
    },

    /// The worker pool or completion context could not be started.
    #[error("failed to start executor: {reason}")]
    Executor {
        /// Description of the failure.
        reason: String,
    },

    /// The configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by an [`OriginalProvider`](crate::source::OriginalProvider).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider has no image for the key.
    #[error("no original available for '{0}'")]
    NotFound(String),

    /// The provider tried and failed.
    #[error("provider failed: {0}")]
    Failed(String),

    /// The reply handle was dropped without being resolved.
    #[error("provider dropped the request without replying")]
    Dropped,
}
