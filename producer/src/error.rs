use std::path::PathBuf;

use limn_shared::RecordingError;
use thiserror::Error;

/// Producer-side failures that are worth surfacing to the caller rather
/// than logging.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// Refusing to record over an existing directory
    #[error("Record directory exists: {0}")]
    RecordDirectoryExists(PathBuf),

    /// A self-hosting mode could not start its companion viewer
    #[error("Could not start viewer process {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    /// On-disk capture failure
    #[error(transparent)]
    Recording(#[from] RecordingError),

    /// Filesystem failure outside the recording writer
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
