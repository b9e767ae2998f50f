//! Error taxonomy shared by the index store, query engine and watcher.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Index file is corrupt: {}: {detail}", path.display())]
    CorruptIndex { path: PathBuf, detail: String },

    #[error("Invalid date format: {0}")]
    InvalidDate(String),

    #[error("At least one of start or end date must be given")]
    MissingBound,

    #[error("File monitor is already running")]
    AlreadyRunning,

    #[error("File monitor is not running")]
    NotRunning,

    #[error("The following paths do not exist: {}", format_paths(.0))]
    InvalidWatchPath(Vec<PathBuf>),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Maps `NotFound` io errors to [`IndexError::NotFound`], everything else to `Io`.
    pub fn from_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.as_ref().to_path_buf())
        } else {
            Self::io(path, source)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
