use std::path::PathBuf;
use thiserror::Error;

/// Conditions that stop an indexing run before any file is read.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("repository root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("repository root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("repository root is not readable: {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
