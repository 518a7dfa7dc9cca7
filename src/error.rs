use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Failed to read schedule directory {dir}: {source}")]
    Discovery {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open entry {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock entry {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: Errno,
    },

    #[error("Failed to read modification time of {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to update modification time of {path}: {source}")]
    Touch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to unlock entry {path}: {source}")]
    Release {
        path: PathBuf,
        #[source]
        source: Errno,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
