//! Error types for process supervision

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Process supervision errors
///
/// Only configuration- and spawn-time failures are surfaced. Everything that
/// happens after the process is running is observed through the captured
/// output instead.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Missing or unusable configuration (e.g. no program to run)
    #[error("Invalid process configuration: {0}")]
    InvalidConfig(String),

    /// The OS failed to create the process or its output pipes
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// The environment file is missing or unreadable
    #[error("Failed to load env file {}: {source}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The current working directory could not be determined
    #[error("Failed to resolve working directory: {0}")]
    WorkingDir(#[source] io::Error),

    /// No project marker was found walking up from the working directory
    #[error("{marker} not found after {iterations} iterations")]
    ProjectRootNotFound { marker: String, iterations: usize },
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
