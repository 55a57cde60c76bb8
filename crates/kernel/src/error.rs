use std::path::PathBuf;

/// Represents all possible errors that can occur in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The program could not be started at all (missing binary, permissions).
    #[error("Failed to spawn `{program}`: {source}")]
    CommandSpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran but exited unsuccessfully.
    #[error("`{program}` exited with {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Error occurred while reading data from procfs.
    #[error("Failed to read procfs info: {0}")]
    ProcfsReadFailed(#[from] procfs::ProcError),

    /// Error occurred while reading a file.
    #[error("Failed to read file: {0}")]
    FileReadFailed(#[from] std::io::Error),

    /// Tool output that should be JSON was not.
    #[error("Failed to decode JSON: {0}")]
    JsonDecodeFailed(#[from] serde_json::Error),

    /// The path is invalid.
    #[error("Path is invalid: {0}")]
    InvalidPath(PathBuf),

    /// Error occurred during joining a blocking task.
    #[error("Failed to join blocking task: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}
