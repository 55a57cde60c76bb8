#![forbid(unsafe_code)]

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] config::Error),

    #[error("host error: {0}")]
    Kernel(#[from] kernel::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A caller-supplied value was rejected; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("action failed: {0}")]
    Action(String),

    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),
}
