use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacerError {
    #[error("not initialized: run 'pacer init'")]
    NotInitialized,

    #[error("unknown action kind '{0}': expected follow, unfollow, like or comment")]
    UnknownActionKind(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// An internal double-check failed. Indicates a logic bug, not a denial.
    #[error("invalid ledger state: {0}")]
    InvalidState(String),

    #[error("ledger persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PacerError>;
