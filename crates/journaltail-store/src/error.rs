use std::path::PathBuf;

/// Errors reported by journal backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("journal directory not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid match expression: {0}")]
    InvalidMatch(String),

    #[error("no entry under the cursor")]
    NoEntry,

    #[error("journal handle is closed")]
    Closed,

    #[error("unsupported journal store: {0}")]
    Unsupported(String),

    #[error("journal error: {0}")]
    Other(String),
}
