use journaltail_store::StoreError;

/// Reasons a journal entry can not be turned into a message
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no MESSAGE field present in journal entry")]
    MissingMessage,

    #[error("realtime timestamp {0} is out of range")]
    InvalidTimestamp(u64),
}

/// Errors from opening, reading or waiting on a journal session
#[derive(Debug, thiserror::Error)]
pub enum LogsError {
    #[error("can not open systemd journal: {0}")]
    Open(#[source] StoreError),

    #[error("failed to set name filter {filter}: {source}")]
    Filter {
        filter: String,
        #[source]
        source: StoreError,
    },

    #[error("can not set initial cursor position: {0}")]
    Seek(#[source] StoreError),

    #[error("can not read unopened journal")]
    NotOpen,

    #[error("failed to advance journal cursor: {0}")]
    Advance(#[source] StoreError),

    #[error("failed to fetch journal entry: {0}")]
    Fetch(#[source] StoreError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("received error event: {0}")]
    Wait(i32),

    #[error("journal task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to close journal: {0}")]
    Close(#[source] StoreError),
}
