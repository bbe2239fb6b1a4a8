//! Journal store backends for journaltail
//!
//! This crate describes the primitives the streaming core needs from a
//! structured, append-only log store and ships two implementations of them:
//! an in-process [`MemoryStore`] and an [`ExportStore`] that tails
//! directories of `journalctl -o json` export files.

mod error;
mod export;
mod memory;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub use error::StoreError;
pub use export::{ExportJournal, ExportStore};
pub use memory::{MemoryJournal, MemoryStore};

// Re-export the field names backends are keyed by
pub use journaltail_types::{
    FIELD_MESSAGE, FIELD_PID, FIELD_REALTIME_TIMESTAMP, FIELD_SYSLOG_IDENTIFIER,
};

/// Raw sd-journal wait codes
pub const SD_JOURNAL_NOP: i32 = 0;
pub const SD_JOURNAL_APPEND: i32 = 1;
pub const SD_JOURNAL_INVALIDATE: i32 = 2;

/// Outcome of a single bounded wait on a journal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    /// Nothing changed before the timeout expired
    Nop,
    /// New entries were appended
    Append,
    /// Files were added, removed or rotated
    Invalidate,
    /// A non-negative code this crate does not know about
    Unknown(i32),
    /// A negative (errno style) code
    Failed(i32),
}

impl From<i32> for WaitStatus {
    fn from(code: i32) -> Self {
        match code {
            SD_JOURNAL_NOP => Self::Nop,
            SD_JOURNAL_APPEND => Self::Append,
            SD_JOURNAL_INVALIDATE => Self::Invalidate,
            c if c < 0 => Self::Failed(c),
            c => Self::Unknown(c),
        }
    }
}

impl WaitStatus {
    /// The raw sd-journal style code for this status
    pub fn code(&self) -> i32 {
        match self {
            Self::Nop => SD_JOURNAL_NOP,
            Self::Append => SD_JOURNAL_APPEND,
            Self::Invalidate => SD_JOURNAL_INVALIDATE,
            Self::Unknown(c) | Self::Failed(c) => *c,
        }
    }
}

/// One structured journal record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawEntry {
    /// Field name to value
    pub fields: HashMap<String, String>,

    /// Wall clock time of the entry in microseconds since the epoch
    pub realtime_usec: u64,
}

impl RawEntry {
    pub fn new(realtime_usec: u64) -> Self {
        Self {
            fields: HashMap::new(),
            realtime_usec,
        }
    }

    /// Builder style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Whether the entry satisfies every `(field, value)` match
    pub fn matches(&self, matches: &[(String, String)]) -> bool {
        matches
            .iter()
            .all(|(field, value)| self.field(field) == Some(value.as_str()))
    }
}

/// An open handle on a journal with its own read cursor.
///
/// All methods may block. A handle is used by one task at a time; it is
/// moved to a blocking helper for [`Journal::wait`] and handed back after.
pub trait Journal: Send + 'static {
    /// Restrict the entries visible to this handle to `field == value`
    fn add_match(&mut self, field: &str, value: &str) -> Result<(), StoreError>;

    /// Position the cursor before the first entry at or after `usec`
    fn seek_realtime_usec(&mut self, usec: u64) -> Result<(), StoreError>;

    /// Advance the cursor; returns how many entries it moved (0 at the tail)
    fn next(&mut self) -> Result<u64, StoreError>;

    /// Fetch the entry under the cursor
    fn entry(&mut self) -> Result<RawEntry, StoreError>;

    /// Distinct values of `field` across the whole store
    fn unique_values(&mut self, field: &str) -> Result<Vec<String>, StoreError>;

    /// Block until the store changes or `timeout` elapses
    fn wait(&mut self, timeout: Duration) -> WaitStatus;

    /// Release the handle. Calls after the first are no-ops.
    fn close(&mut self) -> Result<(), StoreError>;
}

/// Opens journal handles, either on the default store or rooted at a directory
pub trait JournalOpener: Send + Sync + 'static {
    type Journal: Journal;

    fn open_default(&self) -> Result<Self::Journal, StoreError>;

    fn open_directory(&self, path: &Path) -> Result<Self::Journal, StoreError>;

    /// Open the store rooted at `path`, or the default store when `path` is empty
    fn open(&self, path: Option<&Path>) -> Result<Self::Journal, StoreError> {
        match path {
            Some(path) if !path.as_os_str().is_empty() => self.open_directory(path),
            _ => self.open_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_status_from_code() {
        assert_eq!(WaitStatus::from(0), WaitStatus::Nop);
        assert_eq!(WaitStatus::from(1), WaitStatus::Append);
        assert_eq!(WaitStatus::from(2), WaitStatus::Invalidate);
        assert_eq!(WaitStatus::from(7), WaitStatus::Unknown(7));
        assert_eq!(WaitStatus::from(-5), WaitStatus::Failed(-5));
        assert_eq!(WaitStatus::Failed(-5).code(), -5);
    }

    #[test]
    fn test_entry_matches() {
        let entry = RawEntry::new(1).with_field(FIELD_SYSLOG_IDENTIFIER, "openfaas-fn:figlet");
        let hit = vec![(FIELD_SYSLOG_IDENTIFIER.to_string(), "openfaas-fn:figlet".to_string())];
        let miss = vec![(FIELD_SYSLOG_IDENTIFIER.to_string(), "openfaas-fn:env".to_string())];

        assert!(entry.matches(&hit));
        assert!(!entry.matches(&miss));
        assert!(entry.matches(&[]));
    }
}
