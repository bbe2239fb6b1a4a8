//! Journal log streaming for journaltail
//!
//! This crate opens a journal session for one function, reads and parses its
//! entries, and pumps them into a bounded channel, optionally following the
//! journal for new entries until the query is cancelled.

mod config;
mod error;
mod filter;
mod parser;
mod reader;
mod session;
mod stream;

pub use config::TailConfig;
pub use error::{LogsError, ParseError};
pub use filter::FunctionFilter;
pub use parser::EntryParser;
pub use reader::WaitOutcome;
pub use session::{Session, seek_time};
pub use stream::{JournalRequester, LogStream, StreamEnd};

// Re-export types used in our public API
pub use journaltail_types::{LogRequest, Message};
