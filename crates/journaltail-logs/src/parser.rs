use chrono::{DateTime, Utc};

use journaltail_store::{FIELD_MESSAGE, FIELD_PID, FIELD_SYSLOG_IDENTIFIER, RawEntry};
use journaltail_types::Message;

use crate::error::ParseError;

/// Turns raw journal entries into messages
pub struct EntryParser;

impl EntryParser {
    /// Parse a journal entry into a Message
    pub fn parse(entry: &RawEntry) -> Result<Message, ParseError> {
        let text = entry
            .field(FIELD_MESSAGE)
            .ok_or(ParseError::MissingMessage)?
            .to_string();

        let timestamp = Self::realtime_to_utc(entry.realtime_usec)?;
        let instance = entry.field(FIELD_PID).unwrap_or_default().to_string();

        let identifier = entry.field(FIELD_SYSLOG_IDENTIFIER).unwrap_or_default();
        let (namespace, name) = Self::split_identifier(identifier);

        Ok(Message {
            text,
            timestamp,
            namespace: namespace.to_string(),
            name: name.to_string(),
            instance,
        })
    }

    fn realtime_to_utc(usec: u64) -> Result<DateTime<Utc>, ParseError> {
        i64::try_from(usec)
            .ok()
            .and_then(DateTime::from_timestamp_micros)
            .ok_or(ParseError::InvalidTimestamp(usec))
    }

    /// Split `namespace:name`. Anything other than exactly two parts is
    /// taken as a bare name.
    fn split_identifier(identifier: &str) -> (&str, &str) {
        let mut parts = identifier.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(name), None) => (namespace, name),
            _ => ("", identifier),
        }
    }
}
