//! Shared types for journaltail
//!
//! This crate contains the request and message shapes shared by the store
//! backends, the streaming core and the command line front end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Journal Fields
// ============================================================================

/// Human readable message text of an entry
pub const FIELD_MESSAGE: &str = "MESSAGE";

/// Identifier written by the function runtime, encoded as `namespace:name`
pub const FIELD_SYSLOG_IDENTIFIER: &str = "SYSLOG_IDENTIFIER";

/// Process id of the logging process
pub const FIELD_PID: &str = "_PID";

/// Realtime timestamp in microseconds, as written by `journalctl -o json`
pub const FIELD_REALTIME_TIMESTAMP: &str = "__REALTIME_TIMESTAMP";

/// Namespace used when a request does not name one
pub const DEFAULT_NAMESPACE: &str = "openfaas-fn";

// ============================================================================
// Request / Message
// ============================================================================

/// A log query for a single function
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRequest {
    /// Function name
    pub name: String,

    /// Namespace of the function (empty = configured default)
    #[serde(default)]
    pub namespace: String,

    /// Only return messages from this instance (empty = all)
    #[serde(default)]
    pub instance: String,

    /// Start reading at this instant if it lies in the past
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,

    /// Keep waiting for new entries after reaching the tail
    #[serde(default)]
    pub follow: bool,
}

impl LogRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn following(mut self) -> Self {
        self.follow = true;
        self
    }

    /// Namespace to query, falling back to `default` when none was given
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            default
        } else {
            &self.namespace
        }
    }
}

/// A single parsed log message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message body
    pub text: String,

    /// When the entry was written
    pub timestamp: DateTime<Utc>,

    /// Function namespace (empty when the identifier had none)
    pub namespace: String,

    /// Function name
    pub name: String,

    /// Instance that wrote the entry (process id, may be empty)
    pub instance: String,
}

/// Build the `namespace:name` identifier the runtime tags entries with
pub fn syslog_identifier(namespace: &str, name: &str) -> String {
    format!("{}:{}", namespace, name)
}
