use std::path::Path;

use chrono::{DateTime, Utc};

use journaltail_store::{FIELD_SYSLOG_IDENTIFIER, Journal, JournalOpener};
use journaltail_types::LogRequest;

use crate::config::TailConfig;
use crate::error::LogsError;
use crate::filter::FunctionFilter;

/// An open journal positioned for one function's entries.
///
/// Owned by a single task. The handle is released by [`Session::close`]
/// (or on drop); later closes are no-ops.
pub struct Session<J: Journal> {
    pub(crate) journal: Option<J>,
    follow: bool,
    filter: FunctionFilter,
}

impl<J: Journal> Session<J> {
    /// Open the journal (rooted at `path` when given), install the function
    /// match and seek to the start time.
    pub fn open<O>(
        opener: &O,
        path: Option<&Path>,
        request: &LogRequest,
        config: &TailConfig,
    ) -> Result<Self, LogsError>
    where
        O: JournalOpener<Journal = J>,
    {
        Self::open_at(opener, path, request, config, Utc::now())
    }

    pub(crate) fn open_at<O>(
        opener: &O,
        path: Option<&Path>,
        request: &LogRequest,
        config: &TailConfig,
        now: DateTime<Utc>,
    ) -> Result<Self, LogsError>
    where
        O: JournalOpener<Journal = J>,
    {
        let journal = opener.open(path).map_err(LogsError::Open)?;
        let filter = FunctionFilter::new(request, &config.default_namespace);

        let mut session = Self {
            journal: Some(journal),
            follow: request.follow,
            filter,
        };

        // Drop closes the handle if positioning fails
        session.position(request, config, now)?;
        Ok(session)
    }

    fn position(
        &mut self,
        request: &LogRequest,
        config: &TailConfig,
        now: DateTime<Utc>,
    ) -> Result<(), LogsError> {
        let journal = self.journal.as_mut().ok_or(LogsError::NotOpen)?;

        match journal.unique_values(FIELD_SYSLOG_IDENTIFIER) {
            Ok(ids) => tracing::debug!(?ids, "syslog identifiers in journal"),
            Err(e) => tracing::debug!(error = %e, "could not list syslog identifiers"),
        }

        let filter = self.filter.match_expression();
        tracing::debug!(%filter, ?request, "filter for function");
        self.filter
            .apply(journal)
            .map_err(|source| LogsError::Filter { filter, source })?;

        if self.filter.instance().is_some() {
            tracing::debug!("instance is filtered after parsing");
        }

        let since = seek_time(now, request.since, config.lookback());
        tracing::info!(%since, "start from");

        journal
            .seek_realtime_usec(realtime_usec(since))
            .map_err(LogsError::Seek)
    }

    /// Release the journal handle
    pub fn close(&mut self) -> Result<(), LogsError> {
        match self.journal.take() {
            Some(mut journal) => journal.close().map_err(LogsError::Close),
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.journal.is_some()
    }

    pub fn follow(&self) -> bool {
        self.follow
    }

    pub fn name(&self) -> &str {
        self.filter.name()
    }

    pub fn filter(&self) -> &FunctionFilter {
        &self.filter
    }
}

impl<J: Journal> Drop for Session<J> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "journal closed with error");
        }
    }
}

/// Where reading starts: `since` when it lies before `now`, otherwise `now - lookback`
pub fn seek_time(
    now: DateTime<Utc>,
    since: Option<DateTime<Utc>>,
    lookback: chrono::Duration,
) -> DateTime<Utc> {
    match since {
        Some(since) if since < now => since,
        _ => now.checked_sub_signed(lookback).unwrap_or(DateTime::<Utc>::MIN_UTC),
    }
}

/// Microseconds since the epoch, clamped at zero
fn realtime_usec(t: DateTime<Utc>) -> u64 {
    u64::try_from(t.timestamp_micros()).unwrap_or(0)
}
