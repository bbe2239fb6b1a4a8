use std::time::Duration;

use tokio_util::sync::CancellationToken;

use journaltail_store::{Journal, WaitStatus};
use journaltail_types::Message;

use crate::error::LogsError;
use crate::parser::EntryParser;
use crate::session::Session;

/// Result of waiting at the tail of the journal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// New entries may be available, read again
    Ready,
    /// The caller cancelled the wait
    Cancelled,
}

impl<J: Journal> Session<J> {
    /// Read and parse the next entry. `None` means the cursor is at the tail.
    pub fn read(&mut self) -> Result<Option<Message>, LogsError> {
        let journal = self.journal.as_mut().ok_or(LogsError::NotOpen)?;

        if journal.next().map_err(LogsError::Advance)? == 0 {
            tracing::trace!("might be EOF");
            return Ok(None);
        }

        let entry = journal.entry().map_err(LogsError::Fetch)?;
        tracing::trace!(?entry, "got entry");

        Ok(Some(EntryParser::parse(&entry)?))
    }

    /// Block until new entries are available or `cancel` fires.
    ///
    /// Each attempt hands the journal to a blocking task for at most
    /// `poll_interval`, so cancellation is seen within one interval. A
    /// cancelled attempt is allowed to finish so the handle comes back to
    /// the session and is closed by its owner.
    pub async fn wait(
        &mut self,
        cancel: &CancellationToken,
        poll_interval: Duration,
    ) -> Result<WaitOutcome, LogsError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }

            let mut journal = self.journal.take().ok_or(LogsError::NotOpen)?;
            let mut attempt = tokio::task::spawn_blocking(move || {
                let status = journal.wait(poll_interval);
                (journal, status)
            });

            let joined = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    if let Ok((journal, _)) = attempt.await {
                        self.journal = Some(journal);
                    }
                    return Ok(WaitOutcome::Cancelled);
                }

                joined = &mut attempt => joined,
            };

            let (journal, status) = joined?;
            self.journal = Some(journal);

            match status {
                // the journal did not change since the last invocation
                WaitStatus::Nop => {}
                WaitStatus::Append | WaitStatus::Invalidate => return Ok(WaitOutcome::Ready),
                WaitStatus::Failed(code) => return Err(LogsError::Wait(code)),
                WaitStatus::Unknown(code) => {
                    tracing::warn!(code, "received unknown event");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TailConfig;
    use crate::error::ParseError;
    use chrono::Utc;
    use journaltail_store::{
        FIELD_MESSAGE, FIELD_SYSLOG_IDENTIFIER, MemoryStore, RawEntry, StoreError,
    };
    use journaltail_types::LogRequest;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(100);

    fn now_usec() -> u64 {
        Utc::now().timestamp_micros() as u64
    }

    fn entry(text: &str) -> RawEntry {
        RawEntry::new(now_usec())
            .with_field(FIELD_SYSLOG_IDENTIFIER, "openfaas-fn:figlet")
            .with_field(FIELD_MESSAGE, text)
    }

    fn open(store: &MemoryStore) -> Session<journaltail_store::MemoryJournal> {
        Session::open(store, None, &LogRequest::new("figlet"), &TailConfig::default()).unwrap()
    }

    #[test]
    fn test_read_until_tail() {
        let store = MemoryStore::new();
        store.append(entry("one"));
        store.append(entry("two"));

        let mut session = open(&store);
        assert_eq!(session.read().unwrap().unwrap().text, "one");
        assert_eq!(session.read().unwrap().unwrap().text, "two");
        assert!(session.read().unwrap().is_none());
        assert!(session.read().unwrap().is_none());
    }

    #[test]
    fn test_read_closed_session() {
        let store = MemoryStore::new();
        let mut session = open(&store);
        session.close().unwrap();
        assert!(matches!(session.read(), Err(LogsError::NotOpen)));
    }

    #[test]
    fn test_read_fetch_failure() {
        let store = MemoryStore::new();
        store.append(entry("one"));
        store.fail_fetch(true);

        let mut session = open(&store);
        assert!(matches!(
            session.read(),
            Err(LogsError::Fetch(StoreError::Other(_)))
        ));
    }

    #[test]
    fn test_read_parse_failure() {
        let store = MemoryStore::new();
        store.append(RawEntry::new(now_usec()).with_field(FIELD_SYSLOG_IDENTIFIER, "openfaas-fn:figlet"));

        let mut session = open(&store);
        assert!(matches!(
            session.read(),
            Err(LogsError::Parse(ParseError::MissingMessage))
        ));
    }

    #[tokio::test]
    async fn test_wait_ready_on_append() {
        let store = MemoryStore::new();
        let mut session = open(&store);
        assert!(session.read().unwrap().is_none());

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            writer.append(entry("late"));
        });

        let cancel = CancellationToken::new();
        assert_eq!(session.wait(&cancel, POLL).await.unwrap(), WaitOutcome::Ready);
        assert_eq!(session.read().unwrap().unwrap().text, "late");
        assert!(store.wait_calls() >= 2);
    }

    #[tokio::test]
    async fn test_wait_ready_on_invalidate() {
        let store = MemoryStore::new();
        let mut session = open(&store);
        store.invalidate();

        let cancel = CancellationToken::new();
        assert_eq!(session.wait(&cancel, POLL).await.unwrap(), WaitOutcome::Ready);
    }

    #[tokio::test]
    async fn test_wait_error_status() {
        let store = MemoryStore::new();
        let mut session = open(&store);
        store.fail_wait(-5);

        let cancel = CancellationToken::new();
        assert!(matches!(
            session.wait(&cancel, POLL).await,
            Err(LogsError::Wait(-5))
        ));
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_wait_ignores_unknown_status() {
        let store = MemoryStore::new();
        let mut session = open(&store);
        store.fail_wait(7);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        assert_eq!(session.wait(&cancel, POLL).await.unwrap(), WaitOutcome::Cancelled);
        assert!(store.wait_calls() > 1);
    }

    #[tokio::test]
    async fn test_wait_cancelled_promptly() {
        let store = MemoryStore::new();
        let mut session = open(&store);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let cancelled_at = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            let at = Instant::now();
            canceller.cancel();
            at
        });

        assert_eq!(session.wait(&cancel, POLL).await.unwrap(), WaitOutcome::Cancelled);
        let latency = cancelled_at.await.unwrap().elapsed();
        assert!(
            latency < POLL + Duration::from_millis(50),
            "wait returned {:?} after cancel",
            latency
        );

        // The handle came back from the blocking task
        assert!(session.is_open());
        session.close().unwrap();
        assert_eq!(store.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_wait_already_cancelled() {
        let store = MemoryStore::new();
        let mut session = open(&store);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(session.wait(&cancel, POLL).await.unwrap(), WaitOutcome::Cancelled);
        assert_eq!(store.wait_calls(), 0);
    }
}
