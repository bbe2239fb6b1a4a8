use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use journaltail_store::{Journal, JournalOpener};
use journaltail_types::{LogRequest, Message};

use crate::config::TailConfig;
use crate::error::LogsError;
use crate::reader::WaitOutcome;
use crate::session::Session;

/// Why a log stream ended
#[derive(Debug)]
pub enum StreamEnd {
    /// Reached the tail without follow
    EndOfData,
    /// The query was cancelled
    Cancelled,
    /// The receiving side was dropped
    ConsumerGone,
    /// Reading or waiting failed
    Failed(LogsError),
}

impl StreamEnd {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Answers log queries from a journal
pub struct JournalRequester<O: JournalOpener> {
    opener: Arc<O>,

    /// Journal directory; `None` uses the opener's default store
    path: Option<PathBuf>,

    config: TailConfig,
}

impl<O: JournalOpener> JournalRequester<O> {
    pub fn new(opener: O, path: Option<PathBuf>, config: TailConfig) -> Self {
        Self {
            opener: Arc::new(opener),
            path,
            config,
        }
    }

    /// Open a session for `request` and stream its messages from a background task.
    ///
    /// Setup errors are returned here; no task is started for them. Opening
    /// reads the store, so it runs on the blocking pool.
    pub async fn query(
        &self,
        request: LogRequest,
        cancel: CancellationToken,
    ) -> Result<LogStream, LogsError> {
        tracing::info!(path = ?self.path, "query journal");

        let opener = Arc::clone(&self.opener);
        let path = self.path.clone();
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || {
            Session::open(opener.as_ref(), path.as_deref(), &request, &config)
        })
        .await??;

        let span = tracing::info_span!(
            "journal_stream",
            name = %session.name(),
            namespace = %session.filter().namespace(),
        );

        let (tx, rx) = mpsc::channel(self.config.capacity());
        let pump = Pump {
            session,
            tx,
            cancel,
            poll_interval: self.config.poll_interval(),
        };
        let task = tokio::spawn(pump.run().instrument(span));

        Ok(LogStream { rx, task })
    }
}

/// Messages of one query, in journal order.
///
/// The stream ends once the journal handle has been released.
pub struct LogStream {
    rx: mpsc::Receiver<Message>,
    task: JoinHandle<StreamEnd>,
}

impl LogStream {
    /// Receive the next message, `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Wait for the background task and report why it stopped.
    ///
    /// Messages not yet received are discarded so a pump blocked on a full
    /// channel can run to its end.
    pub async fn outcome(self) -> StreamEnd {
        let Self { mut rx, mut task } = self;

        let mut discarded = 0usize;
        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,

                message = rx.recv() => match message {
                    Some(_) => discarded += 1,
                    // The pump dropped its sender and is finishing
                    None => break (&mut task).await,
                },
            }
        };
        if discarded > 0 {
            tracing::debug!(discarded, "dropped unread messages");
        }

        match joined {
            Ok(end) => end,
            Err(e) => StreamEnd::Failed(LogsError::Task(e)),
        }
    }
}

impl Stream for LogStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

/// The read / emit / wait loop of one query
struct Pump<J: Journal> {
    session: Session<J>,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl<J: Journal> Pump<J> {
    async fn run(mut self) -> StreamEnd {
        tracing::info!("starting journal stream");

        let end = self.pump().await;
        match &end {
            StreamEnd::EndOfData => tracing::info!("reached end of journal"),
            StreamEnd::Cancelled => tracing::info!("log stream context cancelled"),
            StreamEnd::ConsumerGone => tracing::info!("log stream receiver dropped"),
            StreamEnd::Failed(e) => tracing::warn!(error = %e, "log stream failed"),
        }

        // Release the journal before the channel closes
        let Self {
            mut session, tx, ..
        } = self;
        tracing::info!("closing journal stream");
        if let Err(e) = session.close() {
            tracing::warn!(error = %e, "journal closed with error");
        }
        drop(tx);

        end
    }

    async fn pump(&mut self) -> StreamEnd {
        loop {
            if self.cancel.is_cancelled() {
                return StreamEnd::Cancelled;
            }

            let message = match self.session.read() {
                Ok(Some(message)) => message,
                Ok(None) if !self.session.follow() => return StreamEnd::EndOfData,
                Ok(None) => match self.wait_for_more().await {
                    Ok(WaitOutcome::Ready) => continue,
                    Ok(WaitOutcome::Cancelled) if self.cancel.is_cancelled() => {
                        return StreamEnd::Cancelled;
                    }
                    Ok(WaitOutcome::Cancelled) => return StreamEnd::ConsumerGone,
                    Err(e) => return StreamEnd::Failed(e),
                },
                Err(e) => return StreamEnd::Failed(e),
            };

            if !self.session.filter().matches(&message) {
                continue;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,

                sent = self.tx.send(message) => {
                    if sent.is_err() {
                        return StreamEnd::ConsumerGone;
                    }
                }
            }
        }
    }

    /// Wait at the tail, also giving up when the consumer goes away
    async fn wait_for_more(&mut self) -> Result<WaitOutcome, LogsError> {
        let stop = self.cancel.child_token();
        let wait = self.session.wait(&stop, self.poll_interval);
        tokio::pin!(wait);

        tokio::select! {
            biased;

            outcome = &mut wait => outcome,

            _ = self.tx.closed() => {
                stop.cancel();
                wait.await
            }
        }
    }
}
