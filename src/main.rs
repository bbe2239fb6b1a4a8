mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use journaltail_logs::{JournalRequester, LogRequest, Message, StreamEnd};
use journaltail_store::ExportStore;

use crate::config::Config;

/// journaltail - Stream a function's logs out of the journal
#[derive(Parser, Debug)]
#[command(name = "journaltail")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Function name
    #[arg(value_name = "NAME")]
    name: String,

    /// Function namespace (defaults to the configured namespace)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Only show messages from this instance
    #[arg(long)]
    instance: Option<String>,

    /// Start at this RFC3339 time instead of five minutes ago
    #[arg(long)]
    since: Option<DateTime<Utc>>,

    /// Keep streaming new messages
    #[arg(short, long)]
    follow: bool,

    /// Directory of `journalctl -o json` export files (overrides the configured one)
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print messages as JSON lines
    #[arg(long)]
    json: bool,

    /// Minimum log level written to stderr
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

impl Args {
    fn request(&self) -> LogRequest {
        LogRequest {
            name: self.name.clone(),
            namespace: self.namespace.clone().unwrap_or_default(),
            instance: self.instance.clone().unwrap_or_default(),
            since: self.since,
            follow: self.follow,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(args.log_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;

    let store = ExportStore::new(&config.journal_dir);
    let requester = JournalRequester::new(store, args.dir.clone(), config.tail);

    // Ctrl-C ends the query; the stream closes once the journal is released
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut stream = requester
        .query(args.request(), cancel)
        .await
        .with_context(|| format!("Failed to query logs for {}", args.name))?;

    while let Some(message) = stream.recv().await {
        if args.json {
            println!("{}", serde_json::to_string(&message)?);
        } else {
            println!("{}", format_message(&message));
        }
    }

    match stream.outcome().await {
        StreamEnd::Failed(e) => Err(e).context("Log stream ended with an error"),
        _ => Ok(()),
    }
}

fn format_message(message: &Message) -> String {
    let timestamp = message.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
    if message.instance.is_empty() {
        format!("{} {} {}", timestamp, message.name, message.text)
    } else {
        format!(
            "{} {} ({}) {}",
            timestamp, message.name, message.instance, message.text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_request() {
        let args = Args::parse_from([
            "journaltail",
            "figlet",
            "--namespace",
            "team-a",
            "--since",
            "2024-01-15T10:30:00Z",
            "-f",
        ]);
        let request = args.request();

        assert_eq!(request.name, "figlet");
        assert_eq!(request.namespace, "team-a");
        assert!(request.instance.is_empty());
        assert!(request.follow);
        assert_eq!(
            request.since.map(|t| t.to_rfc3339()),
            Some("2024-01-15T10:30:00+00:00".to_string())
        );
    }

    #[test]
    fn test_format_message() {
        let message = Message {
            text: "hello".to_string(),
            timestamp: DateTime::from_timestamp_micros(1_700_000_000_000_001).unwrap(),
            namespace: "openfaas-fn".to_string(),
            name: "figlet".to_string(),
            instance: "42".to_string(),
        };
        assert_eq!(
            format_message(&message),
            "2023-11-14T22:13:20.000001Z figlet (42) hello"
        );
    }
}
