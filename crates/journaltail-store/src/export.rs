//! Journal backed by `journalctl -o json` export files.
//!
//! A store is a directory of `*.json` files, one JSON object per line.
//! Files are tailed by size: growth is an append, anything else (a file
//! shrinking, appearing or disappearing) invalidates the store and the
//! handle reloads everything, resuming after the last entry it returned.
//!
//! Binary `*.journal` files are not read. A directory holding only those is
//! refused at open instead of looking like an empty journal.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::{FIELD_REALTIME_TIMESTAMP, Journal, JournalOpener, RawEntry, StoreError, WaitStatus};

const EBADF: i32 = 9;
const EIO: i32 = 5;

/// How often file sizes are checked while waiting
const POLL_STEP: Duration = Duration::from_millis(20);

/// Opens [`ExportJournal`]s, defaulting to a fixed directory
#[derive(Clone, Debug)]
pub struct ExportStore {
    default_dir: PathBuf,
}

impl ExportStore {
    pub fn new(default_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_dir: default_dir.into(),
        }
    }
}

impl JournalOpener for ExportStore {
    type Journal = ExportJournal;

    fn open_default(&self) -> Result<ExportJournal, StoreError> {
        ExportJournal::open(&self.default_dir)
    }

    fn open_directory(&self, path: &Path) -> Result<ExportJournal, StoreError> {
        ExportJournal::open(path)
    }
}

/// Handle on a directory of export files
pub struct ExportJournal {
    dir: PathBuf,

    /// File path to number of bytes consumed (always at a line boundary)
    files: BTreeMap<PathBuf, u64>,

    entries: Vec<RawEntry>,
    matches: Vec<(String, String)>,
    position: usize,
    current: Option<usize>,
    seek_usec: u64,
    last_read_usec: Option<u64>,

    /// Matching entries already returned at `last_read_usec`
    read_at_last_usec: usize,

    closed: bool,
}

impl ExportJournal {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        if !dir.is_dir() {
            return Err(StoreError::NotFound(dir.to_path_buf()));
        }

        let mut journal = Self {
            dir: dir.to_path_buf(),
            files: BTreeMap::new(),
            entries: Vec::new(),
            matches: Vec::new(),
            position: 0,
            current: None,
            seek_usec: 0,
            last_read_usec: None,
            read_at_last_usec: 0,
            closed: false,
        };
        journal.reload()?;

        if journal.files.is_empty() && holds_binary_journals(dir)? {
            return Err(StoreError::Unsupported(format!(
                "{} holds binary journal files, export them with `journalctl -o json`",
                dir.display()
            )));
        }
        Ok(journal)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn scan(&self) -> Result<BTreeSet<PathBuf>, StoreError> {
        let mut paths = BTreeSet::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.insert(path);
            }
        }
        Ok(paths)
    }

    /// Re-read every file and put the cursor after the last returned entry
    fn reload(&mut self) -> Result<(), StoreError> {
        let paths = self.scan()?;
        self.files.clear();
        self.entries.clear();

        for path in paths {
            let mut entries = Vec::new();
            let consumed = read_lines_from(&path, 0, &mut entries)?;
            self.entries.append(&mut entries);
            self.files.insert(path, consumed);
        }
        self.entries.sort_by_key(|e| e.realtime_usec);

        self.position = match self.last_read_usec {
            Some(usec) => self.skip_read_at(usec),
            None => self.first_at_or_after(self.seek_usec),
        };
        self.current = None;
        Ok(())
    }

    /// Position of the first entry at `usec` not yet returned, counting the
    /// matching entries handed out at that timestamp before the reload
    fn skip_read_at(&self, usec: u64) -> usize {
        let mut position = self.first_at_or_after(usec);
        let mut skipped = 0;
        while skipped < self.read_at_last_usec {
            match self.entries.get(position) {
                Some(e) if e.realtime_usec == usec => {
                    if e.matches(&self.matches) {
                        skipped += 1;
                    }
                    position += 1;
                }
                _ => break,
            }
        }
        position
    }

    fn first_at_or_after(&self, usec: u64) -> usize {
        self.entries.partition_point(|e| e.realtime_usec < usec)
    }

    /// Pick up changes on disk, if there are any
    fn poll_changes(&mut self) -> Result<Option<WaitStatus>, StoreError> {
        let paths = self.scan()?;
        if !paths.iter().eq(self.files.keys()) {
            self.reload()?;
            return Ok(Some(WaitStatus::Invalidate));
        }

        let known: Vec<(PathBuf, u64)> = self
            .files
            .iter()
            .map(|(path, consumed)| (path.clone(), *consumed))
            .collect();

        let mut appended = Vec::new();
        for (path, consumed) in known {
            let len = fs::metadata(&path)?.len();
            if len < consumed {
                self.reload()?;
                return Ok(Some(WaitStatus::Invalidate));
            }
            if len > consumed {
                let now_consumed = read_lines_from(&path, consumed, &mut appended)?;
                self.files.insert(path, now_consumed);
            }
        }

        if appended.is_empty() {
            return Ok(None);
        }
        appended.sort_by_key(|e| e.realtime_usec);
        self.entries.append(&mut appended);
        Ok(Some(WaitStatus::Append))
    }
}

impl Journal for ExportJournal {
    fn add_match(&mut self, field: &str, value: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        if field.is_empty() {
            return Err(StoreError::InvalidMatch(format!("={}", value)));
        }
        self.matches.push((field.to_string(), value.to_string()));
        Ok(())
    }

    fn seek_realtime_usec(&mut self, usec: u64) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.seek_usec = usec;
        self.last_read_usec = None;
        self.read_at_last_usec = 0;
        self.position = self.first_at_or_after(usec);
        self.current = None;
        Ok(())
    }

    fn next(&mut self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let start = self.position.min(self.entries.len());
        let found = self.entries[start..]
            .iter()
            .position(|e| e.matches(&self.matches))
            .map(|offset| start + offset);

        match found {
            Some(idx) => {
                let usec = self.entries[idx].realtime_usec;
                if self.last_read_usec == Some(usec) {
                    self.read_at_last_usec += 1;
                } else {
                    self.last_read_usec = Some(usec);
                    self.read_at_last_usec = 1;
                }
                self.current = Some(idx);
                self.position = idx + 1;
                Ok(1)
            }
            None => {
                self.position = self.entries.len();
                Ok(0)
            }
        }
    }

    fn entry(&mut self) -> Result<RawEntry, StoreError> {
        self.ensure_open()?;
        self.current
            .and_then(|idx| self.entries.get(idx))
            .cloned()
            .ok_or(StoreError::NoEntry)
    }

    fn unique_values(&mut self, field: &str) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;
        let values: BTreeSet<&str> = self.entries.iter().filter_map(|e| e.field(field)).collect();
        Ok(values.into_iter().map(str::to_string).collect())
    }

    fn wait(&mut self, timeout: Duration) -> WaitStatus {
        if self.closed {
            return WaitStatus::Failed(-EBADF);
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.poll_changes() {
                Ok(Some(status)) => return status,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "failed to poll journal files");
                    return WaitStatus::Failed(-EIO);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitStatus::Nop;
            }
            std::thread::sleep(POLL_STEP.min(deadline - now));
        }
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if !self.closed {
            self.closed = true;
            self.entries.clear();
            self.files.clear();
        }
        Ok(())
    }
}

/// Whether `dir` or one of its subdirectories (journald keeps one per
/// machine id) contains `*.journal` files
fn holds_binary_journals(dir: &Path) -> Result<bool, StoreError> {
    let is_journal = |path: &Path| path.extension().is_some_and(|ext| ext == "journal");

    for dir_entry in fs::read_dir(dir)? {
        let path = dir_entry?.path();
        if path.is_dir() {
            for nested in fs::read_dir(&path)? {
                if is_journal(&nested?.path()) {
                    return Ok(true);
                }
            }
        } else if is_journal(&path) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Parse complete lines of `path` starting at byte `offset` into `out`.
/// Returns the offset just past the last complete line.
fn read_lines_from(path: &Path, offset: u64, out: &mut Vec<RawEntry>) -> Result<u64, StoreError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    // A trailing partial line is left for the next read
    let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
        return Ok(offset);
    };

    for line in buf[..last_newline].split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_export_line(line) {
            Some(entry) => out.push(entry),
            None => {
                tracing::warn!(file = %path.display(), "skipping malformed journal export line");
            }
        }
    }

    Ok(offset + last_newline as u64 + 1)
}

/// Parse one `journalctl -o json` object
fn parse_export_line(line: &str) -> Option<RawEntry> {
    let Value::Object(object) = serde_json::from_str::<Value>(line).ok()? else {
        return None;
    };

    let mut entry = RawEntry::default();
    for (name, value) in object {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            // Non UTF-8 payloads are exported as byte arrays
            Value::Array(bytes) => {
                let bytes: Option<Vec<u8>> = bytes
                    .iter()
                    .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect();
                match bytes {
                    Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    None => continue,
                }
            }
            _ => continue,
        };
        entry.fields.insert(name, value);
    }

    entry.realtime_usec = entry.field(FIELD_REALTIME_TIMESTAMP)?.parse().ok()?;
    Some(entry)
}
