use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::{Journal, JournalOpener, RawEntry, StoreError, WaitStatus};

/// errno returned by waits on a closed handle
const EBADF: i32 = 9;

struct State {
    entries: Vec<RawEntry>,
    generation: u64,
    fail_wait: Option<i32>,
    fail_fetch: bool,
    fail_match: bool,
    open_handles: usize,
    wait_calls: u64,
}

struct Inner {
    state: Mutex<State>,
    changed: Condvar,
}

/// In-process journal.
///
/// Entries are kept in append order, which is also the order handles read
/// them in. Clones share the same entries. Additional stores can be
/// registered under a directory path and are returned by
/// [`JournalOpener::open_directory`].
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    directories: Arc<Mutex<HashMap<PathBuf, MemoryStore>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    entries: Vec::new(),
                    generation: 0,
                    fail_wait: None,
                    fail_fetch: false,
                    fail_match: false,
                    open_handles: 0,
                    wait_calls: 0,
                }),
                changed: Condvar::new(),
            }),
            directories: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register `store` as the journal rooted at `path`
    pub fn with_directory(self, path: impl Into<PathBuf>, store: MemoryStore) -> Self {
        self.directories.lock().insert(path.into(), store);
        self
    }

    /// Append an entry and wake up waiting handles
    pub fn append(&self, entry: RawEntry) {
        self.inner.state.lock().entries.push(entry);
        self.inner.changed.notify_all();
    }

    /// Simulate rotation: waiting handles see [`WaitStatus::Invalidate`]
    pub fn invalidate(&self) {
        self.inner.state.lock().generation += 1;
        self.inner.changed.notify_all();
    }

    /// Make every following wait return `code`
    pub fn fail_wait(&self, code: i32) {
        self.inner.state.lock().fail_wait = Some(code);
        self.inner.changed.notify_all();
    }

    /// Make entry fetches fail
    pub fn fail_fetch(&self, fail: bool) {
        self.inner.state.lock().fail_fetch = fail;
    }

    /// Make match installation fail
    pub fn fail_match(&self, fail: bool) {
        self.inner.state.lock().fail_match = fail;
    }

    /// Number of handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.inner.state.lock().open_handles
    }

    /// Total number of waits performed on this store
    pub fn wait_calls(&self) -> u64 {
        self.inner.state.lock().wait_calls
    }

    /// Open a new handle with its cursor at the head of the store
    pub fn journal(&self) -> MemoryJournal {
        let mut state = self.inner.state.lock();
        state.open_handles += 1;
        MemoryJournal {
            inner: Arc::clone(&self.inner),
            matches: Vec::new(),
            position: 0,
            current: None,
            seen_len: state.entries.len(),
            seen_generation: state.generation,
            closed: false,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JournalOpener for MemoryStore {
    type Journal = MemoryJournal;

    fn open_default(&self) -> Result<MemoryJournal, StoreError> {
        Ok(self.journal())
    }

    fn open_directory(&self, path: &Path) -> Result<MemoryJournal, StoreError> {
        self.directories
            .lock()
            .get(path)
            .map(MemoryStore::journal)
            .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))
    }
}

/// Handle on a [`MemoryStore`]
pub struct MemoryJournal {
    inner: Arc<Inner>,
    matches: Vec<(String, String)>,

    /// Index of the next candidate entry
    position: usize,

    /// Index of the entry under the cursor
    current: Option<usize>,

    seen_len: usize,
    seen_generation: u64,
    closed: bool,
}

impl MemoryJournal {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Report and record any change since the previous wait
    fn take_change(&mut self, state: &State) -> Option<WaitStatus> {
        if state.generation != self.seen_generation {
            self.seen_generation = state.generation;
            self.seen_len = state.entries.len();
            return Some(WaitStatus::Invalidate);
        }
        if state.entries.len() > self.seen_len {
            self.seen_len = state.entries.len();
            return Some(WaitStatus::Append);
        }
        None
    }
}

impl Journal for MemoryJournal {
    fn add_match(&mut self, field: &str, value: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        if field.is_empty() || self.inner.state.lock().fail_match {
            return Err(StoreError::InvalidMatch(format!("{}={}", field, value)));
        }
        self.matches.push((field.to_string(), value.to_string()));
        Ok(())
    }

    fn seek_realtime_usec(&mut self, usec: u64) -> Result<(), StoreError> {
        self.ensure_open()?;
        let state = self.inner.state.lock();
        self.position = state
            .entries
            .iter()
            .position(|e| e.realtime_usec >= usec)
            .unwrap_or(state.entries.len());
        self.current = None;
        Ok(())
    }

    fn next(&mut self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let state = self.inner.state.lock();
        let found = state.entries[self.position.min(state.entries.len())..]
            .iter()
            .position(|e| e.matches(&self.matches))
            .map(|offset| self.position + offset);

        match found {
            Some(idx) => {
                self.current = Some(idx);
                self.position = idx + 1;
                Ok(1)
            }
            None => {
                // Nothing past here matches; later appends start at the old length
                self.position = state.entries.len();
                Ok(0)
            }
        }
    }

    fn entry(&mut self) -> Result<RawEntry, StoreError> {
        self.ensure_open()?;
        let state = self.inner.state.lock();
        if state.fail_fetch {
            return Err(StoreError::Other("entry fetch failed".to_string()));
        }
        self.current
            .and_then(|idx| state.entries.get(idx))
            .cloned()
            .ok_or(StoreError::NoEntry)
    }

    fn unique_values(&mut self, field: &str) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;
        let state = self.inner.state.lock();
        let values: BTreeSet<&str> = state.entries.iter().filter_map(|e| e.field(field)).collect();
        Ok(values.into_iter().map(str::to_string).collect())
    }

    fn wait(&mut self, timeout: Duration) -> WaitStatus {
        if self.closed {
            return WaitStatus::Failed(-EBADF);
        }

        let inner = Arc::clone(&self.inner);
        let mut state = inner.state.lock();
        state.wait_calls += 1;

        if let Some(code) = state.fail_wait {
            if code >= 0 {
                inner.changed.wait_for(&mut state, timeout);
            }
            return WaitStatus::from(code);
        }
        if let Some(status) = self.take_change(&state) {
            return status;
        }

        inner.changed.wait_for(&mut state, timeout);

        if let Some(code) = state.fail_wait {
            return WaitStatus::from(code);
        }
        self.take_change(&state).unwrap_or(WaitStatus::Nop)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if !self.closed {
            self.closed = true;
            let mut state = self.inner.state.lock();
            state.open_handles = state.open_handles.saturating_sub(1);
        }
        Ok(())
    }
}

impl Drop for MemoryJournal {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FIELD_SYSLOG_IDENTIFIER;
    use std::time::Instant;

    fn entry(usec: u64, ident: &str) -> RawEntry {
        RawEntry::new(usec).with_field(FIELD_SYSLOG_IDENTIFIER, ident)
    }

    #[test]
    fn test_next_respects_matches_and_seek() {
        let store = MemoryStore::new();
        store.append(entry(10, "fn:a"));
        store.append(entry(20, "fn:b"));
        store.append(entry(30, "fn:a"));
        store.append(entry(40, "fn:a"));

        let mut journal = store.journal();
        journal.add_match(FIELD_SYSLOG_IDENTIFIER, "fn:a").unwrap();
        journal.seek_realtime_usec(25).unwrap();

        assert_eq!(journal.next().unwrap(), 1);
        assert_eq!(journal.entry().unwrap().realtime_usec, 30);
        assert_eq!(journal.next().unwrap(), 1);
        assert_eq!(journal.entry().unwrap().realtime_usec, 40);
        assert_eq!(journal.next().unwrap(), 0);

        store.append(entry(50, "fn:b"));
        store.append(entry(60, "fn:a"));
        assert_eq!(journal.next().unwrap(), 1);
        assert_eq!(journal.entry().unwrap().realtime_usec, 60);
    }

    #[test]
    fn test_entry_before_next_is_an_error() {
        let store = MemoryStore::new();
        let mut journal = store.journal();
        assert!(matches!(journal.entry(), Err(StoreError::NoEntry)));
    }

    #[test]
    fn test_wait_reports_append_and_invalidate() {
        let store = MemoryStore::new();
        let mut journal = store.journal();

        assert_eq!(journal.wait(Duration::from_millis(10)), WaitStatus::Nop);

        store.append(entry(1, "fn:a"));
        assert_eq!(journal.wait(Duration::from_millis(10)), WaitStatus::Append);
        assert_eq!(journal.wait(Duration::from_millis(10)), WaitStatus::Nop);

        store.invalidate();
        assert_eq!(journal.wait(Duration::from_millis(10)), WaitStatus::Invalidate);
        assert_eq!(store.wait_calls(), 4);
    }

    #[test]
    fn test_wait_wakes_on_append_from_other_thread() {
        let store = MemoryStore::new();
        let mut journal = store.journal();

        let writer = store.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.append(entry(1, "fn:a"));
        });

        let start = Instant::now();
        assert_eq!(journal.wait(Duration::from_secs(5)), WaitStatus::Append);
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_handle_accounting() {
        let store = MemoryStore::new();
        let mut journal = store.journal();
        let other = store.journal();
        assert_eq!(store.open_handles(), 2);

        journal.close().unwrap();
        journal.close().unwrap();
        assert_eq!(store.open_handles(), 1);
        assert!(matches!(journal.next(), Err(StoreError::Closed)));

        drop(other);
        assert_eq!(store.open_handles(), 0);
    }

    #[test]
    fn test_open_directory() {
        let rooted = MemoryStore::new();
        let store = MemoryStore::new().with_directory("/var/log/journal", rooted.clone());

        let _journal = store.open(Some(Path::new("/var/log/journal"))).unwrap();
        assert_eq!(rooted.open_handles(), 1);
        assert_eq!(store.open_handles(), 0);

        assert!(matches!(
            store.open_directory(Path::new("/nope")),
            Err(StoreError::NotFound(_))
        ));

        let _default = store.open(Some(Path::new(""))).unwrap();
        assert_eq!(store.open_handles(), 1);
    }
}
