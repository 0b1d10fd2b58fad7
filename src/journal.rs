//! Durable, bounded key→timestamp log.
//!
//! The journal records the last successful fetch time per key and backs
//! [`AgeValidator`](crate::AgeValidator). It is an in-memory bounded map
//! (insertion-order eviction, default capacity 300) plus an append-only
//! file of `key:timestamp` lines.
//!
//! # Durability model
//!
//! [`Journal::open`] replays the file synchronously, keeping only the
//! newest timestamp per key, then compacts it so superseded lines are
//! dropped. After construction every accepted [`Journal::save`] is appended
//! by a single dedicated background task, so saves never block on file I/O.
//! Per-key append order matches save order; cross-key order is unspecified.
//!
//! If the journal directory cannot be created the instance degrades to
//! memory-only: reads and saves keep working for the process lifetime, the
//! failure is logged once.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::BoxKey;

const JOURNAL_FILE: &str = "journal.databox";

/// Default maximum number of tracked keys.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 300;

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

enum WriterOp {
    Append { key: String, timestamp: i64 },
    Flush(oneshot::Sender<()>),
}

/// Persistent, bounded, concurrent key→timestamp store.
///
/// ```rust,no_run
/// # use databox::{BoxKey, Journal, journal::unix_millis};
/// # #[tokio::main] async fn main() -> databox::Result<()> {
/// let journal = Journal::open("/var/cache/databox/journal");
/// let key = BoxKey::new("users")?;
/// journal.save(&key, unix_millis());
/// assert!(journal.read(&key).is_some());
/// # Ok(()) }
/// ```
pub struct Journal {
    entries: RwLock<BoundedMap>,
    writer: Option<mpsc::UnboundedSender<WriterOp>>,
}

impl Journal {
    /// Open (or create) a journal under `dir` with the default capacity.
    ///
    /// Replay and compaction run synchronously before this returns. Must be
    /// called from within a tokio runtime: the append worker is spawned here.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self::with_capacity(dir, DEFAULT_JOURNAL_CAPACITY)
    }

    /// Open a journal with a custom key capacity.
    ///
    /// When the number of distinct keys exceeds `capacity`, the oldest
    /// inserted key is evicted from memory; eviction becomes durable at the
    /// next compaction.
    pub fn with_capacity(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        let dir = dir.into();
        let mut entries = BoundedMap::new(capacity);

        if let Err(e) = fs::create_dir_all(&dir) {
            error!(
                dir = %dir.display(),
                error = %e,
                "cannot create journal directory, journal is memory-only"
            );
            return Self {
                entries: RwLock::new(entries),
                writer: None,
            };
        }

        let path = dir.join(JOURNAL_FILE);
        replay(&path, &mut entries);
        if !entries.is_empty() {
            compact(&path, &entries);
        }

        let writer = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(writer_task(tokio::fs::File::from_std(file), rx));
                Some(tx)
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "cannot open journal file, journal is memory-only"
                );
                None
            }
        };

        Self {
            entries: RwLock::new(entries),
            writer,
        }
    }

    /// Last recorded timestamp for `key`, if any.
    pub fn read(&self, key: &BoxKey) -> Option<i64> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(key.as_str())
    }

    /// Record a fetch timestamp for `key`.
    ///
    /// A save with a timestamp not newer than the stored one is a no-op:
    /// for any key only the maximum timestamp ever written is retained.
    /// The file append happens on the background worker; the caller only
    /// pays for the map mutation.
    pub fn save(&self, key: &BoxKey, timestamp: i64) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if entries.insert_if_newer(key.as_str().to_owned(), timestamp) {
            if let Some(tx) = &self.writer {
                let _ = tx.send(WriterOp::Append {
                    key: key.as_str().to_owned(),
                    timestamp,
                });
            }
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.len()
    }

    /// Whether the journal tracks no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every append accepted so far has reached the file.
    ///
    /// Use before process shutdown, or in tests that reopen the journal
    /// directory. A memory-only journal returns immediately.
    pub async fn flush(&self) {
        if let Some(tx) = &self.writer {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(WriterOp::Flush(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
        }
    }
}

async fn writer_task(mut file: tokio::fs::File, mut rx: mpsc::UnboundedReceiver<WriterOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriterOp::Append { key, timestamp } => {
                let line = format!("{key}:{timestamp}\n");
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(key, error = %e, "journal append failed");
                }
            }
            WriterOp::Flush(ack) => {
                if let Err(e) = file.flush().await {
                    warn!(error = %e, "journal flush failed");
                }
                let _ = ack.send(());
            }
        }
    }
}

/// Replay the journal file into `entries`, newest timestamp per key wins.
fn replay(path: &Path, entries: &mut BoundedMap) {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no journal file found");
            return;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "journal replay failed");
            return;
        }
    };

    for line in contents.lines() {
        let Some((key, timestamp)) = line.split_once(':') else {
            warn!(line, "skipping malformed journal line");
            continue;
        };
        match timestamp.parse::<i64>() {
            Ok(timestamp) => {
                entries.insert_if_newer(key.to_owned(), timestamp);
            }
            Err(_) => warn!(line, "skipping malformed journal timestamp"),
        }
    }
    debug!(entries = entries.len(), "journal replayed");
}

/// Rewrite the file in full, dropping duplicate and superseded lines.
fn compact(path: &Path, entries: &BoundedMap) {
    let mut buf = String::new();
    for (key, timestamp) in entries.iter() {
        buf.push_str(key);
        buf.push(':');
        buf.push_str(&timestamp.to_string());
        buf.push('\n');
    }
    if let Err(e) = fs::write(path, buf) {
        warn!(path = %path.display(), error = %e, "journal compaction failed");
    } else {
        debug!(entries = entries.len(), "journal compacted");
    }
}

/// Insertion-order-bounded map: when capacity is exceeded the oldest
/// inserted key is evicted. Updating an existing key keeps its position.
struct BoundedMap {
    capacity: usize,
    map: HashMap<String, i64>,
    order: VecDeque<String>,
}

impl BoundedMap {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &str) -> Option<i64> {
        self.map.get(key).copied()
    }

    /// Insert `timestamp` unless an equal-or-newer one is stored.
    /// Returns whether the map changed.
    fn insert_if_newer(&mut self, key: String, timestamp: i64) -> bool {
        match self.map.get(&key) {
            Some(&existing) if existing >= timestamp => false,
            Some(_) => {
                self.map.insert(key, timestamp);
                true
            }
            None => {
                self.order.push_back(key.clone());
                self.map.insert(key, timestamp);
                while self.map.len() > self.capacity {
                    if let Some(oldest) = self.order.pop_front() {
                        self.map.remove(&oldest);
                    }
                }
                true
            }
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.order
            .iter()
            .filter_map(|key| self.map.get(key).map(|&ts| (key.as_str(), ts)))
    }
}
