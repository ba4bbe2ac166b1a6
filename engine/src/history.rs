//! History log parsing and caching.
//!
//! Claude Code appends one JSON object per line to `~/.claude/history.jsonl`
//! whenever the user submits a prompt:
//!
//! ```json
//! {
//!   "display": "fix the flaky watcher test",
//!   "timestamp": 1738567268363,
//!   "project": "/home/ubuntu/Projects/chatlog",
//!   "sessionId": "6e45a55c-3124-4cc8-ad85-040a5c316009"
//! }
//! ```
//!
//! Older entries may lack `sessionId`; those are resolved later by the
//! [`resolver`](crate::resolver).
//!
//! The [`HistoryCache`] memoizes the parsed log. It is either
//! [`CacheState::Fresh`] or [`CacheState::Invalidated`]; invalidation never
//! reads the file, the next [`HistoryCache::entries`] call does.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::Result;

/// A parsed entry from history.jsonl.
///
/// The JSON uses camelCase field names which are mapped to snake_case.
/// `display` and `project` may be missing or `null`; `timestamp` may be any
/// JSON number and is truncated to whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Summary text as displayed to the user.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub display: String,

    /// Producer timestamp (Unix milliseconds).
    #[serde(deserialize_with = "millis_from_number")]
    pub timestamp: i64,

    /// Absolute path of the project the entry was recorded in.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub project: String,

    /// Session the entry belongs to, when the producer recorded it.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl HistoryEntry {
    /// Converts the Unix milliseconds timestamp to a [`DateTime<Utc>`].
    ///
    /// Returns `None` if the timestamp is out of range.
    ///
    /// ```
    /// use chrono::Datelike;
    /// use chatlog_engine::history::HistoryEntry;
    ///
    /// let entry = HistoryEntry {
    ///     display: "hello".to_string(),
    ///     timestamp: 1738567268363, // 2025-02-03T09:21:08.363Z
    ///     project: "/home/user/project".to_string(),
    ///     session_id: None,
    /// };
    ///
    /// assert_eq!(entry.to_datetime().unwrap().year(), 2025);
    /// ```
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// The session id, ignoring empty strings.
    #[must_use]
    pub fn explicit_session_id(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|id| !id.is_empty())
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn millis_from_number<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    number
        .as_i64()
        .or_else(|| number.as_f64().map(|ms| ms as i64))
        .ok_or_else(|| D::Error::custom("timestamp must be a number"))
}

/// Parses a single line from history.jsonl.
pub fn parse_history_line(line: &[u8]) -> std::result::Result<HistoryEntry, serde_json::Error> {
    serde_json::from_slice(line)
}

/// Parses the full content of history.jsonl, skipping lines that fail to parse.
///
/// The log is append-only and its last line may be mid-write, so unparseable
/// lines are not errors.
#[must_use]
pub fn parse_history_entries(content: &[u8]) -> Vec<HistoryEntry> {
    content
        .split(|&b| b == b'\n')
        .filter(|line| !line.trim_ascii().is_empty())
        .filter_map(|line| match parse_history_line(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                trace!(error = %e, "Skipping unparseable history line");
                None
            }
        })
        .collect()
}

/// Reads and parses the history log; a missing file yields no entries.
pub async fn load_history(path: &Path) -> Result<Vec<HistoryEntry>> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "History log not found, treating as empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let entries = parse_history_entries(&content);
    debug!(
        path = %path.display(),
        entries = entries.len(),
        bytes = content.len(),
        "Loaded history log"
    );
    Ok(entries)
}

/// State of the memoized history view.
#[derive(Debug, Clone)]
pub enum CacheState {
    /// Parsed entries, valid until the next invalidation.
    Fresh(Arc<Vec<HistoryEntry>>),

    /// Must be reloaded on the next read.
    Invalidated,
}

/// Memoized, invalidate-on-demand view of the history log.
#[derive(Debug)]
pub struct HistoryCache {
    path: PathBuf,
    state: RwLock<CacheState>,
    loads: AtomicU64,
}

impl HistoryCache {
    /// Creates a cache for the given history log. Nothing is read yet.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: RwLock::new(CacheState::Invalidated),
            loads: AtomicU64::new(0),
        }
    }

    /// Path of the history log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the entries in file order, loading them if invalidated.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the log exists but cannot be read.
    pub async fn entries(&self) -> Result<Arc<Vec<HistoryEntry>>> {
        if let CacheState::Fresh(entries) = &*self.state.read().await {
            return Ok(Arc::clone(entries));
        }

        let mut state = self.state.write().await;
        // Another caller may have loaded while we waited for the write lock.
        if let CacheState::Fresh(entries) = &*state {
            return Ok(Arc::clone(entries));
        }

        let entries = Arc::new(load_history(&self.path).await?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        *state = CacheState::Fresh(Arc::clone(&entries));
        Ok(entries)
    }

    /// Drops the memoized entries without re-reading.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        if matches!(*state, CacheState::Fresh(_)) {
            debug!(path = %self.path.display(), "History cache invalidated");
        }
        *state = CacheState::Invalidated;
    }

    /// Whether the cache currently holds parsed entries.
    pub async fn is_fresh(&self) -> bool {
        matches!(*self.state.read().await, CacheState::Fresh(_))
    }

    /// Number of times the log has been read from disk.
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}
