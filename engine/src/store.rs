//! Storage engine facade.
//!
//! [`SessionStore`] owns the [`FileIndex`], the [`HistoryCache`] and the
//! in-flight request registries, and answers the four queries callers need:
//! session list, project list, full conversation and incremental tail.
//!
//! Identical concurrent queries share one computation. The computation runs
//! on its own task, so a caller that goes away never cancels it for others.
//!
//! The caches are only mutated by the store's own operations and by
//! [`SessionStore::apply`], which the watcher-driven task started by
//! [`SessionStore::attach`] calls for every change notification.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::history::HistoryCache;
use crate::index::FileIndex;
use crate::reader::{read_conversation, read_stream};
use crate::resolver::{collect_projects, SessionResolver};
use crate::types::{ChangeEvent, ConversationMessage, Session, StreamChunk};
use crate::utils::single_flight::SingleFlight;
use crate::watcher::ChangeWatcher;

const SESSIONS_KEY: &str = "sessions";
const PROJECTS_KEY: &str = "projects";

/// Counters describing the work the store has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Times the history log was read from disk.
    pub history_loads: u64,

    /// Full index scans plus project directory listings for session
    /// resolution.
    pub directory_scans: u64,

    /// Sessions currently in the file index.
    pub indexed_sessions: usize,
}

/// Session log indexing, caching and reading engine.
///
/// Cloning is cheap and every clone shares the same caches.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    config: Config,
    index: FileIndex,
    history: HistoryCache,
    resolver: SessionResolver,
    sessions: SingleFlight<&'static str, Vec<Session>>,
    projects: SingleFlight<&'static str, Vec<String>>,
    conversations: SingleFlight<String, Vec<ConversationMessage>>,
}

impl SessionStore {
    /// Opens the store and builds the file index.
    ///
    /// Missing directories are not an error; the store simply starts empty.
    pub async fn open(config: Config) -> Self {
        let projects_dir = config.projects_dir();
        let index = FileIndex::build(&projects_dir).await;

        info!(
            root = %config.claude_dir.display(),
            indexed_sessions = index.len(),
            "Opened session store"
        );

        Self {
            inner: Arc::new(StoreInner {
                history: HistoryCache::new(config.history_path()),
                resolver: SessionResolver::new(&projects_dir),
                index,
                config,
                sessions: SingleFlight::new(),
                projects: SingleFlight::new(),
                conversations: SingleFlight::new(),
            }),
        }
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Lists sessions, most recent first, one entry per id.
    ///
    /// # Errors
    ///
    /// Returns an error if the history log exists but cannot be read.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .sessions
            .run(SESSIONS_KEY, move || async move {
                let entries = inner.history.entries().await?;
                let sessions = inner.resolver.resolve_sessions(&entries).await;
                debug!(
                    entries = entries.len(),
                    sessions = sessions.len(),
                    "Resolved session list"
                );
                Ok(sessions)
            })
            .await
    }

    /// Lists the distinct project paths found in the history log, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the history log exists but cannot be read.
    pub async fn list_projects(&self) -> Result<Vec<String>> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .projects
            .run(PROJECTS_KEY, move || async move {
                let entries = inner.history.entries().await?;
                Ok(collect_projects(&entries))
            })
            .await
    }

    /// Reads a whole session; an unknown session yields no messages.
    ///
    /// Summaries come first (latest first), then user and assistant turns in
    /// file order.
    ///
    /// # Errors
    ///
    /// Returns an error if the session log exists but cannot be read.
    pub async fn read_all(&self, session_id: &str) -> Result<Vec<ConversationMessage>> {
        let inner = Arc::clone(&self.inner);
        let id = session_id.to_string();
        self.inner
            .conversations
            .run(session_id.to_string(), move || async move {
                match inner.index.locate(&id).await {
                    Some(path) => read_conversation(&path).await,
                    None => {
                        debug!(session_id = %id, "Unknown session");
                        Ok(Vec::new())
                    }
                }
            })
            .await
    }

    /// Reads the user and assistant records appended since `offset`.
    ///
    /// An unknown session yields an empty chunk with offset 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the session log exists but cannot be read.
    pub async fn read_from(&self, session_id: &str, offset: u64) -> Result<StreamChunk> {
        match self.inner.index.locate(session_id).await {
            Some(path) => read_stream(&path, offset).await,
            None => Ok(StreamChunk::empty(0)),
        }
    }

    /// Updates the caches for a change notification.
    ///
    /// History changes invalidate the history cache; session changes extend
    /// the file index.
    pub async fn apply(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::HistoryChanged => self.inner.history.invalidate().await,
            ChangeEvent::SessionChanged { session_id, path } => {
                self.inner.index.insert(session_id.clone(), path.clone());
            }
            ChangeEvent::ProjectChanged { .. } => {}
        }
    }

    /// Keeps the caches in sync with `watcher` on a background task.
    ///
    /// Aborting the returned handle only unregisters this listener.
    #[must_use]
    pub fn attach(&self, watcher: &ChangeWatcher) -> JoinHandle<()> {
        let mut rx = watcher.subscribe();
        let store = self.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => store.apply(&event).await,
                    Err(RecvError::Lagged(missed)) => {
                        // Missed history changes cannot be told apart; index
                        // misses repair themselves by rescanning.
                        warn!(missed, "Cache sync lagged, invalidating history");
                        store.inner.history.invalidate().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Cache sync task stopped");
        })
    }

    /// Current work counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            history_loads: self.inner.history.load_count(),
            directory_scans: self.inner.index.scan_count() + self.inner.resolver.listing_count(),
            indexed_sessions: self.inner.index.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        fs::create_dir_all(config.projects_dir().join("-p")).unwrap();
        (dir, config)
    }

    #[tokio::test]
    async fn empty_root_yields_empty_results() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(Config::with_root(dir.path())).await;

        assert!(store.list_sessions().await.unwrap().is_empty());
        assert!(store.list_projects().await.unwrap().is_empty());
        assert!(store.read_all("nope").await.unwrap().is_empty());
        assert_eq!(store.read_from("nope", 99).await.unwrap(), StreamChunk::empty(0));
    }

    #[tokio::test]
    async fn apply_history_changed_invalidates() {
        let (_dir, config) = fixture();
        fs::write(
            config.history_path(),
            "{\"display\":\"a\",\"timestamp\":1,\"project\":\"/p\",\"sessionId\":\"s1\"}\n",
        )
        .unwrap();
        let store = SessionStore::open(config.clone()).await;

        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
        assert_eq!(store.stats().history_loads, 1);

        fs::write(
            config.history_path(),
            concat!(
                "{\"display\":\"a\",\"timestamp\":1,\"project\":\"/p\",\"sessionId\":\"s1\"}\n",
                "{\"display\":\"b\",\"timestamp\":2,\"project\":\"/q\",\"sessionId\":\"s2\"}\n",
            ),
        )
        .unwrap();

        // Not observed until invalidated.
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);

        store.apply(&ChangeEvent::HistoryChanged).await;
        assert_eq!(store.list_sessions().await.unwrap().len(), 2);
        assert_eq!(store.list_projects().await.unwrap(), vec!["/p", "/q"]);
        assert_eq!(store.stats().history_loads, 2);
    }

    #[tokio::test]
    async fn apply_session_changed_extends_index() {
        let (_dir, config) = fixture();
        let store = SessionStore::open(config.clone()).await;
        assert_eq!(store.stats().indexed_sessions, 0);

        let path: PathBuf = config.projects_dir().join("-p").join("new.jsonl");
        fs::write(&path, "{\"type\":\"user\"}\n").unwrap();

        store
            .apply(&ChangeEvent::SessionChanged {
                session_id: "new".to_string(),
                path,
            })
            .await;
        assert_eq!(store.stats().indexed_sessions, 1);

        let scans_before = store.stats().directory_scans;
        assert_eq!(store.read_all("new").await.unwrap().len(), 1);
        assert_eq!(store.stats().directory_scans, scans_before, "no rescan needed");
    }

    #[tokio::test]
    async fn project_changed_is_a_no_op() {
        let (_dir, config) = fixture();
        let store = SessionStore::open(config).await;
        let before = store.stats();

        store
            .apply(&ChangeEvent::ProjectChanged {
                project_id: "-p".to_string(),
            })
            .await;
        assert_eq!(store.stats(), before);
    }

    #[test]
    fn stats_serialize_camel_case() {
        let stats = StoreStats {
            history_loads: 1,
            directory_scans: 2,
            indexed_sessions: 3,
        };
        let value = serde_json::to_value(stats).unwrap();
        assert_eq!(value["historyLoads"], 1);
        assert_eq!(value["directoryScans"], 2);
        assert_eq!(value["indexedSessions"], 3);
    }
}
