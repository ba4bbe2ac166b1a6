//! Filesystem change watcher.
//!
//! Watches `<root>/history.jsonl` and the session logs below
//! `<root>/projects` and turns bursts of raw create/modify events into
//! [`ChangeEvent`]s published on a [`ChangeBroadcaster`].
//!
//! # Architecture
//!
//! ```text
//! notify callback ──try_send──▶ Debouncer<PathBuf> ──▶ dispatch task ──▶ ChangeBroadcaster
//!  (filter kind/depth)           (per-path settle)      (classify path)
//! ```
//!
//! The notify callback runs on notify's own thread, so it only filters and
//! hands paths to the debouncer. Each path has its own settle timer; a new
//! event for the same path restarts it. When a timer fires the path is
//! classified by suffix:
//!
//! - `history.jsonl` → [`ChangeEvent::HistoryChanged`]
//! - `<id>.jsonl` → [`ChangeEvent::SessionChanged`] then
//!   [`ChangeEvent::ProjectChanged`] for the parent directory
//!
//! Watcher errors are logged and watching continues.
//!
//! # Example
//!
//! ```no_run
//! use chatlog_engine::config::Config;
//! use chatlog_engine::watcher::ChangeWatcher;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let watcher = ChangeWatcher::start(&config)?;
//! let mut rx = watcher.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Component, Path, PathBuf};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::broadcast::Receiver;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::broadcast::{ChangeBroadcaster, ChangeFilter, ChangeSubscription};
use crate::config::Config;
use crate::types::ChangeEvent;
use crate::utils::debounce::Debouncer;
use crate::utils::paths::{classify_path, PathKind};

/// Maximum depth below the projects directory that is reported
/// (project directory, then session files within it).
const MAX_PROJECT_DEPTH: usize = 2;

/// Capacity of the channel between the debouncer and the dispatch task.
const DISPATCH_CHANNEL_CAPACITY: usize = 1000;

/// Errors that can occur while setting up the watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to initialize the file system watcher.
    #[error("failed to create watcher: {0}")]
    WatcherInit(#[from] notify::Error),

    /// Failed to resolve the watched directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The watch directory does not exist or is inaccessible.
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Debounced change notifications for a Claude Code directory.
///
/// Dropping the watcher stops watching. Pending debounced paths are flushed
/// to subscribers on the way out.
#[derive(Debug)]
pub struct ChangeWatcher {
    /// Kept alive to maintain the watch subscription.
    #[allow(dead_code)]
    watcher: RecommendedWatcher,

    broadcaster: ChangeBroadcaster,

    root: PathBuf,
}

impl ChangeWatcher {
    /// Starts watching `config.claude_dir` with a new broadcaster sized by
    /// `config.event_buffer`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::DirectoryNotFound`] if the root directory does
    /// not exist, or [`WatcherError::WatcherInit`] if the OS watch cannot be
    /// registered.
    pub fn start(config: &Config) -> Result<Self> {
        Self::with_broadcaster(config, ChangeBroadcaster::with_capacity(config.event_buffer))
    }

    /// Starts watching and publishes on an existing broadcaster.
    ///
    /// # Errors
    ///
    /// Same as [`ChangeWatcher::start`].
    pub fn with_broadcaster(config: &Config, broadcaster: ChangeBroadcaster) -> Result<Self> {
        if !config.claude_dir.is_dir() {
            return Err(WatcherError::DirectoryNotFound(config.claude_dir.clone()));
        }

        // Event paths are reported canonicalized on some platforms.
        let root = config.claude_dir.canonicalize()?;
        let scope = WatchScope::new(&root);

        let (output_tx, output_rx) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);
        let debouncer = Debouncer::<PathBuf, ()>::new(config.debounce, output_tx);

        tokio::spawn(dispatch_changes(output_rx, broadcaster.clone()));

        let watcher = create_watcher(scope, debouncer)?;

        info!(
            root = %root.display(),
            debounce_ms = config.debounce.as_millis(),
            "Started change watcher"
        );

        Ok(Self {
            watcher,
            broadcaster,
            root,
        })
    }

    /// Registers a subscriber for all change events.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.broadcaster.subscribe()
    }

    /// Registers a subscriber for the events matching `filter`.
    #[must_use]
    pub fn subscribe_filtered(&self, filter: ChangeFilter) -> ChangeSubscription {
        self.broadcaster.subscribe_filtered(filter)
    }

    /// The broadcaster events are published on.
    #[must_use]
    pub fn broadcaster(&self) -> &ChangeBroadcaster {
        &self.broadcaster
    }

    /// The (canonicalized) root directory being watched.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Which raw paths are worth debouncing.
#[derive(Debug, Clone)]
struct WatchScope {
    root: PathBuf,
    history_path: PathBuf,
    projects_dir: PathBuf,
}

impl WatchScope {
    fn new(root: &Path) -> Self {
        let config = Config::with_root(root);
        Self {
            root: root.to_path_buf(),
            history_path: config.history_path(),
            projects_dir: config.projects_dir(),
        }
    }

    fn is_relevant(&self, path: &Path) -> bool {
        if path == self.history_path {
            return true;
        }
        let Ok(relative) = path.strip_prefix(&self.projects_dir) else {
            return false;
        };
        let depth = relative
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .count();
        (1..=MAX_PROJECT_DEPTH).contains(&depth)
    }
}

/// Creates the notify watcher and registers the watches.
fn create_watcher(
    scope: WatchScope,
    debouncer: Debouncer<PathBuf, ()>,
) -> Result<RecommendedWatcher> {
    let callback_scope = scope.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            handle_notify_event(res, &callback_scope, &debouncer);
        },
        notify::Config::default(),
    )?;

    if scope.projects_dir.is_dir() {
        watcher.watch(&scope.root, RecursiveMode::NonRecursive)?;
        watcher.watch(&scope.projects_dir, RecursiveMode::Recursive)?;
        debug!(
            root = %scope.root.display(),
            projects_dir = %scope.projects_dir.display(),
            "Watching history log and projects tree"
        );
    } else {
        // The projects directory may be created later; the depth filter
        // keeps everything else out.
        watcher.watch(&scope.root, RecursiveMode::Recursive)?;
        debug!(root = %scope.root.display(), "Projects directory absent, watching root recursively");
    }

    Ok(watcher)
}

/// Filters raw notify events and feeds relevant paths to the debouncer.
fn handle_notify_event(
    res: notify::Result<Event>,
    scope: &WatchScope,
    debouncer: &Debouncer<PathBuf, ()>,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    if !is_change_kind(event.kind) {
        trace!(kind = ?event.kind, "Ignoring event kind");
        return;
    }

    for path in event.paths {
        if !scope.is_relevant(&path) {
            continue;
        }
        if !debouncer.try_send(path.clone(), ()) {
            warn!(path = %path.display(), "Failed to queue change, debouncer busy or closed");
        }
    }
}

/// Only creations and content or name changes are reported.
fn is_change_kind(kind: EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Maps a settled path to the notifications it produces, in emission order.
#[must_use]
pub fn events_for_path(path: &Path) -> Vec<ChangeEvent> {
    match classify_path(path) {
        PathKind::History => vec![ChangeEvent::HistoryChanged],
        PathKind::Session {
            session_id,
            project_id,
        } => vec![
            ChangeEvent::SessionChanged {
                session_id,
                path: path.to_path_buf(),
            },
            ChangeEvent::ProjectChanged { project_id },
        ],
        PathKind::Other => Vec::new(),
    }
}

/// Classifies debounced paths and publishes the resulting events.
async fn dispatch_changes(
    mut rx: mpsc::Receiver<(PathBuf, ())>,
    broadcaster: ChangeBroadcaster,
) {
    while let Some((path, ())) = rx.recv().await {
        let events = events_for_path(&path);
        if events.is_empty() {
            trace!(path = %path.display(), "Settled path is not a log");
            continue;
        }
        debug!(path = %path.display(), "Change settled");
        for event in events {
            broadcaster.broadcast(event);
        }
    }

    debug!("Change dispatcher shutting down");
}
