//! Session list reconstruction from history entries.
//!
//! Sessions are derived, never stored. Each history entry either names its
//! session or is matched to the session log in its project directory whose
//! modification time is closest to the entry's timestamp. The mtime match is
//! an approximation: equal distances fall back to file-name order.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::history::HistoryEntry;
use crate::index::list_session_logs;
use crate::types::Session;
use crate::utils::paths::{encode_project_path, project_name};

/// A session log considered for an entry without a session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// File name without extension.
    pub session_id: String,

    /// Modification time in milliseconds since the Unix epoch.
    pub mtime_ms: i64,
}

/// Rebuilds session lists from history entries.
#[derive(Debug)]
pub struct SessionResolver {
    projects_dir: PathBuf,
    listings: AtomicU64,
}

impl SessionResolver {
    #[must_use]
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            listings: AtomicU64::new(0),
        }
    }

    /// Resolves entries into sessions, deduplicated by id and ordered by
    /// timestamp descending.
    ///
    /// The first entry seen for a session supplies its metadata. Ties in
    /// timestamp keep history order. Entries whose session cannot be
    /// determined are skipped.
    pub async fn resolve_sessions(&self, entries: &[HistoryEntry]) -> Vec<Session> {
        // Project directories are listed at most once per call.
        let mut listings: HashMap<String, Option<Vec<Candidate>>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut sessions = Vec::new();

        for entry in entries {
            let session_id = match entry.explicit_session_id() {
                Some(id) => id.to_string(),
                None => {
                    if entry.project.is_empty() {
                        continue;
                    }
                    let candidates = match listings.entry(encode_project_path(&entry.project)) {
                        Entry::Occupied(occupied) => occupied.into_mut(),
                        Entry::Vacant(vacant) => {
                            let dir = self.projects_dir.join(vacant.key());
                            let listed = self.list_candidates(&dir).await;
                            vacant.insert(listed)
                        }
                    };
                    let Some(found) = candidates
                        .as_deref()
                        .and_then(|c| closest_by_mtime(c, entry.timestamp))
                    else {
                        continue;
                    };
                    found.session_id.clone()
                }
            };

            if !seen.insert(session_id.clone()) {
                continue;
            }
            sessions.push(Session {
                id: session_id,
                display: entry.display.clone(),
                timestamp: entry.timestamp,
                project: entry.project.clone(),
                project_name: project_name(&entry.project),
            });
        }

        // Stable: equal timestamps keep history order.
        sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sessions
    }

    /// Number of project directories listed for mtime matching.
    #[must_use]
    pub fn listing_count(&self) -> u64 {
        self.listings.load(Ordering::Relaxed)
    }

    async fn list_candidates(&self, dir: &Path) -> Option<Vec<Candidate>> {
        self.listings.fetch_add(1, Ordering::Relaxed);

        let logs = match list_session_logs(dir).await {
            Ok(logs) => logs,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "No candidates for unresolved entry");
                return None;
            }
        };

        let mut candidates = Vec::with_capacity(logs.len());
        for (session_id, path) in logs {
            match tokio::fs::metadata(&path).await {
                Ok(meta) => {
                    if let Some(mtime_ms) = mtime_millis(&meta) {
                        candidates.push(Candidate { session_id, mtime_ms });
                    }
                }
                Err(e) => debug!(path = %path.display(), error = %e, "Cannot stat session log"),
            }
        }
        Some(candidates)
    }
}

/// Picks the candidate whose mtime is numerically closest to `timestamp`.
///
/// On equal distance the earlier candidate wins.
#[must_use]
pub fn closest_by_mtime(candidates: &[Candidate], timestamp: i64) -> Option<&Candidate> {
    let mut best: Option<(&Candidate, u64)> = None;
    for candidate in candidates {
        let distance = candidate.mtime_ms.abs_diff(timestamp);
        if best.is_none_or(|(_, best_distance)| distance < best_distance) {
            best = Some((candidate, distance));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Distinct non-empty project paths, sorted lexicographically.
#[must_use]
pub fn collect_projects(entries: &[HistoryEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|entry| !entry.project.is_empty())
        .map(|entry| entry.project.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Modification time in milliseconds since the Unix epoch.
pub(crate) fn mtime_millis(meta: &Metadata) -> Option<i64> {
    let modified = meta.modified().ok()?;
    match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).ok(),
        Err(before) => i64::try_from(before.duration().as_millis()).ok().map(|ms| -ms),
    }
}
