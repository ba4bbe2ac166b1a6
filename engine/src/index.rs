//! Session id to file path index.
//!
//! The index is built once by scanning every project directory under
//! `<root>/projects`. It only ever grows: a lookup miss triggers a full rescan
//! for `<id>.jsonl` (the owning project is not known at lookup time), and the
//! change watcher adds session logs as they appear. Deleted files are not
//! reconciled.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use crate::utils::paths::session_id_from_path;

/// Maps session ids to session-log paths.
#[derive(Debug)]
pub struct FileIndex {
    projects_dir: PathBuf,
    paths: RwLock<HashMap<String, PathBuf>>,
    scans: AtomicU64,
}

impl FileIndex {
    /// Creates an empty index without scanning.
    #[must_use]
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            paths: RwLock::new(HashMap::new()),
            scans: AtomicU64::new(0),
        }
    }

    /// Creates an index and populates it from every project directory.
    ///
    /// A missing projects directory yields an empty index.
    pub async fn build(projects_dir: impl Into<PathBuf>) -> Self {
        let index = Self::new(projects_dir);
        let found = index.scan_all().await;

        let mut paths = index.paths.write().unwrap_or_else(PoisonError::into_inner);
        for (session_id, path) in found {
            paths.entry(session_id).or_insert(path);
        }
        info!(
            projects_dir = %index.projects_dir.display(),
            sessions = paths.len(),
            "Built session file index"
        );
        drop(paths);

        index
    }

    /// Directory the index scans.
    #[must_use]
    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Returns the path for `session_id`, rescanning every project directory
    /// on a miss.
    pub async fn locate(&self, session_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.get(session_id) {
            return Some(path);
        }

        debug!(session_id = %session_id, "Index miss, rescanning project directories");
        let path = self.scan_for(session_id).await?;
        self.insert(session_id.to_string(), path.clone());
        Some(path)
    }

    /// Returns the cached path for `session_id` without touching the disk.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<PathBuf> {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Records a session log. Existing mappings are kept.
    ///
    /// Returns `true` if the session was not indexed before.
    pub fn insert(&self, session_id: String, path: PathBuf) -> bool {
        let mut paths = self.paths.write().unwrap_or_else(PoisonError::into_inner);
        if paths.contains_key(&session_id) {
            return false;
        }
        debug!(session_id = %session_id, path = %path.display(), "Indexed session log");
        paths.insert(session_id, path);
        true
    }

    /// Number of indexed sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no session is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of full directory scans performed so far.
    #[must_use]
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    async fn scan_all(&self) -> Vec<(String, PathBuf)> {
        self.scans.fetch_add(1, Ordering::Relaxed);

        let mut found = Vec::new();
        for dir in list_project_dirs(&self.projects_dir).await {
            match list_session_logs(&dir).await {
                Ok(logs) => found.extend(logs),
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "Skipping unreadable project directory");
                }
            }
        }
        found
    }

    async fn scan_for(&self, session_id: &str) -> Option<PathBuf> {
        self.scans.fetch_add(1, Ordering::Relaxed);

        for dir in list_project_dirs(&self.projects_dir).await {
            match list_session_logs(&dir).await {
                Ok(logs) => {
                    if let Some((_, path)) = logs.into_iter().find(|(id, _)| id == session_id) {
                        return Some(path);
                    }
                }
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "Skipping unreadable project directory");
                }
            }
        }
        None
    }
}

/// Lists the subdirectories of the projects directory, following symlinks.
///
/// Absence or an unreadable projects directory yields an empty list.
pub(crate) async fn list_project_dirs(projects_dir: &Path) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(projects_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(dir = %projects_dir.display(), error = %e, "Cannot list projects directory");
            }
            return Vec::new();
        }
    };

    let mut dirs = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
                    dirs.push(path);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(dir = %projects_dir.display(), error = %e, "Projects listing interrupted");
                break;
            }
        }
    }
    dirs.sort();
    dirs
}

/// Lists the session logs directly inside a project directory, sorted by
/// file name. Symlinked logs are followed; dangling links are skipped.
pub(crate) async fn list_session_logs(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut logs = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            continue;
        }
        if let Some(session_id) = session_id_from_path(&path) {
            logs.push((session_id, path));
        }
    }

    logs.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, project: &str, file: &str) -> PathBuf {
        let dir = root.join(project);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(file);
        fs::write(&path, "{}\n").unwrap();
        path
    }

    #[tokio::test]
    async fn build_indexes_all_projects() {
        let root = TempDir::new().unwrap();
        let a = touch(root.path(), "-home-a", "s1.jsonl");
        let b = touch(root.path(), "-home-b", "s2.jsonl");
        touch(root.path(), "-home-b", "notes.txt");

        let index = FileIndex::build(root.path()).await;

        assert_eq!(index.len(), 2);
        assert_eq!(index.get("s1"), Some(a));
        assert_eq!(index.get("s2"), Some(b));
        assert_eq!(index.get("notes"), None);
        assert_eq!(index.scan_count(), 1);
    }

    #[tokio::test]
    async fn build_missing_projects_dir_is_empty() {
        let root = TempDir::new().unwrap();
        let index = FileIndex::build(root.path().join("projects")).await;
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn build_ignores_files_at_projects_level() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("stray.jsonl"), "{}\n").unwrap();
        let index = FileIndex::build(root.path()).await;
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn locate_hit_does_not_scan() {
        let root = TempDir::new().unwrap();
        let path = touch(root.path(), "-p", "s1.jsonl");
        let index = FileIndex::build(root.path()).await;

        assert_eq!(index.locate("s1").await, Some(path));
        assert_eq!(index.scan_count(), 1);
    }

    #[tokio::test]
    async fn locate_miss_rescans_and_caches() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("-p")).unwrap();
        let index = FileIndex::build(root.path()).await;
        assert!(index.is_empty());

        let late = touch(root.path(), "-q", "late.jsonl");

        assert_eq!(index.locate("late").await, Some(late.clone()));
        assert_eq!(index.scan_count(), 2);

        // Cached now.
        assert_eq!(index.locate("late").await, Some(late));
        assert_eq!(index.scan_count(), 2);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn locate_unknown_returns_none() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "-p", "s1.jsonl");
        let index = FileIndex::build(root.path()).await;

        assert_eq!(index.locate("missing").await, None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn insert_keeps_existing_mapping() {
        let index = FileIndex::new("/nowhere");
        assert!(index.insert("s1".to_string(), PathBuf::from("/a/s1.jsonl")));
        assert!(!index.insert("s1".to_string(), PathBuf::from("/b/s1.jsonl")));
        assert_eq!(index.get("s1"), Some(PathBuf::from("/a/s1.jsonl")));
    }

    #[tokio::test]
    async fn list_session_logs_sorted_by_name() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "-p", "b.jsonl");
        touch(root.path(), "-p", "a.jsonl");
        fs::create_dir_all(root.path().join("-p").join("nested.jsonl")).unwrap();

        let logs = list_session_logs(&root.path().join("-p")).await.unwrap();
        let ids: Vec<_> = logs.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn build_follows_symlinked_projects_and_logs() {
        use std::os::unix::fs::symlink;

        let root = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let target = touch(elsewhere.path(), "real", "linked-dir.jsonl");
        let log = touch(elsewhere.path(), "other", "linked-log.jsonl");

        let projects = root.path().join("projects");
        fs::create_dir_all(projects.join("-p")).unwrap();
        symlink(target.parent().unwrap(), projects.join("-linked")).unwrap();
        symlink(&log, projects.join("-p").join("linked-log.jsonl")).unwrap();
        symlink(
            elsewhere.path().join("gone.jsonl"),
            projects.join("-p").join("dangling.jsonl"),
        )
        .unwrap();

        let index = FileIndex::build(&projects).await;

        assert_eq!(
            index.get("linked-dir"),
            Some(projects.join("-linked").join("linked-dir.jsonl"))
        );
        assert_eq!(
            index.get("linked-log"),
            Some(projects.join("-p").join("linked-log.jsonl"))
        );
        assert_eq!(index.get("dangling"), None);
        assert_eq!(index.len(), 2);
    }
}
