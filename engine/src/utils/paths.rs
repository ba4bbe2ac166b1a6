//! Path helpers for the Claude Code directory layout.
//!
//! The engine reads a fixed layout below a root directory (usually `~/.claude`):
//!
//! - **History log**: `<root>/history.jsonl`
//! - **Project directories**: `<root>/projects/<encoded-project-path>/`
//! - **Session logs**: `<root>/projects/<encoded-project-path>/<session-id>.jsonl`
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use chatlog_engine::utils::paths::{classify_path, encode_project_path, PathKind};
//!
//! assert_eq!(encode_project_path("/home/user/my.app"), "-home-user-my-app");
//!
//! let path = Path::new("/home/user/.claude/projects/-home-user-app/abc-123.jsonl");
//! assert_eq!(
//!     classify_path(path),
//!     PathKind::Session {
//!         session_id: "abc-123".to_string(),
//!         project_id: "-home-user-app".to_string(),
//!     }
//! );
//! ```

use std::path::Path;

/// File extension (without the dot) of session logs and the history log.
pub const SESSION_LOG_EXTENSION: &str = "jsonl";

/// File name of the history log inside the root directory.
pub const HISTORY_FILE_NAME: &str = "history.jsonl";

/// Directory name holding per-project session directories.
pub const PROJECTS_DIR_NAME: &str = "projects";

/// What a changed path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKind {
    /// The history log.
    History,

    /// A session log inside a project directory.
    Session {
        /// File name without the extension.
        session_id: String,
        /// Name of the parent (project) directory.
        project_id: String,
    },

    /// Anything else (directories, foreign files).
    Other,
}

/// Encodes a project path into its directory name.
///
/// Every `/` and `.` is replaced by `-`. The encoding is one-way; the original
/// project string is always available from the history log.
#[must_use]
pub fn encode_project_path(project: &str) -> String {
    project.replace(['/', '.'], "-")
}

/// Returns the last path segment of a project path.
///
/// Falls back to the whole string when the last segment is empty, as with a
/// trailing slash.
///
/// ```
/// use chatlog_engine::utils::paths::project_name;
///
/// assert_eq!(project_name("/home/user/vibetea"), "vibetea");
/// assert_eq!(project_name("standalone"), "standalone");
/// assert_eq!(project_name("/home/user/vibetea/"), "/home/user/vibetea/");
/// ```
#[must_use]
pub fn project_name(project: &str) -> String {
    project
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(project)
        .to_string()
}

/// Returns `true` if the path has the session-log extension.
#[must_use]
pub fn is_session_log(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == SESSION_LOG_EXTENSION)
}

/// Extracts the session id (file name minus extension) from a session-log path.
#[must_use]
pub fn session_id_from_path(path: &Path) -> Option<String> {
    if !is_session_log(path) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_string())
}

/// Classifies a path by its suffix.
///
/// A path ending in the history log name is [`PathKind::History`]; any other
/// path with the session-log extension is a [`PathKind::Session`].
#[must_use]
pub fn classify_path(path: &Path) -> PathKind {
    let Some(filename) = path.file_name().and_then(|s| s.to_str()) else {
        return PathKind::Other;
    };

    if filename == HISTORY_FILE_NAME {
        return PathKind::History;
    }

    let Some(session_id) = session_id_from_path(path) else {
        return PathKind::Other;
    };

    let project_id = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    PathKind::Session {
        session_id,
        project_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_encode_replaces_slashes_and_dots() {
        assert_eq!(
            encode_project_path("/Users/dev/site.example.com"),
            "-Users-dev-site-example-com"
        );
    }

    #[test]
    fn test_encode_keeps_other_characters() {
        assert_eq!(encode_project_path("/tmp/my_app-2"), "-tmp-my_app-2");
        assert_eq!(encode_project_path(""), "");
    }

    #[test]
    fn test_project_name_last_segment() {
        assert_eq!(project_name("/home/user/project"), "project");
        assert_eq!(project_name("/home/u/app.rs"), "app.rs");
    }

    #[test]
    fn test_project_name_unsegmented() {
        assert_eq!(project_name("project"), "project");
        assert_eq!(project_name(""), "");
        assert_eq!(project_name("/"), "/");
    }

    #[test]
    fn test_project_name_trailing_slash_keeps_whole_path() {
        assert_eq!(project_name("/home/u/app/"), "/home/u/app/");
        assert_eq!(project_name("app/"), "app/");
    }

    #[test]
    fn test_session_id_from_path() {
        let path = Path::new("/root/projects/-a/6e45a55c.jsonl");
        assert_eq!(session_id_from_path(path).as_deref(), Some("6e45a55c"));
    }

    #[test]
    fn test_session_id_wrong_extension() {
        assert_eq!(session_id_from_path(Path::new("/root/projects/-a/x.json")), None);
        assert_eq!(session_id_from_path(Path::new("/root/projects/-a/x")), None);
    }

    #[test]
    fn test_classify_history() {
        let path = PathBuf::from("/home/user/.claude/history.jsonl");
        assert_eq!(classify_path(&path), PathKind::History);
    }

    #[test]
    fn test_classify_session() {
        let path = PathBuf::from("/home/user/.claude/projects/-home-user-app/s1.jsonl");
        assert_eq!(
            classify_path(&path),
            PathKind::Session {
                session_id: "s1".to_string(),
                project_id: "-home-user-app".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_history_name_wins_anywhere() {
        let path = PathBuf::from("/home/user/.claude/projects/-p/history.jsonl");
        assert_eq!(classify_path(&path), PathKind::History);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(
            classify_path(Path::new("/home/user/.claude/projects/-p")),
            PathKind::Other
        );
        assert_eq!(
            classify_path(Path::new("/home/user/.claude/settings.json")),
            PathKind::Other
        );
        assert_eq!(classify_path(Path::new("/")), PathKind::Other);
    }
}
