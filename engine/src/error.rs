//! Error types for the Chatlog engine.
//!
//! Absence (missing directories, missing files, logs not created yet) is not an
//! error anywhere in the engine: it yields empty results. The variants below
//! cover genuine I/O failures and failures shared by coalesced computations.
//! Configuration and watcher setup have their own error types
//! ([`ConfigError`](crate::config::ConfigError),
//! [`WatcherError`](crate::watcher::WatcherError)).

use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur during engine operations.
///
/// # Examples
///
/// ```ignore
/// use chatlog_engine::error::EngineError;
///
/// fn read_history(path: &Path) -> Result<String, EngineError> {
///     Ok(std::fs::read_to_string(path)?)
/// }
/// ```
#[derive(Error, Debug)]
pub enum EngineError {
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background computation panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),

    /// Failure of a computation shared by several concurrent callers.
    ///
    /// Every caller attached to the same in-flight computation receives the
    /// same underlying error.
    #[error(transparent)]
    Coalesced(Arc<EngineError>),
}

/// A specialized `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn engine_error_task_display() {
        let err = EngineError::Task("task 7 panicked".to_string());
        assert_eq!(err.to_string(), "background task failed: task 7 panicked");
    }

    #[test]
    fn coalesced_error_is_transparent() {
        let inner = Arc::new(EngineError::Task("scan aborted".to_string()));
        let err = EngineError::Coalesced(Arc::clone(&inner));
        assert_eq!(err.to_string(), inner.to_string());
    }

    #[test]
    fn error_source_chain() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: EngineError = io_err.into();
        assert!(err.source().is_some());
    }

    #[test]
    fn result_type_alias_works() {
        fn ok() -> Result<i32> {
            Ok(42)
        }
        fn failing() -> Result<i32> {
            Err(EngineError::Task("nope".to_string()))
        }

        assert!(ok().is_ok());
        assert!(failing().is_err());
    }
}
