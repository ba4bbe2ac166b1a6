//! Utility modules for the Chatlog engine.
//!
//! # Modules
//!
//! - [`debounce`]: Per-key event debouncing for coalescing rapid file system events
//! - [`paths`]: Directory layout helpers (project path encoding, path classification)
//! - [`single_flight`]: Keyed sharing of in-progress computations

pub mod debounce;
pub mod paths;
pub mod single_flight;

pub use debounce::{Debouncer, DebouncerError, DEFAULT_DEBOUNCE_MS};
pub use paths::{classify_path, encode_project_path, project_name, PathKind};
pub use single_flight::SingleFlight;
