//! Chatlog engine - indexing, caching and incremental reads of Claude Code
//! session logs.
//!
//! # Overview
//!
//! Claude Code keeps an append-only `~/.claude/history.jsonl` plus one
//! append-only log per session under `~/.claude/projects/<project>/`. This
//! crate answers three questions about that tree while it grows:
//!
//! - which sessions exist, most recent first ([`SessionStore::list_sessions`])
//! - what a session contains ([`SessionStore::read_all`])
//! - what was appended since a byte offset ([`SessionStore::read_from`])
//!
//! The [`ChangeWatcher`] turns bursts of filesystem events into debounced
//! [`ChangeEvent`]s; [`SessionStore::attach`] uses them to keep the caches
//! current.
//!
//! # Modules
//!
//! - [`store`]: The engine facade with request coalescing
//! - [`index`]: Session id to file path index
//! - [`history`]: History log parsing and cache
//! - [`resolver`]: Session list reconstruction
//! - [`reader`]: Full and incremental session log readers
//! - [`watcher`]: Debounced filesystem change watcher
//! - [`broadcast`]: Change notification fan-out and filters
//! - [`types`]: Shared data types
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for engine operations
//! - [`utils`]: Shared utilities (paths, debouncing, single-flight)

pub mod broadcast;
pub mod config;
pub mod error;
pub mod history;
pub mod index;
pub mod reader;
pub mod resolver;
pub mod store;
pub mod types;
pub mod utils;
pub mod watcher;

pub use broadcast::{ChangeBroadcaster, ChangeFilter, ChangeSubscription};
pub use config::{Config, ConfigError};
pub use error::{EngineError, Result};
pub use history::{HistoryCache, HistoryEntry};
pub use index::FileIndex;
pub use store::{SessionStore, StoreStats};
pub use types::{ChangeEvent, ConversationMessage, MessageKind, Session, StreamChunk};
pub use utils::{Debouncer, DebouncerError, SingleFlight, DEFAULT_DEBOUNCE_MS};
pub use watcher::{ChangeWatcher, WatcherError};
