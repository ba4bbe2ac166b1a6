//! Change notification fan-out.
//!
//! The watcher publishes [`ChangeEvent`]s through a [`ChangeBroadcaster`],
//! which wraps a tokio broadcast channel. Any number of subscribers can attach
//! and detach at any time; each one sees events in emission order. Dropping a
//! receiver unregisters it and affects nothing else.
//!
//! # Example
//!
//! ```rust
//! use chatlog_engine::broadcast::{ChangeBroadcaster, ChangeFilter};
//! use chatlog_engine::types::ChangeEvent;
//!
//! let broadcaster = ChangeBroadcaster::new();
//! let mut rx = broadcaster.subscribe();
//!
//! broadcaster.broadcast(ChangeEvent::HistoryChanged);
//! assert_eq!(rx.try_recv().unwrap(), ChangeEvent::HistoryChanged);
//!
//! let filter = ChangeFilter::new().with_session("abc");
//! assert!(!filter.matches(&ChangeEvent::HistoryChanged));
//! ```

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::config::DEFAULT_EVENT_BUFFER;
use crate::types::ChangeEvent;

/// Publishes change events to every current subscriber.
///
/// Cloning shares the underlying channel. When a subscriber falls more than
/// the channel capacity behind, it receives `RecvError::Lagged` and skips the
/// oldest events.
#[derive(Debug, Clone)]
pub struct ChangeBroadcaster {
    sender: Sender<ChangeEvent>,
}

impl ChangeBroadcaster {
    /// Creates a broadcaster with [`DEFAULT_EVENT_BUFFER`] capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_BUFFER)
    }

    /// Creates a broadcaster with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0. [`Config`](crate::config::Config) rejects a
    /// zero buffer before it gets here.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created change broadcaster");
        Self { sender }
    }

    /// Registers a subscriber for events broadcast from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let rx = self.sender.subscribe();
        debug!(
            subscriber_count = self.subscriber_count(),
            "New change subscriber added"
        );
        rx
    }

    /// Registers a subscriber that only receives events matching `filter`.
    #[must_use]
    pub fn subscribe_filtered(&self, filter: ChangeFilter) -> ChangeSubscription {
        ChangeSubscription {
            rx: self.subscribe(),
            filter,
        }
    }

    /// Sends an event to every subscriber.
    ///
    /// Returns the number of subscribers that received it. Having no
    /// subscribers is normal (nobody is tailing) and yields 0.
    pub fn broadcast(&self, event: ChangeEvent) -> usize {
        trace!(event = ?event, "Broadcasting change");
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No active subscribers for change event");
                0
            }
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects a subset of change events.
///
/// Set criteria combine with AND logic; unset criteria match everything.
///
/// - `session`: only `SessionChanged` for that id
/// - `project`: only events for that project directory name
/// - `history_only`: only `HistoryChanged`
///
/// `HistoryChanged` carries no session or project, so it only passes filters
/// without those criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    /// Session id to match.
    pub session: Option<String>,

    /// Project directory name (encoded project path) to match.
    pub project: Option<String>,

    /// Match history changes only.
    pub history_only: bool,
}

impl ChangeFilter {
    /// Creates a filter that matches every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session filter (builder pattern).
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session = Some(session_id.into());
        self
    }

    /// Sets the project filter (builder pattern).
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project = Some(project_id.into());
        self
    }

    /// Restricts the filter to history changes (builder pattern).
    #[must_use]
    pub fn history_only(mut self) -> Self {
        self.history_only = true;
        self
    }

    /// Checks whether `event` passes every set criterion.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::HistoryChanged => self.session.is_none() && self.project.is_none(),
            ChangeEvent::SessionChanged { session_id, path } => {
                if self.history_only {
                    return false;
                }
                if self.session.as_deref().is_some_and(|s| s != session_id) {
                    return false;
                }
                if let Some(ref filter_project) = self.project {
                    let parent = path
                        .parent()
                        .and_then(|p| p.file_name())
                        .and_then(|s| s.to_str());
                    if parent != Some(filter_project.as_str()) {
                        return false;
                    }
                }
                true
            }
            ChangeEvent::ProjectChanged { project_id } => {
                !self.history_only
                    && self.session.is_none()
                    && self.project.as_deref().is_none_or(|p| p == project_id)
            }
        }
    }
}

/// A receiver that skips events not matching its filter.
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: Receiver<ChangeEvent>,
    filter: ChangeFilter,
}

impl ChangeSubscription {
    /// Waits for the next matching event.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged` when events were dropped for this
    /// subscriber (it can keep receiving), or `RecvError::Closed` when the
    /// broadcaster is gone.
    pub async fn recv(&mut self) -> Result<ChangeEvent, RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// The filter in effect.
    #[must_use]
    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn session_event(project: &str, id: &str) -> ChangeEvent {
        ChangeEvent::SessionChanged {
            session_id: id.to_string(),
            path: PathBuf::from(format!("/r/projects/{project}/{id}.jsonl")),
        }
    }

    fn project_event(project: &str) -> ChangeEvent {
        ChangeEvent::ProjectChanged {
            project_id: project.to_string(),
        }
    }

    // =========================================================================
    // ChangeBroadcaster
    // =========================================================================

    #[test]
    fn test_broadcast_without_subscribers_returns_zero() {
        let broadcaster = ChangeBroadcaster::new();
        assert_eq!(broadcaster.broadcast(ChangeEvent::HistoryChanged), 0);
    }

    #[test]
    fn test_subscriber_count_tracks_receivers() {
        let broadcaster = ChangeBroadcaster::with_capacity(8);
        assert_eq!(broadcaster.subscriber_count(), 0);

        let rx1 = broadcaster.subscribe();
        let _rx2 = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_each_subscriber_sees_emission_order() {
        let broadcaster = ChangeBroadcaster::new();
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();

        let events = vec![
            session_event("-p", "s1"),
            project_event("-p"),
            ChangeEvent::HistoryChanged,
        ];
        for event in &events {
            assert_eq!(broadcaster.broadcast(event.clone()), 2);
        }

        for rx in [&mut rx1, &mut rx2] {
            for expected in &events {
                assert_eq!(&rx.recv().await.unwrap(), expected);
            }
        }
    }

    #[tokio::test]
    async fn test_dropping_one_subscriber_keeps_others() {
        let broadcaster = ChangeBroadcaster::new();
        let rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();

        drop(rx1);
        assert_eq!(broadcaster.broadcast(ChangeEvent::HistoryChanged), 1);
        assert_eq!(rx2.recv().await.unwrap(), ChangeEvent::HistoryChanged);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_recovers() {
        let broadcaster = ChangeBroadcaster::with_capacity(2);
        let mut rx = broadcaster.subscribe();

        for i in 0..4 {
            broadcaster.broadcast(session_event("-p", &format!("s{i}")));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(2))));
        assert_eq!(rx.recv().await.unwrap(), session_event("-p", "s2"));
    }

    // =========================================================================
    // ChangeFilter
    // =========================================================================

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = ChangeFilter::new();
        assert!(filter.matches(&ChangeEvent::HistoryChanged));
        assert!(filter.matches(&session_event("-p", "s1")));
        assert!(filter.matches(&project_event("-p")));
    }

    #[test]
    fn test_session_filter() {
        let filter = ChangeFilter::new().with_session("s1");
        assert!(filter.matches(&session_event("-p", "s1")));
        assert!(!filter.matches(&session_event("-p", "s2")));
        assert!(!filter.matches(&project_event("-p")));
        assert!(!filter.matches(&ChangeEvent::HistoryChanged));
    }

    #[test]
    fn test_project_filter() {
        let filter = ChangeFilter::new().with_project("-home-a");
        assert!(filter.matches(&session_event("-home-a", "s1")));
        assert!(!filter.matches(&session_event("-home-b", "s1")));
        assert!(filter.matches(&project_event("-home-a")));
        assert!(!filter.matches(&project_event("-home-b")));
        assert!(!filter.matches(&ChangeEvent::HistoryChanged));
    }

    #[test]
    fn test_combined_filter_uses_and_logic() {
        let filter = ChangeFilter::new().with_session("s1").with_project("-a");
        assert!(filter.matches(&session_event("-a", "s1")));
        assert!(!filter.matches(&session_event("-b", "s1")));
        assert!(!filter.matches(&session_event("-a", "s2")));
    }

    #[test]
    fn test_history_only_filter() {
        let filter = ChangeFilter::new().history_only();
        assert!(filter.matches(&ChangeEvent::HistoryChanged));
        assert!(!filter.matches(&session_event("-p", "s1")));
        assert!(!filter.matches(&project_event("-p")));
    }

    #[tokio::test]
    async fn test_filtered_subscription_skips_non_matching() {
        let broadcaster = ChangeBroadcaster::new();
        let mut sub = broadcaster.subscribe_filtered(ChangeFilter::new().with_session("s2"));

        broadcaster.broadcast(session_event("-p", "s1"));
        broadcaster.broadcast(ChangeEvent::HistoryChanged);
        broadcaster.broadcast(session_event("-p", "s2"));

        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(event, session_event("-p", "s2"));
        assert_eq!(sub.filter().session.as_deref(), Some("s2"));
    }
}
