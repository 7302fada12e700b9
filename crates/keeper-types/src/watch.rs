//! One-shot watch notifications.

use std::fmt;

use tokio::sync::oneshot;

use crate::state::EventType;
use crate::state::SessionState;

/// Notification delivered to a watch or to the global watcher set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    /// What changed.
    pub event_type: EventType,
    /// Session state when the event was generated.
    pub state: SessionState,
    /// Affected node; `None` for session events.
    pub path: Option<String>,
}

impl WatchedEvent {
    /// A session state transition.
    pub fn session(state: SessionState) -> Self {
        Self {
            event_type: EventType::Session,
            state,
            path: None,
        }
    }

    /// A change to `path` observed while connected.
    pub fn node(event_type: EventType, path: impl Into<String>) -> Self {
        Self {
            event_type,
            state: SessionState::Connected,
            path: Some(path.into()),
        }
    }
}

/// One-shot watch callback.
///
/// Fires at most once: [`Watcher::fire`] consumes it. The backing client invokes
/// it from its notification task, so the callback must not block.
pub struct Watcher(Box<dyn FnOnce(WatchedEvent) + Send + 'static>);

impl Watcher {
    /// Wrap a callback.
    pub fn new(callback: impl FnOnce(WatchedEvent) + Send + 'static) -> Self {
        Self(Box::new(callback))
    }

    /// A watcher that forwards its event into a oneshot channel.
    pub fn channel() -> (Self, oneshot::Receiver<WatchedEvent>) {
        let (tx, rx) = oneshot::channel();
        let watcher = Self::new(move |event| {
            // Receiver may have given up waiting.
            let _ = tx.send(event);
        });
        (watcher, rx)
    }

    /// Deliver the event.
    pub fn fire(self, event: WatchedEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Watcher")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_watcher_delivers_once() {
        let (watcher, rx) = Watcher::channel();
        watcher.fire(WatchedEvent::node(EventType::NodeDeleted, "/locks/lock-1"));
        let event = rx.await.unwrap();
        assert_eq!(event.event_type, EventType::NodeDeleted);
        assert_eq!(event.path.as_deref(), Some("/locks/lock-1"));
    }

    #[test]
    fn firing_after_receiver_dropped_is_harmless() {
        let (watcher, rx) = Watcher::channel();
        drop(rx);
        watcher.fire(WatchedEvent::session(SessionState::Expired));
    }
}
