//! Sync status indicator
//!
//! The only place sync failures become visible: online, offline,
//! syncing with a pending count, or auth-required.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::events::{EventBus, SyncEvent};

/// What the status indicator shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ConnectionStatus {
    /// Reachable and nothing queued
    Online,
    /// Not reachable; mutations are queued
    Offline,
    /// Reachable with changes still queued
    Syncing { pending: usize },
    /// The server rejected our credentials
    AuthRequired,
}

impl ConnectionStatus {
    /// Status for a reachable client with `pending` queued changes
    pub fn for_queue(pending: usize) -> Self {
        if pending == 0 {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Syncing { pending }
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Online => write!(f, "online"),
            ConnectionStatus::Offline => write!(f, "offline"),
            ConnectionStatus::Syncing { pending } => write!(f, "syncing ({pending} pending)"),
            ConnectionStatus::AuthRequired => write!(f, "auth required"),
        }
    }
}

/// Current status plus change notifications
#[derive(Debug, Clone)]
pub struct StatusIndicator {
    tx: Arc<watch::Sender<ConnectionStatus>>,
    bus: EventBus,
}

impl StatusIndicator {
    pub fn new(initial: ConnectionStatus, bus: EventBus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx: Arc::new(tx),
            bus,
        }
    }

    pub fn current(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    /// Update the status, publishing `StatusChanged` if it differs
    pub fn set(&self, status: ConnectionStatus) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(%status, "Sync status");
            self.bus.publish(&SyncEvent::StatusChanged(status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::sync::Mutex;

    #[test]
    fn test_for_queue() {
        assert_eq!(ConnectionStatus::for_queue(0), ConnectionStatus::Online);
        assert_eq!(
            ConnectionStatus::for_queue(3),
            ConnectionStatus::Syncing { pending: 3 }
        );
    }

    #[test]
    fn test_set_publishes_changes_once() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(EventKind::StatusChanged, move |event| {
            if let SyncEvent::StatusChanged(status) = event {
                sink.lock().unwrap().push(*status);
            }
        });

        let indicator = StatusIndicator::new(ConnectionStatus::Offline, bus);
        indicator.set(ConnectionStatus::Offline);
        indicator.set(ConnectionStatus::Syncing { pending: 2 });
        indicator.set(ConnectionStatus::Syncing { pending: 2 });
        indicator.set(ConnectionStatus::Online);

        assert_eq!(indicator.current(), ConnectionStatus::Online);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectionStatus::Syncing { pending: 2 },
                ConnectionStatus::Online
            ]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ConnectionStatus::Syncing { pending: 4 }.to_string(),
            "syncing (4 pending)"
        );
        assert_eq!(ConnectionStatus::AuthRequired.to_string(), "auth required");
    }
}
