//! Connectivity monitor
//!
//! A passthrough over the platform's reachability signal. Whatever observes
//! the network (the CLI, a platform hook, a test) calls
//! [`Connectivity::set_online`]; the sync engine, the realtime bridge and the
//! mutation layer read it or subscribe to transitions. No retry logic lives
//! here.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Shared online/offline flag with change notifications
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the current reachability; subscribers only wake on a transition
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
    }

    /// Subscribe to transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Wait until the flag reads online
    pub async fn wait_online(&self) {
        let mut rx = self.subscribe();
        // Only fails if the sender is dropped, which `self` prevents
        let _ = rx.wait_for(|online| *online).await;
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
