//! Connectivity state
//!
//! `Connectivity` is a cloneable handle over a watch channel holding the
//! current online state. The realtime channel and the reachability probe
//! write to it; the sync manager reads it synchronously and reacts to its
//! transitions.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Shared online/offline state
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Current online state
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a new state; listeners are only woken on an actual transition
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
            info!("Connectivity: {}", if online { "connected" } else { "disconnected" });
        }
    }

    /// Watch transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Periodically probe `url` and record whether it answered
///
/// Any HTTP response counts as reachable; only transport failures count
/// as offline.
pub fn spawn_reachability_probe(
    connectivity: Connectivity,
    url: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let reachable = client
                .get(&url)
                .timeout(interval)
                .send()
                .await
                .is_ok();
            debug!("Reachability probe {} -> {}", url, reachable);
            connectivity.set_online(reachable);
        }
    })
}
