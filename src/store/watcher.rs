//! Config hot-reload watcher.
//!
//! A periodic task compares the config blob's modification time against
//! the reload window and swaps in a freshly parsed config when the file
//! was edited externally. The store's own saves would look exactly like
//! external edits, so every self-initiated save raises a suppression
//! flag that the watcher consumes on its next tick instead of
//! reloading. A reload may change the period itself, in which case the
//! watcher restarts under the new one. Parse failures keep the previous
//! in-memory config.

use crate::config::Config;
use crate::store::{Blob, Store};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Slack added to the reload window when comparing file mtimes, so an
/// edit landing right on the period boundary is not missed.
const MTIME_SLACK: Duration = Duration::from_millis(10);

#[derive(Default)]
pub struct ConfigWatcher {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigWatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tear down the current watcher task (if any) and start a new one
    /// under the store's current reload period. A `None` period leaves
    /// hot reload disabled.
    pub fn restart(self: &Arc<Self>, store: &Arc<Store>) {
        let mut handle = self.handle.lock();
        if let Some(old) = handle.take() {
            old.abort();
        }

        let Some(period) = store.config().reload_period() else {
            info!("config hot reload disabled");
            return;
        };

        let watcher = Arc::clone(self);
        let store = Arc::clone(store);
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // An interval's first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if store.take_config_just_saved() {
                    continue;
                }
                if !recently_modified(&store, period) {
                    continue;
                }
                match reload(&store) {
                    Ok(()) => {
                        info!("reloaded config from disk");
                        // The period may have changed; rebuild the timer.
                        watcher.restart(&store);
                        return;
                    }
                    Err(e) => warn!(error = %e, "config was invalid on reload, keeping previous"),
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(old) = self.handle.lock().take() {
            old.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

/// Whether the config blob was written within the last reload window.
fn recently_modified(store: &Store, period: Duration) -> bool {
    let Some(mtime) = store.storage().modified(Blob::Config.name()) else {
        return false;
    };
    match mtime.elapsed() {
        Ok(age) => age <= period + MTIME_SLACK,
        // Clock skew put the mtime in the future; treat as fresh.
        Err(_) => true,
    }
}

fn reload(store: &Store) -> Result<()> {
    let bytes = store
        .storage()
        .load(Blob::Config.name())?
        .context("config blob disappeared")?;
    let config: Config = serde_json::from_slice(&bytes).context("Failed to parse config.json")?;
    store.replace_config(config);
    Ok(())
}
