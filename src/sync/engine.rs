//! Device sync engine.
//!
//! Keeps each api-mode table's in-memory height consistent with its
//! physical actuator without fighting over authority: a pending local
//! write (the table's `locally_modified` flag) is pushed outward and
//! wins the tick; otherwise the device is polled and, only when it
//! reports being stationary, its position overwrites the local height.
//! A moving desk's position is transitional and is ignored for the
//! tick. All failures are logged and retried on the next tick — nothing
//! here propagates to request handlers or breaks the clamp invariant.

use crate::model::{ApiSpec, ConnectionMode, Table, TableData};
use crate::store::{Blob, Store};
use crate::sync::adapter::{adapter_for, DeskAdapter};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Fallback travel bounds for imported desks whose external system does
/// not report any (meters).
pub const DEFAULT_MIN_HEIGHT_M: f64 = 0.68;
pub const DEFAULT_MAX_HEIGHT_M: f64 = 1.32;

/// Outcome of a bulk device import.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
}

impl ImportReport {
    pub fn ok(&self) -> bool {
        self.failed == 0
    }
}

/// Periodic poller driving one sync pass per configured period.
pub struct DeviceSyncEngine {
    store: Arc<Store>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSyncEngine {
    pub fn new(store: Arc<Store>) -> Arc<Self> {
        Arc::new(Self {
            store,
            handle: Mutex::new(None),
        })
    }

    /// Tear down the current poll task (if any) and start a new one
    /// under the store's current poll period. `None` disables polling.
    pub fn restart(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if let Some(old) = handle.take() {
            old.abort();
        }

        let Some(period) = self.store.config().poll_period() else {
            info!("device polling disabled");
            return;
        };

        let store = Arc::clone(&self.store);
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                run_tick(&store).await;
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

/// One sync pass over every externally connected table.
pub async fn run_tick(store: &Arc<Store>) {
    for (id, table) in store.tables_snapshot() {
        if table.data.connection_mode != ConnectionMode::Api {
            continue;
        }
        let Some(api) = table.data.api.clone() else {
            continue;
        };
        let adapter = adapter_for(&api.kind);
        if let Err(e) = sync_one(store, adapter.as_ref(), &id).await {
            warn!(table = %id, error = %e, "sync pass failed, retrying next tick");
        }
    }
}

/// Reconcile one table against its device.
pub async fn sync_one(store: &Arc<Store>, adapter: &dyn DeskAdapter, id: &str) -> Result<()> {
    let Some(table) = store.get_table(id) else {
        return Ok(());
    };
    let Some(api) = table.data.api.clone() else {
        return Ok(());
    };

    if table.data.locally_modified {
        // Local intent wins this tick: clear the flag, push, and trust
        // the write rather than re-reading device state.
        store.with_table_mut(id, |t| t.data.locally_modified = false);
        adapter.push(&api, &table.data.mac_address, table.data.height()).await?;
    } else {
        let state = adapter.poll(&api, &table.data.mac_address).await?;
        if !state.moving {
            store.with_table_mut(id, |t| t.data.set_height(state.height_m));
        }
    }
    Ok(())
}

/// Import every discoverable device as a table record. Each device is
/// processed independently; one failing fetch does not abort the rest.
/// Only discovery failure aborts the whole import.
pub async fn import(
    store: &Arc<Store>,
    adapter: &dyn DeskAdapter,
    api: &ApiSpec,
) -> Result<ImportReport> {
    let macs = adapter.discover(api).await?;
    let mut report = ImportReport::default();

    for mac in macs {
        match adapter.describe(api, &mac).await {
            Ok(info) => {
                let mut data = TableData::new(
                    &mac,
                    ConnectionMode::Api,
                    info.manufacturer,
                    DEFAULT_MIN_HEIGHT_M,
                    DEFAULT_MAX_HEIGHT_M,
                    info.name,
                );
                data.set_height(info.state.height_m);
                data.api = Some(api.clone());
                store.insert_table(&mac, Table::new(data));
                report.imported += 1;
            }
            Err(e) => {
                warn!(mac = %mac, error = %e, "device import failed, continuing");
                report.failed += 1;
            }
        }
    }

    store.request_save(Blob::Tables);
    info!(imported = report.imported, failed = report.failed, "device import finished");
    Ok(report)
}
