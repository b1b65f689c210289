//! Desk adapter capability boundary.
//!
//! The sync engine is written against this trait; concrete adapters are
//! selected by the table's configured adapter tag. Unknown tags fall
//! back to the no-op adapter rather than failing, so a typo in a config
//! file degrades to "not synced" instead of a dead poll loop.

use crate::model::ApiSpec;
use crate::sync::kr64::Kr64Adapter;
use crate::sync::noop::NoopAdapter;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// One polled snapshot of a physical desk.
#[derive(Debug, Clone, PartialEq)]
pub struct DeskState {
    pub height_m: f64,
    /// True while the actuator is mid-motion; a moving desk's reported
    /// position is transitional and must not overwrite local state.
    pub moving: bool,
}

/// Descriptor returned by a device lookup during import.
#[derive(Debug, Clone)]
pub struct DeskInfo {
    pub name: String,
    pub manufacturer: String,
    pub state: DeskState,
}

#[async_trait]
pub trait DeskAdapter: Send + Sync {
    /// Read the device's current reported state.
    async fn poll(&self, api: &ApiSpec, mac: &str) -> Result<DeskState>;

    /// Push a target height to the device.
    async fn push(&self, api: &ApiSpec, mac: &str, height_m: f64) -> Result<()>;

    /// List every discoverable device address on the external system.
    async fn discover(&self, api: &ApiSpec) -> Result<Vec<String>>;

    /// Fetch one device's descriptor and current state.
    async fn describe(&self, api: &ApiSpec, mac: &str) -> Result<DeskInfo>;
}

/// Select an adapter by tag. Closed set; anything unrecognized is no-op.
pub fn adapter_for(kind: &str) -> Arc<dyn DeskAdapter> {
    match kind.to_ascii_lowercase().as_str() {
        "kr64" => Arc::new(Kr64Adapter::new()),
        "dummy" | "" => Arc::new(NoopAdapter),
        other => {
            debug!(kind = other, "unknown adapter tag, using no-op");
            Arc::new(NoopAdapter)
        }
    }
}
