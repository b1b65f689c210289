//! Bidirectional device synchronization.

pub mod adapter;
pub mod engine;
pub mod kr64;
pub mod noop;

pub use adapter::{adapter_for, DeskAdapter, DeskInfo, DeskState};
pub use engine::{import, run_tick, DeviceSyncEngine, ImportReport};
