//! Concurrent record store.
//!
//! Owns the three shared maps (users, tables, config singleton) behind
//! `parking_lot` locks, safe for the request handlers and both
//! background timers. Persistence is asynchronous and coalesced: each
//! blob has a single save latch, and a save requested while one is in
//! flight is dropped — the maps are the live source of truth, the files
//! exist for restart recovery, not audit history. Every self-initiated
//! config save flags the watcher to skip its next reload check.

pub mod storage;
pub mod watcher;

use crate::config::Config;
use crate::model::{HeightPreset, NewUser, Table, User, UserPreferences};
use anyhow::{Context, Result};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::BlobStorage;
use tracing::{debug, info, warn};

/// Built-in default administrator, seeded when no users exist after load.
pub const GUEST_USER_ID: &str = "guest";
pub const GUEST_PASSWORD: &str = "1234";

/// The three persisted blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blob {
    Users,
    Tables,
    Config,
}

impl Blob {
    pub fn name(self) -> &'static str {
        match self {
            Self::Users => "users.json",
            Self::Tables => "tables.json",
            Self::Config => "config.json",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Users => 0,
            Self::Tables => 1,
            Self::Config => 2,
        }
    }
}

pub struct Store {
    users: RwLock<HashMap<String, User>>,
    tables: RwLock<HashMap<String, Table>>,
    config: RwLock<Config>,
    storage: Box<dyn BlobStorage>,
    /// Per-blob "save in flight" latches, indexed by [`Blob::index`].
    saving: [AtomicBool; 3],
    /// Set by a self-initiated config save; the watcher clears it on its
    /// next tick instead of reloading.
    config_just_saved: AtomicBool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Load all three blobs from storage, defaulting each missing one,
    /// and seed the guest administrator if no users exist.
    pub fn load(storage: impl BlobStorage) -> Result<Arc<Self>> {
        let users: HashMap<String, User> = load_blob(&storage, Blob::Users)?.unwrap_or_default();
        let tables: HashMap<String, Table> =
            load_blob(&storage, Blob::Tables)?.unwrap_or_default();
        let config: Config = load_blob(&storage, Blob::Config)?.unwrap_or_default();

        let store = Arc::new(Self {
            users: RwLock::new(users),
            tables: RwLock::new(tables),
            config: RwLock::new(config),
            storage: Box::new(storage),
            saving: [AtomicBool::new(false), AtomicBool::new(false), AtomicBool::new(false)],
            config_just_saved: AtomicBool::new(false),
        });

        if store.users.read().is_empty() {
            store.insert_user(GUEST_USER_ID, guest_user());
            info!("no users on disk, seeded default '{GUEST_USER_ID}' administrator");
        }
        info!("state loaded or initialized");
        Ok(store)
    }

    pub fn storage(&self) -> &dyn BlobStorage {
        &*self.storage
    }

    // ── Users ────────────────────────────────────────────────────

    pub fn get_user(&self, id: &str) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    pub fn insert_user(&self, id: &str, user: User) {
        self.users.write().insert(id.to_string(), user);
    }

    /// Mutate one user in place; returns false when the id is unknown.
    pub fn with_user_mut(&self, id: &str, f: impl FnOnce(&mut User)) -> bool {
        match self.users.write().get_mut(id) {
            Some(user) => {
                f(user);
                true
            }
            None => false,
        }
    }

    /// Write access to the whole user map, for guarded multi-key
    /// check-then-act operations (last-administrator re-checks).
    pub fn users_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, User>> {
        self.users.write()
    }

    pub fn users_snapshot(&self) -> Vec<(String, User)> {
        self.users
            .read()
            .iter()
            .map(|(id, user)| (id.clone(), user.clone()))
            .collect()
    }

    // ── Tables ───────────────────────────────────────────────────

    pub fn get_table(&self, id: &str) -> Option<Table> {
        self.tables.read().get(id).cloned()
    }

    pub fn insert_table(&self, id: &str, table: Table) {
        self.tables.write().insert(id.to_string(), table);
    }

    pub fn remove_table(&self, id: &str) -> Option<Table> {
        self.tables.write().remove(id)
    }

    /// Mutate one table in place; returns false when the id is unknown.
    pub fn with_table_mut(&self, id: &str, f: impl FnOnce(&mut Table)) -> bool {
        match self.tables.write().get_mut(id) {
            Some(table) => {
                f(table);
                true
            }
            None => false,
        }
    }

    pub fn tables_snapshot(&self) -> Vec<(String, Table)> {
        self.tables
            .read()
            .iter()
            .map(|(id, table)| (id.clone(), table.clone()))
            .collect()
    }

    // ── Config ───────────────────────────────────────────────────

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn update_config(&self, f: impl FnOnce(&mut Config)) {
        f(&mut self.config.write());
    }

    /// Swap in an externally reloaded config.
    pub fn replace_config(&self, config: Config) {
        *self.config.write() = config;
    }

    /// Consume the self-save suppression flag.
    pub fn take_config_just_saved(&self) -> bool {
        self.config_just_saved.swap(false, Ordering::AcqRel)
    }

    // ── Persistence ──────────────────────────────────────────────

    /// Request an asynchronous save of one blob. Coalesced: while a
    /// save for the same blob is in flight the request is dropped, so a
    /// burst of writes persists as a single snapshot taken at flush
    /// time.
    pub fn request_save(self: &Arc<Self>, blob: Blob) {
        if !self.try_begin_save(blob) {
            debug!(blob = blob.name(), "save already in flight, request dropped");
            return;
        }
        let store = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || store.flush(blob));
            }
            // No runtime (tests, shutdown path): save inline.
            Err(_) => self.flush(blob),
        }
    }

    /// Synchronously persist all three blobs. Used at startup and
    /// shutdown; bypasses the latches.
    pub fn save_all_blocking(&self) {
        for blob in [Blob::Users, Blob::Tables, Blob::Config] {
            if let Err(e) = self.write_blob(blob) {
                warn!(blob = blob.name(), error = %e, "blocking save failed");
            }
        }
    }

    fn try_begin_save(&self, blob: Blob) -> bool {
        self.saving[blob.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish_save(&self, blob: Blob) {
        self.saving[blob.index()].store(false, Ordering::Release);
    }

    fn flush(&self, blob: Blob) {
        let result = self.write_blob(blob);
        self.finish_save(blob);
        match result {
            Ok(()) => info!(blob = blob.name(), "saved"),
            Err(e) => warn!(blob = blob.name(), error = %e, "save failed"),
        }
    }

    fn write_blob(&self, blob: Blob) -> Result<()> {
        let bytes = match blob {
            Blob::Users => serde_json::to_vec_pretty(&*self.users.read()),
            Blob::Tables => serde_json::to_vec_pretty(&*self.tables.read()),
            Blob::Config => serde_json::to_vec_pretty(&*self.config.read()),
        }
        .with_context(|| format!("Failed to serialize {}", blob.name()))?;
        self.storage.save(blob.name(), &bytes)?;
        if blob == Blob::Config {
            self.config_just_saved.store(true, Ordering::Release);
        }
        Ok(())
    }
}

fn load_blob<T: serde::de::DeserializeOwned>(
    storage: &impl BlobStorage,
    blob: Blob,
) -> Result<Option<T>> {
    match storage.load(blob.name())? {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse {}", blob.name()))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// The built-in guest administrator. Self-deletion is denied so the
/// account cannot orphan the system before a replacement admin exists.
fn guest_user() -> User {
    NewUser {
        password: GUEST_PASSWORD.into(),
        alias: None,
        administrator: true,
        allowed_personalization: true,
        allowed_self_deletion: false,
        preferences: Some(UserPreferences {
            name: "Guest".into(),
            height_presets: vec![
                HeightPreset { value: 1.0, unit: "%".into(), name: None },
                HeightPreset { value: 1.5, unit: "m".into(), name: None },
            ],
        }),
    }
    .into()
}

#[cfg(test)]
pub mod tests {
    use super::storage::MemStorage;
    use super::*;
    use crate::model::{ConnectionMode, TableData};

    pub fn memory_store() -> Arc<Store> {
        Store::load(MemStorage::new()).unwrap()
    }

    fn sample_table() -> Table {
        Table::new(TableData::new(
            "00:11:22:33:44:55",
            ConnectionMode::Manual,
            "Linak",
            0.7,
            1.2,
            "Desk 1",
        ))
    }

    #[test]
    fn empty_storage_seeds_guest_admin() {
        let store = memory_store();
        let guest = store.get_user(GUEST_USER_ID).unwrap();
        assert!(guest.administrator);
        assert!(!guest.allowed_self_deletion);
        assert_eq!(guest.preferences.as_ref().unwrap().height_presets.len(), 2);
    }

    #[test]
    fn existing_users_suppress_seeding() {
        let storage = MemStorage::new();
        let mut users = HashMap::new();
        users.insert("only".to_string(), guest_user());
        storage
            .save(Blob::Users.name(), &serde_json::to_vec(&users).unwrap())
            .unwrap();
        let reloaded = Store::load(storage).unwrap();
        assert!(reloaded.get_user("only").is_some());
        assert!(reloaded.get_user(GUEST_USER_ID).is_none());
    }

    #[test]
    fn save_and_reload_round_trips_records() {
        let store = memory_store();
        store.insert_table("t1", sample_table());
        store.update_config(|c| c.guest_warning = false);
        store.save_all_blocking();

        // Rebuild a store over the serialized snapshots.
        let users_bytes = store.storage().load(Blob::Users.name()).unwrap().unwrap();
        let tables_bytes = store.storage().load(Blob::Tables.name()).unwrap().unwrap();
        let config_bytes = store.storage().load(Blob::Config.name()).unwrap().unwrap();

        let fresh = MemStorage::new();
        fresh.save(Blob::Users.name(), &users_bytes).unwrap();
        fresh.save(Blob::Tables.name(), &tables_bytes).unwrap();
        fresh.save(Blob::Config.name(), &config_bytes).unwrap();

        let reloaded = Store::load(fresh).unwrap();
        let table = reloaded.get_table("t1").unwrap();
        assert_eq!(table.data.mac_address, "00:11:22:33:44:55");
        assert!(!reloaded.config().guest_warning);
        assert!(reloaded.get_user(GUEST_USER_ID).is_some());
    }

    #[test]
    fn height_precision_survives_persistence() {
        let store = memory_store();
        let mut table = sample_table();
        table.data.set_height(0.853);
        store.insert_table("t1", table);
        store.save_all_blocking();

        let bytes = store.storage().load(Blob::Tables.name()).unwrap().unwrap();
        let map: HashMap<String, Table> = serde_json::from_slice(&bytes).unwrap();
        // Millimeter-resolution round-trip must be lossless.
        assert!((map["t1"].data.height() - 0.853).abs() < 1e-9);
    }

    #[test]
    fn save_latch_coalesces_concurrent_requests() {
        let store = memory_store();
        assert!(store.try_begin_save(Blob::Users));
        // Second request while in flight is dropped.
        assert!(!store.try_begin_save(Blob::Users));
        // Other blobs latch independently.
        assert!(store.try_begin_save(Blob::Tables));
        store.finish_save(Blob::Users);
        assert!(store.try_begin_save(Blob::Users));
    }

    #[test]
    fn config_save_sets_suppression_flag() {
        let store = memory_store();
        assert!(!store.take_config_just_saved());
        store.write_blob(Blob::Config).unwrap();
        assert!(store.take_config_just_saved());
        // Consumed.
        assert!(!store.take_config_just_saved());
    }

    #[test]
    fn with_table_mut_reports_unknown_ids() {
        let store = memory_store();
        assert!(!store.with_table_mut("missing", |_| {}));
        store.insert_table("t1", sample_table());
        assert!(store.with_table_mut("t1", |t| t.data.set_height(1.0)));
        assert_eq!(store.get_table("t1").unwrap().data.height(), 1.0);
    }

    #[test]
    fn corrupt_blob_fails_load_with_context() {
        let storage = MemStorage::new();
        storage.save(Blob::Users.name(), b"not json").unwrap();
        let err = Store::load(storage).unwrap_err();
        assert!(err.to_string().contains("users.json"));
    }
}
