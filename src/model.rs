//! Domain records: user accounts and tables.
//!
//! The store owns every record here. Passwords never persist in
//! recoverable form: a [`User`] carries only the hex SHA-256 of
//! `password + creation_date`, with the creation date acting as the
//! immutable per-account salt. Table heights are clamped into
//! `[min_height, max_height]` on every read and every write, so a
//! height outside the bounds is never observable, even transiently.

use crate::auth::code;
use rand::TryRng;
use serde::{Deserialize, Serialize};

/// Byte length of a table's base secret before hex encoding.
const BASE_CODE_BYTES: usize = 16;

// ── User accounts ────────────────────────────────────────────────

/// One height preset in a user's preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeightPreset {
    pub value: f64,
    /// Unit tag, e.g. `"m"` or `"%"`.
    pub unit: String,
    /// Optional display label.
    #[serde(default)]
    pub name: Option<String>,
}

/// Per-user personalization: display name plus ordered height presets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPreferences {
    pub name: String,
    #[serde(default)]
    pub height_presets: Vec<HeightPreset>,
}

/// A stored user account.
///
/// An account is either a terminal principal or an alias. An aliasing
/// account carries no preferences and no role flags of its own; those
/// are inherited from the resolved terminal account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Hex SHA-256 of `password + creation_date`.
    pub password_hashed: String,
    /// ISO-8601 UTC creation timestamp; doubles as the password salt.
    pub creation_date: String,
    /// When set, this account is a redirect to another account id.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub administrator: bool,
    #[serde(default = "default_true")]
    pub allowed_personalization: bool,
    #[serde(default = "default_true")]
    pub allowed_self_deletion: bool,
    pub preferences: Option<UserPreferences>,
}

impl User {
    /// Whether this record redirects to another account.
    pub fn is_alias(&self) -> bool {
        self.alias.is_some()
    }
}

/// Inbound account shape carrying a plain password.
///
/// Converting to [`User`] hashes the password with a fresh creation
/// date. An aliasing `NewUser` converts to a bare redirect record:
/// no preferences, default role flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub password: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub administrator: bool,
    #[serde(default = "default_true")]
    pub allowed_personalization: bool,
    #[serde(default = "default_true")]
    pub allowed_self_deletion: bool,
    #[serde(default)]
    pub preferences: Option<UserPreferences>,
}

impl From<NewUser> for User {
    fn from(new: NewUser) -> Self {
        let creation_date = code::creation_date_now();
        let password_hashed = code::digest_password(&new.password, &creation_date);

        if let Some(alias) = new.alias {
            return User {
                password_hashed,
                creation_date,
                alias: Some(alias),
                administrator: false,
                allowed_personalization: true,
                allowed_self_deletion: true,
                preferences: None,
            };
        }

        User {
            password_hashed,
            creation_date,
            alias: None,
            administrator: new.administrator,
            allowed_personalization: new.allowed_personalization,
            allowed_self_deletion: new.allowed_self_deletion,
            preferences: new.preferences,
        }
    }
}

fn default_true() -> bool {
    true
}

// ── Tables ───────────────────────────────────────────────────────

/// How a table is reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Hand crank or panel only; the service never talks to it.
    Manual,
    /// Reached over a local bluetooth bridge.
    Bluetooth,
    /// Reached through an external HTTP API; synced by the engine.
    Api,
}

/// External API target for an `api`-mode table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSpec {
    pub url: String,
    pub key: String,
    /// Adapter tag (e.g. `"kr64"`); unknown tags fall back to no-op.
    pub kind: String,
}

/// Mutable table state and device descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableData {
    pub mac_address: String,
    pub connection_mode: ConnectionMode,
    pub manufacturer: String,
    pub min_height: f64,
    pub max_height: f64,
    pub name: String,
    /// Raw stored height; read through [`TableData::height`] which clamps.
    #[serde(default)]
    current_height: f64,
    #[serde(default = "default_icon")]
    pub icon: String,
    /// Present only for `api`-mode tables.
    #[serde(default)]
    pub api: Option<ApiSpec>,
    /// Pending client write not yet pushed to hardware. Owned by the
    /// sync engine once set; never persisted.
    #[serde(skip)]
    pub locally_modified: bool,
}

impl TableData {
    pub fn new(
        mac_address: impl Into<String>,
        connection_mode: ConnectionMode,
        manufacturer: impl Into<String>,
        min_height: f64,
        max_height: f64,
        name: impl Into<String>,
    ) -> Self {
        Self {
            mac_address: mac_address.into(),
            connection_mode,
            manufacturer: manufacturer.into(),
            min_height,
            max_height,
            name: name.into(),
            current_height: min_height,
            icon: default_icon(),
            api: None,
            locally_modified: false,
        }
    }

    /// Current height in meters, clamped into `[min_height, max_height]`.
    pub fn height(&self) -> f64 {
        self.current_height.clamp(self.min_height, self.max_height)
    }

    /// Write a new height, clamped into bounds.
    pub fn set_height(&mut self, height_m: f64) {
        self.current_height = height_m.clamp(self.min_height, self.max_height);
    }

    /// Height as a fraction of the table's travel range (0..=1).
    pub fn height_fraction(&self) -> f64 {
        let range = self.max_height - self.min_height;
        if range <= 0.0 {
            return 0.0;
        }
        (self.height() - self.min_height) / range
    }

    /// Write a height given as a fraction of the travel range.
    pub fn set_height_fraction(&mut self, fraction: f64) {
        self.set_height(self.min_height + fraction * (self.max_height - self.min_height));
    }
}

/// A stored table: opaque base secret plus device data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Random token generated at creation; never exposed by any route.
    /// Daily table access codes derive from it.
    pub base_access_code: String,
    pub data: TableData,
}

impl Table {
    pub fn new(data: TableData) -> Self {
        Self {
            base_access_code: generate_base_code(),
            data,
        }
    }
}

/// Inbound table shape; the base secret is generated server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTable {
    pub data: TableData,
}

impl From<NewTable> for Table {
    fn from(new: NewTable) -> Self {
        Table::new(new.data)
    }
}

fn default_icon() -> String {
    "table".to_string()
}

/// Generate a random table base secret (hex-encoded).
fn generate_base_code() -> String {
    let mut bytes = [0u8; BASE_CODE_BYTES];
    rand::rngs::SysRng
        .try_fill_bytes(&mut bytes)
        .expect("system RNG failure");
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_data() -> TableData {
        TableData::new("00:11:22:33:44:55", ConnectionMode::Bluetooth, "Linak", 0.7, 1.2, "Desk 1")
    }

    #[test]
    fn height_clamps_on_write() {
        let mut data = table_data();
        data.set_height(2.0);
        assert_eq!(data.height(), 1.2);
        data.set_height(0.1);
        assert_eq!(data.height(), 0.7);
        data.set_height(0.95);
        assert_eq!(data.height(), 0.95);
    }

    #[test]
    fn height_clamps_on_read_after_bound_change() {
        let mut data = table_data();
        data.set_height(1.2);
        data.max_height = 1.0;
        assert_eq!(data.height(), 1.0);
    }

    #[test]
    fn fraction_round_trips_within_bounds() {
        let mut data = table_data();
        data.set_height_fraction(0.5);
        assert!((data.height() - 0.95).abs() < 1e-9);
        assert!((data.height_fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn new_table_starts_at_min_height() {
        let data = table_data();
        assert_eq!(data.height(), 0.7);
        assert!(!data.locally_modified);
    }

    #[test]
    fn base_codes_are_unique() {
        let a = Table::new(table_data());
        let b = Table::new(table_data());
        assert_ne!(a.base_access_code, b.base_access_code);
        assert_eq!(a.base_access_code.len(), BASE_CODE_BYTES * 2);
    }

    #[test]
    fn aliasing_new_user_drops_preferences_and_roles() {
        let new = NewUser {
            password: "pw".into(),
            alias: Some("target".into()),
            administrator: true,
            allowed_personalization: false,
            allowed_self_deletion: false,
            preferences: Some(UserPreferences {
                name: "X".into(),
                height_presets: vec![],
            }),
        };
        let user: User = new.into();
        assert_eq!(user.alias.as_deref(), Some("target"));
        assert!(!user.administrator);
        assert!(user.allowed_personalization);
        assert!(user.preferences.is_none());
    }

    #[test]
    fn locally_modified_is_not_persisted() {
        let mut table = Table::new(table_data());
        table.data.locally_modified = true;
        let json = serde_json::to_string(&table).unwrap();
        let back: Table = serde_json::from_str(&json).unwrap();
        assert!(!back.data.locally_modified);
        assert_eq!(back.base_access_code, table.base_access_code);
    }

    #[test]
    fn connection_mode_uses_lowercase_tags() {
        assert_eq!(serde_json::to_string(&ConnectionMode::Api).unwrap(), "\"api\"");
        let mode: ConnectionMode = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(mode, ConnectionMode::Manual);
    }
}
