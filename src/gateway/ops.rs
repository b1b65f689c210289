//! Command dispatch.
//!
//! The transport hands this layer an actor id, a submitted access code
//! or password, a command tag, and an optional body; it gets back a
//! [`Reply`] (text or structured JSON) or a [`RequestError`] carrying
//! the status classification. Everything stateful happens in the store,
//! the auth layer, and the sync engine — this file is dispatch.

use crate::auth::{self, code};
use crate::config::Config;
use crate::error::RequestError;
use crate::model::{NewTable, NewUser, Table, UserPreferences};
use crate::store::{Blob, Store, GUEST_USER_ID};
use crate::sync::{adapter_for, engine};
use crate::gateway::AppState;
use chrono::Utc;
use serde_json::json;

/// Body returned to the transport for serialization.
#[derive(Debug, PartialEq)]
pub enum Reply {
    Text(String),
    Json(serde_json::Value),
}

impl Reply {
    fn text(value: impl ToString) -> Self {
        Self::Text(value.to_string())
    }

    fn json<T: serde::Serialize>(value: &T) -> Result<Self, RequestError> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| RequestError::bad_request(format!("Failed to encode reply: {e}")))
    }
}

// ── User commands ────────────────────────────────────────────────

/// `GET /user/{id}/{password}` — login, resolving any alias chain.
pub fn login(state: &AppState, id: &str, password: &str) -> Result<Reply, RequestError> {
    let reply = auth::login(&state.store, id, password)?;
    Reply::json(&reply)
}

/// `GET /user/{id}/{code}/{command}`
pub fn user_get(state: &AppState, id: &str, code: &str, command: &str) -> Result<Reply, RequestError> {
    let user = auth::validate_user(&state.store, id, code)?;
    let config = state.store.config();

    match command {
        "get_preferences" => Reply::json(&user.preferences),

        "get_personalization_state" => {
            Ok(Reply::text(config.user_personalization && user.allowed_personalization))
        }

        "get_self_deletion_state" => Ok(Reply::text(user.allowed_self_deletion)),

        "get_tables" => {
            let today = Utc::now().date_naive();
            let tables: Vec<_> = state
                .store
                .tables_snapshot()
                .into_iter()
                .map(|(table_id, table)| {
                    json!({
                        "id": table_id,
                        "access_code": code::derive(&table.base_access_code, today),
                        "data": table.data,
                    })
                })
                .collect();
            Ok(Reply::Json(json!(tables)))
        }

        "delete_user" => {
            if !config.user_self_deletion {
                return Err(RequestError::rejected("User self deletion is disabled"));
            }
            if !user.allowed_self_deletion {
                return Err(RequestError::rejected("Self deletion is disabled for this user"));
            }
            let removed = auth::delete_user_guarded(&state.store, id)?;
            Reply::json(&removed.preferences)
        }

        _ => Err(RequestError::bad_request("Unknown command")),
    }
}

/// `POST /user/{id}/{code}/{command}`
pub fn user_post(
    state: &AppState,
    id: &str,
    code: &str,
    command: &str,
    body: &str,
) -> Result<Reply, RequestError> {
    let user = auth::validate_user(&state.store, id, code)?;
    let config = state.store.config();

    match command {
        "set_preferences" => {
            if !config.user_personalization || !user.allowed_personalization {
                return Err(RequestError::rejected("User personalization is disabled"));
            }
            let preferences: UserPreferences = serde_json::from_str(body).map_err(|_| {
                RequestError::bad_request(format!(
                    "Invalid user preferences:\n{body}\nCorrect format:\n{}",
                    sample_preferences_json()
                ))
            })?;
            state.store.with_user_mut(id, |u| u.preferences = Some(preferences.clone()));
            state.store.request_save(Blob::Users);
            Reply::json(&preferences)
        }

        _ => Err(RequestError::bad_request("Unknown command")),
    }
}

// ── Table commands ───────────────────────────────────────────────

/// `GET /table/{id}/{code}/{command}`
pub fn table_get(state: &AppState, id: &str, code: &str, command: &str) -> Result<Reply, RequestError> {
    let table = auth::validate_table(&state.store, id, code)?;

    match command {
        // The base secret is never exposed; only the data block is.
        "get_data" => Reply::json(&table.data),
        _ => Err(RequestError::bad_request("Unknown command")),
    }
}

/// `POST /table/{id}/{code}/{command}`
pub fn table_post(
    state: &AppState,
    id: &str,
    code: &str,
    command: &str,
    body: &str,
) -> Result<Reply, RequestError> {
    auth::validate_table(&state.store, id, code)?;

    match command {
        "set_height" => {
            let height: f64 = parse_number(
                body,
                "Invalid table height, should be a number in meters",
            )?;
            let mut applied = 0.0;
            state.store.with_table_mut(id, |t| {
                t.data.set_height(height);
                t.data.locally_modified = true;
                applied = t.data.height();
            });
            state.store.request_save(Blob::Tables);
            Ok(Reply::Json(json!(applied)))
        }

        "set_height_percentage" => {
            let fraction: f64 = parse_number(
                body,
                "Invalid table height percentage, should be a number between 0 and 1",
            )?;
            if !(0.0..=1.0).contains(&fraction) {
                return Err(RequestError::bad_request(
                    "Invalid table height percentage, should be a number between 0 and 1",
                ));
            }
            let mut applied = 0.0;
            state.store.with_table_mut(id, |t| {
                t.data.set_height_fraction(fraction);
                t.data.locally_modified = true;
                applied = t.data.height_fraction();
            });
            state.store.request_save(Blob::Tables);
            Ok(Reply::Json(json!(applied)))
        }

        _ => Err(RequestError::bad_request("Unknown command")),
    }
}

// ── Admin commands ───────────────────────────────────────────────

/// `GET /admin/{id}/{code}` — report whether the caller is an admin.
pub fn admin_check(state: &AppState, id: &str, code: &str) -> Result<Reply, RequestError> {
    let user = auth::validate_user(&state.store, id, code)?;
    Ok(Reply::text(user.administrator))
}

/// `GET /admin/{id}/{code}/{command}`
pub async fn admin_get(
    state: &AppState,
    id: &str,
    code: &str,
    command: &str,
) -> Result<Reply, RequestError> {
    auth::validate_admin(&state.store, id, code)?;

    match command {
        "get_users" => {
            let users: Vec<_> = state
                .store
                .users_snapshot()
                .into_iter()
                .map(|(user_id, user)| json!({ "id": user_id, "preferences": user.preferences }))
                .collect();
            Ok(Reply::Json(json!(users)))
        }

        "import_external_api_tables" => {
            let config = state.store.config();
            let api = config_api_spec(&config)?;
            let adapter = adapter_for(&api.kind);
            match engine::import(&state.store, adapter.as_ref(), &api).await {
                Ok(report) if report.ok() => {
                    Ok(Reply::text(format!("Imported {} tables successfully", report.imported)))
                }
                Ok(report) => Err(RequestError::bad_request(format!(
                    "Imported {} tables, {} failed",
                    report.imported, report.failed
                ))),
                Err(_) => Err(RequestError::bad_request("Could not import external api tables")),
            }
        }

        "disable_guest_warning" => {
            set_config(state, |c| c.guest_warning = false);
            Ok(Reply::text("Warning disabled"))
        }

        "enable_user_self_deletion" => {
            set_config(state, |c| c.user_self_deletion = true);
            Ok(Reply::text("User self deletion enabled"))
        }

        "disable_user_self_deletion" => {
            set_config(state, |c| c.user_self_deletion = false);
            Ok(Reply::text("User self deletion disabled"))
        }

        "enable_user_personalization" => {
            set_config(state, |c| c.user_personalization = true);
            Ok(Reply::text("User personalization enabled"))
        }

        "disable_user_personalization" => {
            set_config(state, |c| c.user_personalization = false);
            Ok(Reply::text("User personalization disabled"))
        }

        _ => Err(RequestError::bad_request("Unknown command")),
    }
}

/// `GET /admin/{id}/{code}/{command}/{value}`
pub fn admin_get_with_value(
    state: &AppState,
    id: &str,
    code: &str,
    command: &str,
    value: &str,
) -> Result<Reply, RequestError> {
    auth::validate_admin(&state.store, id, code)?;

    match command {
        "delete_user" => {
            auth::delete_user_guarded(&state.store, value)?;
            if value == GUEST_USER_ID {
                // The warning advertises guest credentials that no
                // longer work.
                set_config(state, |c| c.guest_warning = false);
            }
            Ok(Reply::text(format!("Deleted user {value}")))
        }

        "delete_table" => {
            if state.store.remove_table(value).is_none() {
                return Err(RequestError::bad_request("Table does not exist"));
            }
            state.store.request_save(Blob::Tables);
            Ok(Reply::text(format!("Deleted table {value}")))
        }

        "enable_user_personalization" => {
            set_user_personalization(state, value, true)?;
            Ok(Reply::text(format!("User personalization enabled for {value}")))
        }

        "disable_user_personalization" => {
            set_user_personalization(state, value, false)?;
            Ok(Reply::text(format!("User personalization disabled for {value}")))
        }

        _ => Err(RequestError::bad_request("Unknown command")),
    }
}

/// `POST /admin/{id}/{code}/{command}`
pub fn admin_post(
    state: &AppState,
    id: &str,
    code: &str,
    command: &str,
    body: &str,
) -> Result<Reply, RequestError> {
    auth::validate_admin(&state.store, id, code)?;

    match command {
        "set_config_reload_seconds" => {
            let period = parse_optional_seconds(
                body,
                "Invalid config reload time, should be a number in seconds, or null to disable reloading",
            )?;
            set_config(state, |c| c.config_reload_seconds = period);
            state.watcher.restart(&state.store);
            Ok(Reply::text(display_optional(period)))
        }

        "set_external_api_url" => {
            let url = reqwest::Url::parse(body.trim())
                .map_err(|_| RequestError::bad_request("Invalid api url"))?;
            set_config(state, |c| c.external_api_url = url.to_string());
            Ok(Reply::text(url))
        }

        "set_external_api_key" => {
            set_config(state, |c| c.external_api_key = body.trim().to_string());
            Ok(Reply::text(body.trim()))
        }

        "set_external_api_type" => {
            let kind = body.trim().to_string();
            set_config(state, |c| c.external_api_kind = kind.clone());
            state.engine.restart();
            Ok(Reply::text(kind))
        }

        "set_external_api_request_frequency_seconds" => {
            let period = parse_optional_seconds(
                body,
                "Invalid api request frequency, should be a number in seconds, or null to disable requests",
            )?;
            set_config(state, |c| c.external_api_poll_seconds = period);
            state.engine.restart();
            Ok(Reply::text(display_optional(period)))
        }

        _ => Err(RequestError::bad_request("Unknown command")),
    }
}

/// `POST /admin/{id}/{code}/{command}/{value}`
pub fn admin_post_with_value(
    state: &AppState,
    id: &str,
    code: &str,
    command: &str,
    value: &str,
    body: &str,
) -> Result<Reply, RequestError> {
    auth::validate_admin(&state.store, id, code)?;

    match command {
        "create_user" => {
            let new_user: NewUser = serde_json::from_str(body).map_err(|_| {
                RequestError::bad_request(format!(
                    "Invalid user:\n{body}\nCorrect format:\n{}",
                    sample_user_json()
                ))
            })?;
            auth::upsert_user_guarded(&state.store, value, new_user.clone().into())?;
            Reply::json(&new_user)
        }

        "create_table" => {
            let new_table: NewTable = serde_json::from_str(body).map_err(|_| {
                RequestError::bad_request(format!(
                    "Invalid table:\n{body}\nCorrect format:\n{}",
                    sample_table_json()
                ))
            })?;
            let data = &new_table.data;
            if !data.min_height.is_finite()
                || !data.max_height.is_finite()
                || data.min_height > data.max_height
            {
                return Err(RequestError::bad_request(
                    "Invalid table bounds, min_height must not exceed max_height",
                ));
            }
            let mut table: Table = new_table.clone().into();
            // A freshly created table's height is a pending local write.
            table.data.locally_modified = true;
            state.store.insert_table(value, table);
            state.store.request_save(Blob::Tables);
            Reply::json(&new_table)
        }

        _ => Err(RequestError::bad_request("Unknown command")),
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn set_config(state: &AppState, f: impl FnOnce(&mut Config)) {
    state.store.update_config(f);
    state.store.request_save(Blob::Config);
}

fn set_user_personalization(state: &AppState, id: &str, allowed: bool) -> Result<(), RequestError> {
    if !state.store.with_user_mut(id, |u| u.allowed_personalization = allowed) {
        return Err(RequestError::bad_request("User does not exist"));
    }
    state.store.request_save(Blob::Users);
    Ok(())
}

fn config_api_spec(config: &Config) -> Result<crate::model::ApiSpec, RequestError> {
    if config.external_api_url.is_empty() {
        return Err(RequestError::bad_request("External api url is not configured"));
    }
    Ok(crate::model::ApiSpec {
        url: config.external_api_url.clone(),
        key: config.external_api_key.clone(),
        kind: config.external_api_kind.clone(),
    })
}

fn parse_number(body: &str, message: &str) -> Result<f64, RequestError> {
    let value: f64 = body
        .trim()
        .parse()
        .map_err(|_| RequestError::bad_request(message))?;
    if !value.is_finite() {
        return Err(RequestError::bad_request(message));
    }
    Ok(value)
}

fn parse_optional_seconds(body: &str, message: &str) -> Result<Option<f64>, RequestError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    parse_number(trimmed, message).map(Some)
}

fn display_optional(period: Option<f64>) -> String {
    match period {
        Some(secs) => secs.to_string(),
        None => "null".to_string(),
    }
}

// Sample bodies embedded in error messages and the usage text.

pub fn sample_preferences_json() -> String {
    let sample = UserPreferences {
        name: "USER_NAME".into(),
        height_presets: vec![
            crate::model::HeightPreset { value: 1.0, unit: "%".into(), name: None },
            crate::model::HeightPreset { value: 1.5, unit: "m".into(), name: Some("standing".into()) },
        ],
    };
    serde_json::to_string_pretty(&sample).unwrap_or_default()
}

pub fn sample_user_json() -> String {
    let sample = NewUser {
        password: "NEW_USER_PASSWORD".into(),
        alias: None,
        administrator: true,
        allowed_personalization: true,
        allowed_self_deletion: true,
        preferences: Some(UserPreferences {
            name: "NEW_USER_NAME".into(),
            height_presets: vec![],
        }),
    };
    serde_json::to_string_pretty(&sample).unwrap_or_default()
}

pub fn sample_table_json() -> String {
    let sample = NewTable {
        data: crate::model::TableData::new(
            "00:11:22:33:44:55",
            crate::model::ConnectionMode::Bluetooth,
            "MANUFACTURER_NAME",
            1.0,
            1.5,
            "USER_FRIENDLY_NAME",
        ),
    };
    serde_json::to_string_pretty(&sample).unwrap_or_default()
}
