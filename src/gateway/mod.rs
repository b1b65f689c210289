//! Axum HTTP gateway.
//!
//! Thin dispatch glue: routes parse the id / access code / command path
//! segments, hand them to [`ops`], and serialize the [`ops::Reply`]
//! back out. Body limits and request timeouts are enforced by
//! tower-http layers. Nothing in here holds state beyond [`AppState`].

pub mod ops;

use crate::auth::code;
use crate::store::{Store, GUEST_PASSWORD, GUEST_USER_ID};
use crate::store::watcher::ConfigWatcher;
use crate::sync::DeviceSyncEngine;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB).
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout; covers slow external-device calls during import.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared handles the gateway needs: the store plus the two background
/// tasks whose periods admin commands can change at runtime.
pub struct AppState {
    pub store: Arc<Store>,
    pub watcher: Arc<ConfigWatcher>,
    pub engine: Arc<DeviceSyncEngine>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/user/{id}/{password}", get(user_login))
        .route("/user/{id}/{code}/{command}", get(user_get).post(user_post))
        .route("/table/{id}/{code}/{command}", get(table_get).post(table_post))
        .route("/admin/{id}/{code}", get(admin_check))
        .route("/admin/{id}/{code}/{command}", get(admin_get).post(admin_post))
        .route(
            "/admin/{id}/{code}/{command}/{value}",
            get(admin_get_with_value).post(admin_post_with_value),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

impl IntoResponse for ops::Reply {
    fn into_response(self) -> Response {
        match self {
            Self::Text(text) => text.into_response(),
            Self::Json(value) => Json(value).into_response(),
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────

async fn root(State(state): State<Arc<AppState>>) -> String {
    root_text(&state.store)
}

async fn user_login(
    State(state): State<Arc<AppState>>,
    Path((id, password)): Path<(String, String)>,
) -> Response {
    ops::login(&state, &id, &password).into_response()
}

async fn user_get(
    State(state): State<Arc<AppState>>,
    Path((id, code, command)): Path<(String, String, String)>,
) -> Response {
    ops::user_get(&state, &id, &code, &command).into_response()
}

async fn user_post(
    State(state): State<Arc<AppState>>,
    Path((id, code, command)): Path<(String, String, String)>,
    body: String,
) -> Response {
    ops::user_post(&state, &id, &code, &command, &body).into_response()
}

async fn table_get(
    State(state): State<Arc<AppState>>,
    Path((id, code, command)): Path<(String, String, String)>,
) -> Response {
    ops::table_get(&state, &id, &code, &command).into_response()
}

async fn table_post(
    State(state): State<Arc<AppState>>,
    Path((id, code, command)): Path<(String, String, String)>,
    body: String,
) -> Response {
    ops::table_post(&state, &id, &code, &command, &body).into_response()
}

async fn admin_check(
    State(state): State<Arc<AppState>>,
    Path((id, code)): Path<(String, String)>,
) -> Response {
    ops::admin_check(&state, &id, &code).into_response()
}

async fn admin_get(
    State(state): State<Arc<AppState>>,
    Path((id, code, command)): Path<(String, String, String)>,
) -> Response {
    ops::admin_get(&state, &id, &code, &command).await.into_response()
}

async fn admin_post(
    State(state): State<Arc<AppState>>,
    Path((id, code, command)): Path<(String, String, String)>,
    body: String,
) -> Response {
    ops::admin_post(&state, &id, &code, &command, &body).into_response()
}

async fn admin_get_with_value(
    State(state): State<Arc<AppState>>,
    Path((id, code, command, value)): Path<(String, String, String, String)>,
) -> Response {
    ops::admin_get_with_value(&state, &id, &code, &command, &value).into_response()
}

async fn admin_post_with_value(
    State(state): State<Arc<AppState>>,
    Path((id, code, command, value)): Path<(String, String, String, String)>,
    body: String,
) -> Response {
    ops::admin_post_with_value(&state, &id, &code, &command, &value, &body).into_response()
}

// ── Usage text ───────────────────────────────────────────────────

/// Root route body: usage, prefixed with the default-credentials
/// warning while the guest account exists and the warning is enabled.
pub fn root_text(store: &Store) -> String {
    let config = store.config();
    if !config.guest_warning {
        return usage();
    }
    match store.get_user(GUEST_USER_ID) {
        Some(guest) if !guest.is_alias() => {
            let daily = code::derive(&guest.password_hashed, Utc::now().date_naive());
            format!(
                "Welcome to the deskd table api\n\n\
                 --- WARNING ---\n\
                 By default there is one administrator user with the following login details:\n\
                 USER_ID: {GUEST_USER_ID}\n\
                 USER_PASSWORD: {GUEST_PASSWORD}\n\
                 USER_DAILY_ACCESS_CODE: {daily}\n\n\
                 Create a new administrator with different credentials and delete this one:\n\
                 POST: /admin/{GUEST_USER_ID}/{daily}/create_user/NEW_USER_ID\n\
                 GET:  /admin/{GUEST_USER_ID}/{daily}/delete_user/{GUEST_USER_ID}\n\n\
                 To only turn off this warning, edit the config file or run\n\
                 GET:  /admin/{GUEST_USER_ID}/{daily}/disable_guest_warning\n\
                 --- WARNING ---\n\n{}",
                usage()
            )
        }
        _ => usage(),
    }
}

pub fn usage() -> String {
    format!(
        "Usage:\n\
         GET: /user/USER_ID/USER_PASSWORD - get user id and daily access code\n\n\
         GET: /user/USER_ID/USER_DAILY_ACCESS_CODE/COMMAND\n\
         Options for COMMAND\n\
         get_preferences - get user preferences\n\
         get_personalization_state - get if the user is able to set preferences\n\
         get_self_deletion_state - get if the user is able to delete their own account\n\
         get_tables - get the list of all tables and their daily access codes\n\
         delete_user - delete self\n\n\
         POST: /user/USER_ID/USER_DAILY_ACCESS_CODE/COMMAND\n\
         Options for COMMAND\n\
         set_preferences - set user preferences\n\
         New user preferences json:\n{preferences}\n\n\
         GET: /table/TABLE_ID/TABLE_DAILY_ACCESS_CODE/COMMAND\n\
         Options for COMMAND\n\
         get_data - get table data\n\n\
         POST: /table/TABLE_ID/TABLE_DAILY_ACCESS_CODE/COMMAND\n\
         Options for COMMAND\n\
         set_height - set table height (number, in meters)\n\
         set_height_percentage - set table height percentage (number, 0 to 1)\n\n\
         Administrator usage:\n\
         GET: /admin/ADMIN_ID/ADMIN_DAILY_ACCESS_CODE - get if the user is an administrator\n\n\
         GET: /admin/ADMIN_ID/ADMIN_DAILY_ACCESS_CODE/COMMAND\n\
         Options for COMMAND\n\
         get_users - get the list of all users\n\
         import_external_api_tables - import the tables from the configured external api\n\
         disable_guest_warning - disable the initial warning about the default account\n\
         enable_user_self_deletion - enable the ability of users to delete their own accounts\n\
         disable_user_self_deletion - disable the ability of users to delete their own accounts\n\
         enable_user_personalization - enable the ability of users to modify their preferences\n\
         disable_user_personalization - disable the ability of users to modify their preferences\n\n\
         GET: /admin/ADMIN_ID/ADMIN_DAILY_ACCESS_CODE/COMMAND/VALUE\n\
         Options for COMMAND\n\
         enable_user_personalization/USER_ID - enable preference editing for one user\n\
         disable_user_personalization/USER_ID - disable preference editing for one user\n\
         delete_user/USER_ID - delete a user account\n\
         delete_table/TABLE_ID - delete a table\n\n\
         POST: /admin/ADMIN_ID/ADMIN_DAILY_ACCESS_CODE/COMMAND\n\
         Options for COMMAND\n\
         set_config_reload_seconds - config reload period, or null to disable reloading\n\
         set_external_api_url - set the external api url\n\
         set_external_api_key - set the external api key\n\
         set_external_api_type - set the external api implementation (\"dummy\", \"kr64\"; unknown values fall back to dummy)\n\
         set_external_api_request_frequency_seconds - device poll period, or null to disable polling\n\n\
         POST: /admin/ADMIN_ID/ADMIN_DAILY_ACCESS_CODE/COMMAND/VALUE\n\
         Options for COMMAND\n\
         create_user/USER_ID - create or update a user account\n\
         New user account json:\n{user}\n\
         create_table/TABLE_ID - create or update a table\n\
         New table json:\n{table}\n",
        preferences = ops::sample_preferences_json(),
        user = ops::sample_user_json(),
        table = ops::sample_table_json(),
    )
}
