//! Kr64 desk controller adapter.
//!
//! Speaks the controller's HTTP API: millimeter integer positions,
//! `GET /api/v2/{key}/desks/` for discovery, `GET .../desks/{mac}` for
//! state, `PUT .../desks/{mac}/state` with `{"position_mm": N}` to
//! move. MAC addresses are lowercased on the wire.

use crate::model::ApiSpec;
use crate::sync::adapter::{DeskAdapter, DeskInfo, DeskState};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Per-request timeout; a wedged controller must not stall a poll tick
/// for longer than this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// Wire shapes; unknown fields (usage counters, error logs) are ignored.
#[derive(Debug, Deserialize)]
struct WireDesk {
    config: WireConfig,
    state: WireState,
}

#[derive(Debug, Deserialize)]
struct WireConfig {
    name: String,
    manufacturer: String,
}

#[derive(Debug, Deserialize)]
struct WireState {
    position_mm: i64,
    speed_mms: i64,
}

impl From<&WireState> for DeskState {
    fn from(state: &WireState) -> Self {
        DeskState {
            height_m: state.position_mm as f64 / 1000.0,
            moving: state.speed_mms != 0,
        }
    }
}

pub struct Kr64Adapter {
    client: reqwest::Client,
}

impl Kr64Adapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn desks_url(api: &ApiSpec) -> String {
        format!("{}/api/v2/{}/desks/", api.url.trim_end_matches('/'), api.key)
    }

    fn desk_url(api: &ApiSpec, mac: &str) -> String {
        format!("{}{}", Self::desks_url(api), mac.to_lowercase())
    }

    async fn fetch_desk(&self, api: &ApiSpec, mac: &str) -> Result<WireDesk> {
        self.client
            .get(Self::desk_url(api, mac))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("Kr64 state fetch failed for {mac}"))?
            .json()
            .await
            .with_context(|| format!("Kr64 state parse failed for {mac}"))
    }
}

impl Default for Kr64Adapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeskAdapter for Kr64Adapter {
    async fn poll(&self, api: &ApiSpec, mac: &str) -> Result<DeskState> {
        let desk = self.fetch_desk(api, mac).await?;
        Ok(DeskState::from(&desk.state))
    }

    async fn push(&self, api: &ApiSpec, mac: &str, height_m: f64) -> Result<()> {
        let position_mm = (height_m * 1000.0) as i64;
        self.client
            .put(format!("{}/state", Self::desk_url(api, mac)))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({ "position_mm": position_mm }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("Kr64 push failed for {mac}"))?;
        Ok(())
    }

    async fn discover(&self, api: &ApiSpec) -> Result<Vec<String>> {
        self.client
            .get(Self::desks_url(api))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .context("Kr64 discovery failed")?
            .json()
            .await
            .context("Kr64 discovery parse failed")
    }

    async fn describe(&self, api: &ApiSpec, mac: &str) -> Result<DeskInfo> {
        let desk = self.fetch_desk(api, mac).await?;
        Ok(DeskInfo {
            name: desk.config.name,
            manufacturer: desk.config.manufacturer,
            state: DeskState::from(&desk.state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> ApiSpec {
        ApiSpec {
            url: server.uri(),
            key: "sekrit".into(),
            kind: "kr64".into(),
        }
    }

    fn desk_body(position_mm: i64, speed_mms: i64) -> serde_json::Value {
        serde_json::json!({
            "config": { "name": "Desk 7", "manufacturer": "Kr64 GmbH" },
            "state": {
                "position_mm": position_mm,
                "speed_mms": speed_mms,
                "status": "Normal",
                "isPositionLost": false,
                "isOverloadProtectionUp": false,
                "isOverloadProtectionDown": false,
                "isAntiCollision": false
            },
            "usage": { "activationsCounter": 1, "sitStandCounter": 1 },
            "lastErrors": []
        })
    }

    #[tokio::test]
    async fn poll_converts_millimeters_and_motion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/sekrit/desks/aa:bb:cc:dd:ee:ff"))
            .respond_with(ResponseTemplate::new(200).set_body_json(desk_body(741, 0)))
            .mount(&server)
            .await;

        let state = Kr64Adapter::new()
            .poll(&api_for(&server), "AA:BB:CC:DD:EE:FF")
            .await
            .unwrap();
        assert!((state.height_m - 0.741).abs() < 1e-9);
        assert!(!state.moving);
    }

    #[tokio::test]
    async fn poll_flags_motion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/sekrit/desks/aa:bb"))
            .respond_with(ResponseTemplate::new(200).set_body_json(desk_body(900, 25)))
            .mount(&server)
            .await;

        let state = Kr64Adapter::new().poll(&api_for(&server), "aa:bb").await.unwrap();
        assert!(state.moving);
    }

    #[tokio::test]
    async fn push_puts_millimeter_integers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v2/sekrit/desks/aa:bb/state"))
            .and(body_json(serde_json::json!({ "position_mm": 750 })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        Kr64Adapter::new()
            .push(&api_for(&server), "aa:bb", 0.75)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn discover_lists_macs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/sekrit/desks/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!(["aa:bb", "cc:dd"])),
            )
            .mount(&server)
            .await;

        let macs = Kr64Adapter::new().discover(&api_for(&server)).await.unwrap();
        assert_eq!(macs, vec!["aa:bb", "cc:dd"]);
    }

    #[tokio::test]
    async fn http_errors_surface_as_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/sekrit/desks/aa:bb"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(Kr64Adapter::new().poll(&api_for(&server), "aa:bb").await.is_err());
    }

    #[tokio::test]
    async fn describe_returns_descriptor_and_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/sekrit/desks/aa:bb"))
            .respond_with(ResponseTemplate::new(200).set_body_json(desk_body(680, 0)))
            .mount(&server)
            .await;

        let info = Kr64Adapter::new().describe(&api_for(&server), "aa:bb").await.unwrap();
        assert_eq!(info.name, "Desk 7");
        assert_eq!(info.manufacturer, "Kr64 GmbH");
        assert!((info.state.height_m - 0.68).abs() < 1e-9);
    }
}
