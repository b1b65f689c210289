//! No-op adapter for manually operated tables and unknown adapter tags.
//!
//! Pushes are accepted and dropped; polls report a perpetually moving
//! desk, which the engine treats as "leave local state untouched". The
//! result is an adapter that is completely inert without spamming the
//! poll loop with errors.

use crate::model::ApiSpec;
use crate::sync::adapter::{DeskAdapter, DeskInfo, DeskState};
use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::debug;

pub struct NoopAdapter;

#[async_trait]
impl DeskAdapter for NoopAdapter {
    async fn poll(&self, _api: &ApiSpec, mac: &str) -> Result<DeskState> {
        debug!(mac, "no-op poll");
        Ok(DeskState { height_m: 0.0, moving: true })
    }

    async fn push(&self, _api: &ApiSpec, mac: &str, height_m: f64) -> Result<()> {
        debug!(mac, height_m, "no-op push");
        Ok(())
    }

    async fn discover(&self, _api: &ApiSpec) -> Result<Vec<String>> {
        bail!("no-op adapter cannot discover devices")
    }

    async fn describe(&self, _api: &ApiSpec, _mac: &str) -> Result<DeskInfo> {
        bail!("no-op adapter has no device descriptors")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> ApiSpec {
        ApiSpec { url: String::new(), key: String::new(), kind: "dummy".into() }
    }

    #[tokio::test]
    async fn poll_reports_moving_so_local_state_is_kept() {
        let state = NoopAdapter.poll(&api(), "aa:bb").await.unwrap();
        assert!(state.moving);
    }

    #[tokio::test]
    async fn push_is_accepted_and_dropped() {
        assert!(NoopAdapter.push(&api(), "aa:bb", 0.9).await.is_ok());
    }

    #[tokio::test]
    async fn discovery_fails() {
        assert!(NoopAdapter.discover(&api()).await.is_err());
    }
}
