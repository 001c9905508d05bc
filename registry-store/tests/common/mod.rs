//! Common test utilities and helpers
//!
//! Builds a [`Registry`] over a temporary directory with a manually driven
//! clock and a cheap password hasher, plus helpers for npm-style publish
//! payloads.

#![allow(dead_code)]

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{TimeZone, Utc};
use registry_store::credentials::Pbkdf2Hasher;
use registry_store::{Config, ManualClock, Registry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Staleness window used by every test registry
pub const STALE_AFTER: Duration = Duration::from_secs(300);

pub const BASE_URL: &str = "http://registry.test";

/// Test registry setup result
pub struct TestSetup {
    pub temp_dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub config: Config,
    pub registry: Registry,
}

impl TestSetup {
    /// A second registry over the same backing files, as another process would see them.
    pub fn sibling(&self) -> Result<Registry> {
        Ok(Registry::builder(self.config.clone())
            .clock(self.clock.clone())
            .hasher(Arc::new(Pbkdf2Hasher::new(8)?))
            .build()?)
    }
}

pub fn create_test_setup() -> Result<TestSetup> {
    create_test_setup_with(|_| {})
}

pub fn create_test_setup_with(adjust: impl FnOnce(&mut Config)) -> Result<TestSetup> {
    let temp_dir = TempDir::new()?;
    let mut config = Config::default().with_data_dir(temp_dir.path());
    config.server.base_url = BASE_URL.to_string();
    config.cache.stale_after_ms = STALE_AFTER.as_millis() as u64;
    adjust(&mut config);

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ));
    let registry = Registry::builder(config.clone())
        .clock(clock.clone())
        .hasher(Arc::new(Pbkdf2Hasher::new(8)?))
        .build()?;

    Ok(TestSetup {
        temp_dir,
        clock,
        config,
        registry,
    })
}

/// The document `npm publish` sends for `name@version`.
pub fn publish_payload(name: &str, version: &str, publisher: &str) -> Value {
    let tarball = format!("tarball of {}@{}", name, version);
    let filename = format!("{}-{}.tgz", name, version);
    json!({
        "_id": name,
        "name": name,
        "description": format!("{} package", name),
        "dist-tags": {"latest": version},
        "versions": {
            version: {
                "name": name,
                "version": version,
                "description": format!("{} package", name),
                "main": "index.js",
                "keywords": [name],
                "dependencies": {},
                "maintainers": [{"name": publisher, "email": format!("{}@example.com", publisher)}],
                "_npmUser": {"name": publisher, "email": format!("{}@example.com", publisher)},
                "dist": {"tarball": format!("http://client.local/{}", filename)}
            }
        },
        "_attachments": {
            filename: {
                "content_type": "application/octet-stream",
                "data": STANDARD.encode(tarball.as_bytes()),
                "length": tarball.len()
            }
        }
    })
}

/// Publish `name@version` through the registry facade.
pub async fn publish(registry: &Registry, name: &str, version: &str) -> Result<()> {
    registry
        .publish_payload(publish_payload(name, version, "alice"))
        .await?;
    Ok(())
}
