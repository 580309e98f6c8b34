//! Configuration management for Waymark nodes.
//!
//! Every section has defaults, so a config file only needs to name the
//! values it changes.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub sync: SyncConfig,
    pub hub: HubConfig,
    pub relay: RelayConfig,
    pub quality: QualityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable identifier of this device, used for the fallback author key.
    pub device_id: String,
    pub data_dir: PathBuf,
    pub database_file: String,
    /// Home location, used to pick nearby relays for pulls.
    pub home_lat: Option<f64>,
    pub home_lon: Option<f64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_id: "device-001".to_string(),
            data_dir: PathBuf::from("./data"),
            database_file: "waymark.db".to_string(),
            home_lat: None,
            home_lon: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub tick_interval_secs: u64,
    /// Pull runs on every Nth tick.
    pub pull_every_n_ticks: u64,
    pub push_batch_limit: usize,
    pub pull_limit: usize,
    /// Delivered outbox rows older than this are garbage collected.
    pub delivered_retention_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            pull_every_n_ticks: 4,
            push_batch_limit: 50,
            pull_limit: 200,
            delivered_retention_secs: 7 * 24 * 3600,
        }
    }
}

impl SyncConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub enabled: bool,
    pub base_url: String,
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            auth_token: None,
            request_timeout_secs: 15,
        }
    }
}

impl HubConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// A known relay and the geohash cell it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEndpointConfig {
    pub url: String,
    pub geohash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    pub relays: Vec<RelayEndpointConfig>,
    /// How many geohash-nearest relays to target per push/pull.
    pub nearest_relays: usize,
    pub request_timeout_secs: u64,
    /// Wall-clock budget for a pull; whatever arrived by then is used.
    pub pull_deadline_secs: u64,
    /// Fallback cells for events that carry no location.
    pub anchor_geohashes: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            relays: Vec::new(),
            nearest_relays: 3,
            request_timeout_secs: 10,
            pull_deadline_secs: 8,
            anchor_geohashes: vec!["9q8yy".to_string(), "dr5ru".to_string(), "u4pru".to_string()],
        }
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pull_deadline(&self) -> Duration {
        Duration::from_secs(self.pull_deadline_secs)
    }
}

/// Thresholds for the personal-to-network publication gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub rate_limit_per_day: usize,
    pub duplicate_radius_m: f64,
    pub max_photos: usize,
    pub min_photo_edge_px: u32,
    pub max_photo_bytes: u64,
    pub min_author_trust: u8,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_day: 20,
            duplicate_radius_m: 120.0,
            max_photos: 6,
            min_photo_edge_px: 320,
            max_photo_bytes: 5 * 1024 * 1024,
            min_author_trust: 20,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would leave the node unable to sync.
    pub fn validate(&self) -> Result<()> {
        if self.sync.tick_interval_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "sync.tick_interval_secs must be positive".to_string(),
            ));
        }
        if self.sync.pull_every_n_ticks == 0 {
            return Err(CoreError::InvalidConfig(
                "sync.pull_every_n_ticks must be positive".to_string(),
            ));
        }
        if self.hub.enabled && self.hub.base_url.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "hub.enabled requires hub.base_url".to_string(),
            ));
        }
        if self.node.home_lat.is_some() != self.node.home_lon.is_some() {
            return Err(CoreError::InvalidConfig(
                "node.home_lat and node.home_lon must be set together".to_string(),
            ));
        }
        if self.relay.enabled && self.relay.relays.is_empty() {
            warn!("relay transport enabled without any configured relays");
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.node.data_dir.join(&self.node.database_file)
    }

    pub fn default_config() -> Self {
        Self::default()
    }
}
