use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

pub const DEFAULT_LOCATION: &str = "europe-west1";
pub const DEFAULT_PRODUCT_SET_ID: &str = "product_set_explicit_id";
pub const DEFAULT_PRODUCT_ID: &str = "product_explicit_id";

pub const ENV_LOCATION: &str = "GCP_VISION_LOCATION";
pub const ENV_PRODUCT_SET_ID: &str = "GCP_VISION_PRODUCT_SET_ID";
pub const ENV_PRODUCT_ID: &str = "GCP_VISION_PRODUCT_ID";

/// Options read once when a graph is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Region every operation targets.
    pub location: String,
    /// Pinned id for the explicit-id product set chain.
    pub product_set_id: String,
    /// Pinned id for the explicit-id product chain.
    pub product_id: String,
    pub max_concurrent: usize,
    /// Per-call timeout for Create tasks. `None` disables it.
    pub task_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: DEFAULT_LOCATION.to_string(),
            product_set_id: DEFAULT_PRODUCT_SET_ID.to_string(),
            product_id: DEFAULT_PRODUCT_ID.to_string(),
            max_concurrent: 4,
            task_timeout_secs: Some(5),
        }
    }
}

impl Config {
    pub fn opgraph_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".opgraph"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::opgraph_dir()?.join("opgraph.toml"))
    }

    /// Load `~/.opgraph/opgraph.toml`, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config = Self::load_from(&Self::config_path()?)?;
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Load from `path`, falling back to defaults if the file is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        debug!(
            location = %config.location,
            product_set_id = %config.product_set_id,
            product_id = %config.product_id,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Apply overrides from `lookup`, keyed by the `GCP_VISION_*` names.
    ///
    /// Empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(location) = get(ENV_LOCATION) {
            self.location = location;
        }
        if let Some(id) = get(ENV_PRODUCT_SET_ID) {
            self.product_set_id = id;
        }
        if let Some(id) = get(ENV_PRODUCT_ID) {
            self.product_id = id;
        }
        self
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}
