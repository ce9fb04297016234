use std::{collections::HashMap, path::Path, time::Duration};

use anyhow::Error;
use common::Location;
use serde::{Deserialize, Serialize};

use crate::{registry::debounce::DEFAULT_NOTIFY_DELAY, signal::DEFAULT_HISTORY_LENGTH};

pub const CONFIG_FILE: &str = "config.ron";

pub const DEFAULT_METADATA_URL: &str = "http://url-caster.appspot.com/resolve-scan";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// How long a device may go unseen before it is dropped
    pub max_inactive_ms: u64,
    /// How often to look for devices that went quiet
    pub sweep_interval_ms: u64,
    /// Minimum time between two list change notifications
    pub notify_delay_ms: u64,
    /// Signal samples kept per device for smoothing
    pub history_length: usize,
    /// How long newly found devices are collected before one lookup is sent
    pub batch_window_ms: u64,
    pub request_timeout_ms: u64,
    pub metadata_url: String,
    pub location: Location,
    /// Devices whose advertised name isn't a URL can be mapped to one here
    pub url_map: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let url_map = [
            ("OLP425-ECF5", "http://z3.ca/light"),
            ("OLP425-ECB5", "http://z3.ca/1"),
        ]
        .into_iter()
        .map(|(name, url)| (name.to_string(), url.to_string()))
        .collect();

        Self {
            max_inactive_ms: 10_000,
            sweep_interval_ms: 2_000,
            notify_delay_ms: DEFAULT_NOTIFY_DELAY.as_millis() as u64,
            history_length: DEFAULT_HISTORY_LENGTH,
            batch_window_ms: 500,
            request_timeout_ms: 10_000,
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            location: Location {
                lat: 49.129837,
                lon: 120.38142,
            },
            url_map,
        }
    }
}

impl Config {
    pub fn load() -> Result<Config, Error> {
        Config::load_from(CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Config, Error> {
        let config = std::fs::read_to_string(path)?;
        Config::from_ron(&config)
    }

    pub fn from_ron(config: &str) -> Result<Config, Error> {
        let config: Config = ron::from_str(config)?;
        Ok(config)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn notify_delay(&self) -> Duration {
        Duration::from_millis(self.notify_delay_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
