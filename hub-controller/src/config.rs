//! Process configuration: which file to load (`envconfig`) and what's in it
//! (`serde_yml`), per spec §6 "Process configuration".

use std::path::{Path, PathBuf};

use envconfig::Envconfig;
use hub_common::model::GeoLocation;
use serde::Deserialize;
use thiserror::Error;

use crate::policy::PolicyKind;

/// Which config file to load, from the process environment.
#[derive(Envconfig)]
pub struct Environment {
    /// Path to the YAML config file.
    #[envconfig(from = "CONFIG_FILE")]
    pub config_file: PathBuf,
}

impl Environment {
    /// Read `CONFIG_FILE` from the environment.
    ///
    /// # Errors
    ///
    /// If `CONFIG_FILE` is not set.
    pub fn load() -> Result<Self, envconfig::Error> {
        Self::init_from_env()
    }

    /// Load and parse the config file named by this environment.
    ///
    /// # Errors
    ///
    /// If the file can't be read or doesn't parse as a valid `Config`.
    pub fn config(&self) -> Result<Config, Error> {
        load_file(&self.config_file)
    }
}

fn load_file(filename: &Path) -> Result<Config, Error> {
    let f = std::fs::File::open(filename).map_err(|e| Error::File(filename.to_path_buf(), e))?;
    serde_yml::from_reader(f).map_err(|e| Error::Yaml(filename.to_path_buf(), e))
}

/// The hub's full configuration, as loaded from `CONFIG_FILE`.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Broker connection settings.
    pub mqtt: MqttConfig,
    /// This hub's identity and capacity.
    pub hub: HubConfig,
    /// DLM tick interval, in seconds.
    #[serde(default = "default_dlm_interval")]
    pub dlm_interval_s: f64,
    /// Which allocation policy to run.
    pub policy: PolicyKind,
    /// The nodes this hub manages.
    pub nodes: Vec<NodeConfig>,
}

fn default_dlm_interval() -> f64 {
    5.0
}

/// Broker connection settings.
#[derive(Debug, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname or IP.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// MQTT client id for this process.
    pub client_id: String,
}

/// This hub's identity, location, and grid capacity.
#[derive(Debug, Deserialize)]
pub struct HubConfig {
    /// Unique hub identifier (max 50 chars).
    pub hub_id: String,
    /// Physical location.
    pub location: GeoLocation,
    /// Grid capacity in kW, (0, 1000].
    pub max_grid_capacity_kw: f64,
    /// This process's reachable IP address.
    pub ip_address: String,
    /// Firmware version string (max 20 chars).
    pub firmware_version: String,
}

/// One managed charging node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier (max 50 chars).
    pub node_id: String,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Node max power in kW, (0, 350].
    pub max_power_kw: f64,
    /// Use simulated hardware instead of a serial bridge.
    #[serde(default)]
    pub simulation: bool,
    /// Serial port path, required when `simulation = false`.
    #[serde(default)]
    pub serial_port: Option<String>,
}

/// An error loading the configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// The config file could not be opened.
    #[error("error reading file {0}: {1}")]
    File(PathBuf, std::io::Error),

    /// The config file did not parse as valid YAML/`Config`.
    #[error("error parsing file {0}: {1}")]
    Yaml(PathBuf, serde_yml::Error),
}
