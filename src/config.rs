// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server configuration, loaded from a YAML file with the same shape the
//! reference deployment tooling ships.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::datastore::{DEFAULT_HISTORY_SIZE, DEFAULT_SLAVE_SIZE};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self { enabled: true, host: "0.0.0.0".to_owned(), port: 5020 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuConfig {
    pub enabled: bool,
    pub port: String,
    pub baudrate: u32,
    pub bytesize: u8,
    pub parity: String,
    pub stopbits: u8,
    pub timeout: f64,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyUSB0".to_owned(),
            baudrate: 9600,
            bytesize: 8,
            parity: "N".to_owned(),
            stopbits: 1,
            timeout: 1.0,
        }
    }
}

impl RtuConfig {
    pub fn data_bits(&self) -> Result<tokio_serial::DataBits> {
        match self.bytesize {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(Error::Config(format!("unsupported RTU byte size: {other}"))),
        }
    }

    pub fn parity(&self) -> Result<tokio_serial::Parity> {
        match self.parity.as_str() {
            "N" => Ok(tokio_serial::Parity::None),
            "E" => Ok(tokio_serial::Parity::Even),
            "O" => Ok(tokio_serial::Parity::Odd),
            other => Err(Error::Config(format!("unsupported RTU parity: {other}"))),
        }
    }

    pub fn stop_bits(&self) -> Result<tokio_serial::StopBits> {
        match self.stopbits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(Error::Config(format!("unsupported RTU stop bits: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub tcp: TcpConfig,
    #[serde(default)]
    pub rtu: RtuConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { tcp: TcpConfig::default(), rtu: RtuConfig::default() }
    }
}

fn default_slave_name() -> String {
    "slave".to_owned()
}

fn default_space_size() -> usize {
    DEFAULT_SLAVE_SIZE
}

/// A single configured slave's identity and the sizes of its four data
/// spaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    pub id: u8,
    #[serde(default = "default_slave_name")]
    pub name: String,
    #[serde(default = "default_space_size")]
    pub coils: usize,
    #[serde(default = "default_space_size")]
    pub discrete_inputs: usize,
    #[serde(default = "default_space_size")]
    pub holding_registers: usize,
    #[serde(default = "default_space_size")]
    pub input_registers: usize,
}

fn default_save_interval() -> u64 {
    60
}

fn default_data_file() -> String {
    "modbus_data.json".to_owned()
}

fn default_history_max_size() -> usize {
    DEFAULT_HISTORY_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub auto_save: bool,
    pub save_interval: u64,
    pub data_file: String,
    pub history_enabled: bool,
    pub history_max_size: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            save_interval: default_save_interval(),
            data_file: default_data_file(),
            history_enabled: true,
            history_max_size: default_history_max_size(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_file() -> Option<String> {
    None
}

fn default_log_max_size() -> u64 {
    10 * 1024 * 1024
}

fn default_backup_count() -> u32 {
    5
}

/// Logging knobs. `file`/`max_size`/`backup_count` describe the rotation
/// policy a deployment's log shipper applies; this process itself only
/// configures the level and where it writes (see [`crate::logging`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub max_size: u64,
    pub backup_count: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            max_size: default_log_max_size(),
            backup_count: default_backup_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub slaves: Vec<SlaveConfig>,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            slaves: vec![SlaveConfig {
                id: 1,
                name: default_slave_name(),
                coils: DEFAULT_SLAVE_SIZE,
                discrete_inputs: DEFAULT_SLAVE_SIZE,
                holding_registers: DEFAULT_SLAVE_SIZE,
                input_registers: DEFAULT_SLAVE_SIZE,
            }],
            data: DataConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())
            .map_err(|err| Error::Config(format!("cannot read {}: {err}", path.as_ref().display())))?;
        Self::from_yaml_str(&data)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_one_slave() {
        let config = Config::default();
        assert_eq!(config.slaves.len(), 1);
        assert_eq!(config.slaves[0].id, 1);
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.server.tcp.port, config.server.tcp.port);
        assert_eq!(parsed.slaves.len(), config.slaves.len());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let yaml = "slaves:\n  - id: 9\n";
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.slaves[0].id, 9);
        assert_eq!(config.slaves[0].coils, DEFAULT_SLAVE_SIZE);
        assert!(config.server.tcp.enabled);
    }
}
