use std::path::Path;
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::DEFAULT_GAMMA;
use crate::protocol::DEFAULT_PORT;

/// Largest packet offset the multi-host sender accepts.
pub const MAX_PACKET_OFFSET: usize = 4;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Root {
    /// LEDs in one logical frame.
    pub led_count: usize,
    /// LEDs along one edge of the sculpture, used to guess sides for LEDs no
    /// range covers.
    pub leds_per_edge: usize,
    /// Single destination output.
    pub sender: Sender,
    /// Range-mapped multi-host output.
    pub multi_sender: MultiSender,
    /// Network input.
    pub receiver: Receiver,
}

impl Default for Root {
    fn default() -> Root {
        Root {
            led_count: 2520,
            leds_per_edge: 42,
            sender: Sender::default(),
            multi_sender: MultiSender::default(),
            receiver: Receiver::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Sender {
    /// Host name or IP address to send to.
    pub destination: String,
    pub port: u16,
    /// Send one frame out of every `divisor`.
    pub divisor: u32,
    /// Send at most this many universes per frame. All of them if unset.
    pub max_universe: Option<usize>,
    /// Open the socket at start-up.
    pub enabled: bool,
}

impl Default for Sender {
    fn default() -> Sender {
        Sender {
            destination: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            divisor: 3,
            max_universe: None,
            enabled: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MultiSender {
    /// Path to the host/range map.
    pub ranges_file: Option<String>,
    pub port: u16,
    pub divisor: u32,
    /// Bytes to skip at the start of each universe payload.
    pub packet_offset: usize,
    pub gamma: f32,
    pub enabled: bool,
}

impl Default for MultiSender {
    fn default() -> MultiSender {
        MultiSender {
            ranges_file: None,
            port: DEFAULT_PORT,
            divisor: 2,
            packet_offset: 1,
            gamma: DEFAULT_GAMMA,
            enabled: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Receiver {
    /// Address to accept E1.31 packets on.
    pub bind_addr: String,
    /// Release whatever has arrived every tick instead of waiting for all
    /// universes.
    pub dont_wait: bool,
    pub enabled: bool,
}

impl Default for Receiver {
    fn default() -> Receiver {
        Receiver {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            dont_wait: false,
            enabled: false,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file: {0}")]
    IoError(#[from] io::Error),
    #[error("invalid YAML config: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("invalid JSON config: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl Root {
    /// Quick sanity check for the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sender.divisor == 0 || self.multi_sender.divisor == 0 {
            return Err(ConfigError::Invalid("divisor must be at least 1".into()));
        }
        if self.multi_sender.packet_offset > MAX_PACKET_OFFSET {
            return Err(ConfigError::Invalid(format!(
                "packet offset {} is larger than {}",
                self.multi_sender.packet_offset, MAX_PACKET_OFFSET
            )));
        }
        if !(self.multi_sender.gamma > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "gamma must be positive, got {}",
                self.multi_sender.gamma
            )));
        }
        if self.leds_per_edge == 0 {
            return Err(ConfigError::Invalid("ledsPerEdge must be at least 1".into()));
        }
        if self.sender.max_universe == Some(0) {
            return Err(ConfigError::Invalid("maxUniverse must be at least 1".into()));
        }
        Ok(())
    }
}

pub fn read_config_yaml<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let file = fs::File::open(path)?;
    let reader = io::BufReader::new(file);
    let root: Root = serde_yaml::from_reader(reader)?;
    root.validate()?;
    Ok(root)
}

pub fn read_config_json<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let file = fs::File::open(path)?;
    let reader = io::BufReader::new(file);
    let root: Root = serde_json::from_reader(reader)?;
    root.validate()?;
    Ok(root)
}

/// Pick the reader from the file extension; anything but `.json` is YAML.
pub fn read_config<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => read_config_json(path),
        _ => read_config_yaml(path),
    }
}
