//! Host configuration: a TOML file merged with CLI overrides, the same
//! shape zebrad's `ZebradConfig` takes before the abscissa machinery builds
//! its `Application` — here it's just a plain struct `main.rs` builds by
//! hand from `Cli` and an optional config file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use navy::{Backoff, EngineConfig, Proto};

/// On-disk configuration, optional — every field also has a CLI override.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub rank: Option<i64>,
    pub external_address: Option<String>,
    pub bind_address: Option<String>,
    pub callsign: Option<String>,
    pub seeds: Vec<String>,
    pub proto: Option<String>,
    pub max_retries: Option<u32>,
    pub discovery_retries: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// The fully resolved configuration this host runs with.
pub struct HostConfig {
    pub rank: i64,
    pub external_address: String,
    pub bind_address: String,
    pub callsign: String,
    pub seeds: Vec<String>,
    pub solo: bool,
    pub engine: EngineConfig,
    pub discovery_backoff: Backoff,
}

impl HostConfig {
    pub fn proto_from_str(s: &str) -> anyhow::Result<Proto> {
        match s {
            "tcp" => Ok(Proto::Tcp),
            "tcp4" => Ok(Proto::Tcp4),
            "tcp6" => Ok(Proto::Tcp6),
            other => anyhow::bail!("unrecognized proto {other:?}, expected tcp, tcp4, or tcp6"),
        }
    }
}

pub fn default_discovery_backoff() -> Backoff {
    Backoff {
        max_retries: 5,
        base_delay: Duration::from_millis(250),
    }
}
