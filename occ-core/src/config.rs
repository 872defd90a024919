//! Configuration (ambient stack addition): layered like the teacher's
//! `pageserver.toml` + CLI-args services — defaults, then an optional TOML
//! file, then `OCC_`-prefixed environment variables — via the `config`
//! crate, with the binary's flags parsed by `clap`.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::forecaster::ForecasterConfig;
use crate::ranker::{RankerConstants, RankerWeights};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_capacity: u32,
    #[serde(with = "humantime_serde")]
    pub session_length: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub status_scheduler_interval: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub persistence_unavailable_threshold: std::time::Duration,
    pub ranker_weights: RankerWeights,
    pub ranker_constants: RankerConstants,
    pub forecaster: ForecasterConfig,
    pub listen: SocketAddr,
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_capacity: 50,
            session_length: std::time::Duration::from_secs(3600),
            sweep_interval: std::time::Duration::from_secs(60),
            status_scheduler_interval: std::time::Duration::from_secs(60),
            persistence_unavailable_threshold: std::time::Duration::from_secs(30),
            ranker_weights: RankerWeights::DEFAULT,
            ranker_constants: RankerConstants::DEFAULT,
            forecaster: ForecasterConfig::DEFAULT,
            listen: ([127, 0, 0, 1], 8080).into(),
            data_dir: None,
        }
    }
}

impl EngineConfig {
    /// Layers defaults, an optional TOML file, then `OCC_`-prefixed
    /// environment variables, the way `config::Config::builder` is
    /// typically assembled in the pack's service binaries.
    pub fn load(file: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults).context("serializing config defaults")?);

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("OCC").separator("__"));

        let built = builder.build().context("assembling layered configuration")?;
        let cfg: Self = built.try_deserialize().context("deserializing configuration")?;
        cfg.ranker_weights.assert_normalized();
        Ok(cfg)
    }
}

/// `clap`-derived CLI surface, matching the teacher's `#[derive(Parser)]`
/// binaries (`attachment_service::Cli`).
#[derive(Parser, Debug)]
#[command(author, version, about = "Occupancy Control Engine", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file layered over the built-in defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Overrides `listen` from the config file/environment.
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Directory for the sled-backed persistence store. Omit for an
    /// in-memory store (the default for ad-hoc runs).
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_weight_normalization() {
        let cfg = EngineConfig::default();
        cfg.ranker_weights.assert_normalized();
    }

    #[test]
    fn load_with_no_file_returns_defaults() {
        let cfg = EngineConfig::load(None).unwrap();
        assert_eq!(cfg.max_capacity, 50);
    }
}
