use crate::transport::Endpoint;

use std::env::current_exe;
use std::fs::read_to_string;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use endorse_common::crypto::KeypairIdentity;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub peers: Vec<Endpoint>,
    pub orderers: Vec<Endpoint>,
    pub event_source: SocketAddr,
    /// PKCS#8 PEM keypair of the submitting identity.
    pub key_path: PathBuf,
    #[serde(
        deserialize_with = "parse_milliseconds",
        serialize_with = "serialize_milliseconds",
        rename = "request_timeout_ms",
        default = "default_request_timeout"
    )]
    pub request_timeout: Duration,
    #[serde(
        deserialize_with = "parse_milliseconds",
        serialize_with = "serialize_milliseconds",
        rename = "commit_timeout_ms",
        default = "default_commit_timeout"
    )]
    pub commit_timeout: Duration,
    #[serde(default = "default_min_endorsements")]
    pub min_endorsements: usize,
}

impl ClientConfig {
    /// Reads `client_config.yaml` next to the running binary.
    pub fn new() -> Result<Self> {
        let current_exe = current_exe()?;
        let exe_dir = current_exe
            .parent()
            .ok_or_else(|| anyhow!("cannot locate the directory of the client binary"))?;
        Self::from_path(exe_dir.join("client_config.yaml"))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(anyhow!("config file {} not found, or not a file", path.display()));
        }
        let config_str = read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml_str(&config_str, base_dir)
    }

    /// Parses and validates a config; a relative `key_path` is taken relative to `base_dir`.
    pub fn from_yaml_str(config_str: &str, base_dir: &Path) -> Result<Self> {
        let mut config = serde_yaml::from_str::<ClientConfig>(config_str)?;
        if config.key_path.is_relative() {
            config.key_path = base_dir.join(&config.key_path);
        }
        config.validate()?;
        debug!(
            "client config: {} peers, {} orderers, events from {}",
            config.peers.len(),
            config.orderers.len(),
            config.event_source
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(anyhow!("at least one peer must be configured"));
        }
        if self.orderers.is_empty() {
            return Err(anyhow!("at least one orderer must be configured"));
        }
        if self.min_endorsements == 0 || self.min_endorsements > self.peers.len() {
            return Err(anyhow!(
                "min_endorsements must be between 1 and the number of peers ({})",
                self.peers.len()
            ));
        }
        Ok(())
    }

    pub fn load_identity(&self) -> Result<KeypairIdentity> {
        KeypairIdentity::from_file(&self.key_path)
            .with_context(|| format!("cannot load keypair from {}", self.key_path.display()))
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(3000)
}

fn default_commit_timeout() -> Duration {
    Duration::from_millis(30_000)
}

fn default_min_endorsements() -> usize {
    1
}

fn parse_milliseconds<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millisecs: u64 = Deserialize::deserialize(d)?;
    Ok(Duration::from_millis(millisecs))
}

fn serialize_milliseconds<S>(duration: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_u64(duration.as_millis() as u64)
}
