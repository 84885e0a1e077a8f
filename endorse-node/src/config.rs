use std::env::current_exe;
use std::fs::read_to_string;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use endorse_common::crypto::{self, KeypairIdentity};
use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PeerConfig {
    pub name: String,
    pub listen_addr: SocketAddr,
    /// PKCS#8 PEM keypair the peer endorses with.
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeConfig {
    pub peers: Vec<PeerConfig>,
    pub orderer_addr: SocketAddr,
    pub event_source_addr: SocketAddr,
    #[serde(
        deserialize_with = "parse_milliseconds",
        serialize_with = "serialize_milliseconds",
        rename = "batch_timeout_ms",
        default = "default_batch_timeout"
    )]
    pub batch_timeout: Duration,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_min_endorsements")]
    pub min_endorsements: usize,
}

impl NodeConfig {
    /// Reads `config.yaml` from `config_dir`; key paths are relative to that directory.
    pub fn from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.is_dir() {
            return Err(anyhow!("config dir not found, or not a directory"));
        }
        let config_path = config_dir.join("config.yaml");
        let config_str = read_to_string(&config_path)
            .with_context(|| format!("cannot read {}", config_path.display()))?;
        Self::from_yaml_str(&config_str, config_dir)
    }

    /// `config/` in the same directory as the node binary.
    pub fn new() -> Result<Self> {
        let current_exe = current_exe()?;
        let exe_dir = current_exe
            .parent()
            .ok_or_else(|| anyhow!("cannot locate the directory of the node binary"))?;
        Self::from_path(exe_dir.join("config"))
    }

    pub fn from_yaml_str(config_str: &str, base_dir: &Path) -> Result<Self> {
        let mut config = serde_yaml::from_str::<NodeConfig>(config_str)?;
        for peer in config.peers.iter_mut() {
            if peer.key_path.is_relative() {
                peer.key_path = base_dir.join(&peer.key_path);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(anyhow!("the devnet needs at least one peer"));
        }
        if self.max_batch_size == 0 {
            return Err(anyhow!("max_batch_size must be positive"));
        }
        if self.min_endorsements == 0 || self.min_endorsements > self.peers.len() {
            return Err(anyhow!(
                "min_endorsements must be between 1 and the number of peers ({})",
                self.peers.len()
            ));
        }
        Ok(())
    }

    /// Keypairs of the configured peers, in config order.
    pub fn load_identities(&self) -> Result<Vec<KeypairIdentity>> {
        self.peers
            .iter()
            .map(|peer| {
                let identity = KeypairIdentity::from_file(&peer.key_path)?;
                debug!(
                    "{} pubkey is {}",
                    peer.name,
                    crypto::publickey_to_base64(&identity.public_key())
                );
                Ok(identity)
            })
            .collect()
    }
}

fn default_batch_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_max_batch_size() -> usize {
    10
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

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    const CONFIG: &str = r#"
peers:
  - name: peer0
    listen_addr: 127.0.0.1:7051
    key_path: keys/peer0
  - name: peer1
    listen_addr: 127.0.0.1:7052
    key_path: /abs/peer1
orderer_addr: 127.0.0.1:7050
event_source_addr: 127.0.0.1:7053
min_endorsements: 2
"#;

    #[test]
    fn parses_with_defaults_and_resolves_keys() {
        let config = NodeConfig::from_yaml_str(CONFIG, Path::new("/devnet")).unwrap();
        assert_eq!(config.peers[0].key_path, PathBuf::from("/devnet/keys/peer0"));
        assert_eq!(config.peers[1].key_path, PathBuf::from("/abs/peer1"));
        assert_eq!(config.batch_timeout, Duration::from_millis(500));
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.min_endorsements, 2);
    }

    #[test]
    fn rejects_policy_no_peer_set_can_meet() {
        let yaml = CONFIG.replace("min_endorsements: 2", "min_endorsements: 3");
        assert!(NodeConfig::from_yaml_str(&yaml, Path::new("/")).is_err());
    }

    #[test]
    fn loads_from_a_config_directory() {
        let dir = std::env::temp_dir().join(format!("endorse-node-config-{}", std::process::id()));
        fs::create_dir_all(dir.join("keys")).unwrap();
        let keypair = crypto::generate_keypair();
        fs::write(dir.join("keys/peer0"), crypto::keypair_to_pem(&keypair).unwrap()).unwrap();
        let yaml = CONFIG
            .replace("/abs/peer1", "keys/peer0")
            .replace("min_endorsements: 2", "min_endorsements: 1");
        fs::write(dir.join("config.yaml"), yaml).unwrap();

        let config = NodeConfig::from_path(&dir).unwrap();
        let identities = config.load_identities().unwrap();
        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].public_key(), keypair.public.to_bytes());
        fs::remove_dir_all(dir).unwrap();
    }
}
