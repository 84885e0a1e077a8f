use endorse_client::{ClientConfig, Endpoint};
use endorse_common::crypto;
use endorse_node::config::{NodeConfig, PeerConfig};

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "config-gen",
    version = "0.2.0",
    author = "Shapooo",
    about = "Generate devnet and client config with their keypairs"
)]
struct Cli {
    /// Number of endorsing peers
    #[arg(short, long, default_value = "3")]
    pub count: u16,
    /// Generate keypairs only, default is false
    #[arg(long, default_value = "false")]
    pub keypair: bool,
    /// Output path
    #[arg(short, long, default_value = "./")]
    pub output_path: PathBuf,
    /// First port: orderer, then commit events, then one per peer
    #[arg(short, long, default_value = "7050")]
    pub start_port: u16,
    /// Endorsements required for a transaction to be valid, defaults to every peer
    #[arg(short, long)]
    pub min_endorsements: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !cli.output_path.is_dir() {
        return Err(anyhow!("output path is not a directory"));
    }
    if cli.count == 0 {
        return Err(anyhow!("the devnet needs at least one peer"));
    }
    let key_dir = cli.output_path.join("keys");
    fs::create_dir_all(&key_dir)?;

    let peer_names: Vec<_> = (0..cli.count).map(|n| format!("peer{n}")).collect();
    for name in peer_names.iter().map(String::as_str).chain(["client"]) {
        gen_keypair_file(&key_dir.join(name))?;
    }
    if cli.keypair {
        return Ok(());
    }

    if cli.start_port as u32 + cli.count as u32 + 2 > u16::MAX as u32 {
        return Err(anyhow!("port overflow"));
    }
    let orderer_addr = local_addr(cli.start_port)?;
    let event_source_addr = local_addr(cli.start_port + 1)?;
    let peers = peer_names
        .into_iter()
        .zip(cli.start_port + 2..)
        .map(|(name, port)| {
            Ok(PeerConfig {
                key_path: PathBuf::from("keys").join(&name),
                listen_addr: local_addr(port)?,
                name,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let min_endorsements = cli.min_endorsements.unwrap_or(peers.len());

    let node_config = NodeConfig {
        peers,
        orderer_addr,
        event_source_addr,
        batch_timeout: Duration::from_millis(500),
        max_batch_size: 10,
        min_endorsements,
    };
    node_config.validate()?;
    let client_config = ClientConfig {
        peers: node_config
            .peers
            .iter()
            .map(|peer| Endpoint::new(peer.name.clone(), peer.listen_addr))
            .collect(),
        orderers: vec![Endpoint::new("orderer", orderer_addr)],
        event_source: event_source_addr,
        key_path: PathBuf::from("keys/client"),
        request_timeout: Duration::from_millis(3000),
        commit_timeout: Duration::from_millis(30000),
        min_endorsements,
    };
    client_config.validate()?;

    write_file(
        &cli.output_path.join("config.yaml"),
        &serde_yaml::to_string(&node_config)?,
    )?;
    write_file(
        &cli.output_path.join("client_config.yaml"),
        &serde_yaml::to_string(&client_config)?,
    )?;
    Ok(())
}

fn local_addr(port: u16) -> Result<SocketAddr> {
    Ok(format!("127.0.0.1:{port}").parse()?)
}

/// Writes the PEM keypair to `path` and its base64 public key to `path.pub`.
fn gen_keypair_file(path: &Path) -> Result<()> {
    let keypair = crypto::generate_keypair();
    let pem = crypto::keypair_to_pem(&keypair)?;
    write_file(path, &pem)?;
    let pk_b64 = crypto::publickey_to_base64(&keypair.public.to_bytes());
    write_file(&path.with_extension("pub"), &pk_b64)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}
