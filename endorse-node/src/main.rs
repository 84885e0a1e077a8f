use endorse_node::{config::NodeConfig, devnet::Devnet};

use anyhow::Result;
use clap::{Arg, Command};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

#[tokio::main]
async fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Debug)
        .env()
        .init()?;
    let args = Command::new("endorse-node")
        .about("Development network with endorsing peers, a solo orderer and commit events.")
        .version("0.2.0")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config_dir")
                .action(clap::ArgAction::Set)
                .help(
                    "set config directory, defaults to `config/' \
                     in the same directory as endorse-node binary",
                ),
        )
        .get_matches();
    let config = if let Some(path) = args.get_one::<String>("config") {
        NodeConfig::from_path(path)?
    } else {
        NodeConfig::new()?
    };

    let devnet = Devnet::start(&config).await?;
    info!(
        "devnet up with {} peers, ledger height {}",
        devnet.peers.len(),
        devnet.ledger.read().height()
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
