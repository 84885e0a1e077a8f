use crate::chaincode::{Chaincode, DemoChaincode};
use crate::config::NodeConfig;
use crate::events::EventService;
use crate::ledger::{Ledger, SharedLedger};
use crate::orderer::OrdererService;
use crate::peer::PeerService;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use endorse_common::crypto::{Identity, KeypairIdentity};
use log::info;
use tokio::sync::mpsc::channel;

const COMMIT_BUFFER: usize = 1024;

/// A running devnet: every service spawned onto the current runtime, all
/// sharing one ledger.
pub struct Devnet {
    pub peers: Vec<(String, SocketAddr)>,
    pub orderer: SocketAddr,
    pub event_source: SocketAddr,
    pub ledger: SharedLedger,
}

impl Devnet {
    pub async fn start(config: &NodeConfig) -> Result<Self> {
        let identities = config.load_identities()?;
        Self::start_with(config, identities).await
    }

    /// Starts the devnet with peer keypairs given in `config.peers` order.
    pub async fn start_with(config: &NodeConfig, identities: Vec<KeypairIdentity>) -> Result<Self> {
        if identities.len() != config.peers.len() {
            return Err(anyhow!(
                "{} peers configured but {} keypairs given",
                config.peers.len(),
                identities.len()
            ));
        }
        let endorsers = identities.iter().map(|identity| identity.certificate()).collect();
        let ledger = SharedLedger::new(Ledger::new(endorsers, config.min_endorsements));
        let chaincode: Arc<dyn Chaincode> = Arc::new(DemoChaincode);

        let mut peers = Vec::with_capacity(config.peers.len());
        for (peer, identity) in config.peers.iter().zip(identities) {
            let addr = PeerService::spawn(
                peer.name.clone(),
                peer.listen_addr,
                identity,
                chaincode.clone(),
                ledger.clone(),
            )
            .await?;
            peers.push((peer.name.clone(), addr));
        }

        let (commits, commit_events) = channel(COMMIT_BUFFER);
        let event_source = EventService::spawn(config.event_source_addr, commit_events).await?;
        let orderer = OrdererService::new(
            ledger.clone(),
            commits,
            config.batch_timeout,
            config.max_batch_size,
        )
        .spawn(config.orderer_addr)
        .await?;

        for (name, addr) in &peers {
            info!("{} endorsing on {}", name, addr);
        }
        info!("orderer on {}, commit events on {}", orderer, event_source);
        Ok(Self {
            peers,
            orderer,
            event_source,
            ledger,
        })
    }
}
