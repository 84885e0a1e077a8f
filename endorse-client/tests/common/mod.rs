//! In-memory peers, orderers, ledger and event source for pipeline tests.

use endorse_client::{
    transport::{CommitEventSource, CommitStream, EndorserTransport, LedgerQuery, OrdererTransport},
    ClientConfig, Endpoint, Session, TransportError, Transports,
};
use endorse_common::{
    crypto::{Identity, KeypairIdentity},
    BroadcastAck, CommitEvent, EndorsementBody, Envelope, ProposalResponse, SignedProposal,
    Status, TransactionId, TxValidation,
};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

struct Peer {
    identity: KeypairIdentity,
    delay: Duration,
    payload: Vec<u8>,
}

type Feed = UnboundedSender<Result<CommitEvent, TransportError>>;

#[derive(Default)]
pub struct Network {
    peers: HashMap<String, Peer>,
    orderers: HashMap<String, Result<BroadcastAck, TransportError>>,
    /// Block that accepted envelopes land in; `None` keeps them uncommitted.
    commit_block: Option<u64>,
    ledger: Mutex<HashMap<TransactionId, u64>>,
    feeds: Mutex<Vec<Feed>>,
    pub broadcasts: Mutex<Vec<(String, Envelope)>>,
    pub endorse_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer(mut self, name: &str, delay_ms: u64, payload: &[u8]) -> Self {
        self.peers.insert(
            name.to_string(),
            Peer {
                identity: KeypairIdentity::generate(),
                delay: Duration::from_millis(delay_ms),
                payload: payload.to_vec(),
            },
        );
        self
    }

    pub fn orderer(mut self, name: &str, answer: Result<BroadcastAck, TransportError>) -> Self {
        self.orderers.insert(name.to_string(), answer);
        self
    }

    pub fn commits_in(mut self, block_number: u64) -> Self {
        self.commit_block = Some(block_number);
        self
    }

    pub fn publish(&self, event: CommitEvent) {
        let mut feeds = self.feeds.lock().unwrap();
        feeds.retain(|feed| feed.send(Ok(event.clone())).is_ok());
    }

    pub fn certificate(&self, peer: &str) -> Vec<u8> {
        self.peers[peer].identity.certificate()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }

    async fn respond(
        &self,
        peer: &Endpoint,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        let node = self.peers.get(&peer.name).ok_or(TransportError::Closed)?;
        tokio::time::sleep(node.delay).await;
        let body = EndorsementBody {
            endorser: node.identity.certificate(),
            status: Status::Success,
            payload: node.payload.clone(),
            write_set: vec![],
            proposal_hash: proposal.proposal_hash(),
        };
        ProposalResponse::sign(body, &node.identity)
            .map_err(|e| TransportError::Codec(e.to_string()))
    }
}

#[async_trait]
impl EndorserTransport for Network {
    async fn endorse(
        &self,
        peer: &Endpoint,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        self.endorse_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(peer, proposal).await
    }

    async fn query(
        &self,
        peer: &Endpoint,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(peer, proposal).await
    }
}

#[async_trait]
impl OrdererTransport for Network {
    async fn broadcast(
        &self,
        orderer: &Endpoint,
        envelope: &Envelope,
    ) -> Result<BroadcastAck, TransportError> {
        self.broadcasts
            .lock()
            .unwrap()
            .push((orderer.name.clone(), envelope.clone()));
        let answer = self.orderers[&orderer.name].clone();
        if let (Ok(BroadcastAck::Accepted), Some(block_number)) = (&answer, self.commit_block) {
            let tx_id = envelope.body.header().unwrap().tx_id;
            let first = self
                .ledger
                .lock()
                .unwrap()
                .insert(tx_id.clone(), block_number)
                .is_none();
            if first {
                self.publish(CommitEvent {
                    tx_id,
                    block_number,
                    validation: TxValidation::Valid,
                });
            }
        }
        answer
    }
}

#[async_trait]
impl LedgerQuery for Network {
    async fn block_by_transaction_id(&self, tx_id: &TransactionId) -> Result<u64, TransportError> {
        self.ledger
            .lock()
            .unwrap()
            .get(tx_id)
            .copied()
            .ok_or(TransportError::NotFound)
    }
}

#[async_trait]
impl CommitEventSource for Network {
    async fn subscribe(&self) -> Result<CommitStream, TransportError> {
        let (feed, receiver) = unbounded_channel();
        self.feeds.lock().unwrap().push(feed);
        Ok(futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        })
        .boxed())
    }
}

pub fn endpoints(names: &[&str]) -> Vec<Endpoint> {
    names
        .iter()
        .enumerate()
        .map(|(n, name)| Endpoint::new(*name, format!("127.0.0.1:{}", 7051 + n).parse().unwrap()))
        .collect()
}

pub fn config(peers: &[&str], orderers: &[&str]) -> ClientConfig {
    ClientConfig {
        peers: endpoints(peers),
        orderers: endpoints(orderers),
        event_source: "127.0.0.1:7053".parse().unwrap(),
        key_path: PathBuf::new(),
        request_timeout: Duration::from_secs(1),
        commit_timeout: Duration::from_secs(5),
        min_endorsements: 1,
    }
}

pub fn session(network: &Arc<Network>, config: &ClientConfig) -> Session {
    Session::new(
        config,
        Arc::new(KeypairIdentity::generate()),
        Transports {
            endorser: network.clone(),
            orderer: network.clone(),
            ledger: network.clone(),
            events: network.clone(),
        },
    )
}
