//! Seams between the protocol stages and the remote nodes they talk to.

use crate::error::TransportError;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use endorse_common::{
    BroadcastAck, CommitEvent, Envelope, ProposalResponse, SignedProposal, TransactionId,
};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub address: SocketAddr,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.address)
    }
}

#[async_trait]
pub trait EndorserTransport: Send + Sync {
    async fn endorse(
        &self,
        peer: &Endpoint,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError>;

    /// Same execution as `endorse`, but the peer treats it as read-only.
    async fn query(
        &self,
        peer: &Endpoint,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError>;
}

#[async_trait]
pub trait OrdererTransport: Send + Sync {
    async fn broadcast(
        &self,
        orderer: &Endpoint,
        envelope: &Envelope,
    ) -> Result<BroadcastAck, TransportError>;
}

#[async_trait]
pub trait LedgerQuery: Send + Sync {
    async fn block_by_transaction_id(&self, tx_id: &TransactionId)
        -> Result<u64, TransportError>;
}

/// Unbounded sequence of commit notifications. Ends or errors when the source goes away.
pub type CommitStream = BoxStream<'static, Result<CommitEvent, TransportError>>;

#[async_trait]
pub trait CommitEventSource: Send + Sync {
    /// Opens a fresh subscription. Each call starts an independent stream.
    async fn subscribe(&self) -> Result<CommitStream, TransportError>;
}
