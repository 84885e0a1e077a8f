//! The full submit pipeline: propose, verify, watch, order, wait for commit.

use crate::commit::{CommitHandle, CommitWatcher};
use crate::config::ClientConfig;
use crate::consistency::verify_with_quorum;
use crate::endorsement::Endorser;
use crate::error::TransactionError;
use crate::network::TcpTransport;
use crate::orderer::OrdererSubmitter;
use crate::proposal::ProposalBuilder;
use crate::query::{QueryClient, QueryResult};
use crate::transport::{
    CommitEventSource, EndorserTransport, Endpoint, LedgerQuery, OrdererTransport,
};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use endorse_common::{crypto::Identity, TransactionId};
use log::debug;
use tokio::time::Instant;

/// The remote collaborators a `Session` talks to.
#[derive(Clone)]
pub struct Transports {
    pub endorser: Arc<dyn EndorserTransport>,
    pub orderer: Arc<dyn OrdererTransport>,
    pub ledger: Arc<dyn LedgerQuery>,
    pub events: Arc<dyn CommitEventSource>,
}

impl Transports {
    pub fn tcp(config: &ClientConfig) -> Self {
        let tcp = Arc::new(TcpTransport::new(
            config.request_timeout,
            config.peers.clone(),
            config.event_source,
        ));
        Self {
            endorser: tcp.clone(),
            orderer: tcp.clone(),
            ledger: tcp.clone(),
            events: tcp,
        }
    }
}

/// Accepted by ordering; the commit is still outstanding.
#[derive(Debug)]
pub struct SubmittedTransaction {
    pub tx_id: TransactionId,
    /// The result every agreeing endorser returned.
    pub payload: Vec<u8>,
    pub commit: CommitHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    pub tx_id: TransactionId,
    pub block_number: u64,
    pub payload: Vec<u8>,
}

/// Owned client context: identity, endpoints and one commit watcher shared by
/// every transaction submitted through it.
pub struct Session {
    identity: Arc<dyn Identity>,
    peers: Vec<Endpoint>,
    orderers: Vec<Endpoint>,
    commit_timeout: Duration,
    min_endorsements: usize,
    endorser: Endorser,
    submitter: OrdererSubmitter,
    watcher: CommitWatcher,
    query: QueryClient,
}

impl Session {
    pub fn new(config: &ClientConfig, identity: Arc<dyn Identity>, transports: Transports) -> Self {
        Self {
            identity,
            peers: config.peers.clone(),
            orderers: config.orderers.clone(),
            commit_timeout: config.commit_timeout,
            min_endorsements: config.min_endorsements,
            endorser: Endorser::new(transports.endorser.clone()),
            submitter: OrdererSubmitter::new(transports.orderer),
            watcher: CommitWatcher::new(transports.events, transports.ledger),
            query: QueryClient::new(transports.endorser),
        }
    }

    /// Loads the configured identity and talks to the configured nodes over TCP.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let identity = Arc::new(config.load_identity()?);
        Ok(Self::new(config, identity, Transports::tcp(config)))
    }

    /// Runs a proposal through endorsement, consistency and ordering.
    ///
    /// The commit watch is in place before the envelope leaves, so the commit
    /// event cannot slip past. If ordering fails the watch is dropped with it.
    pub async fn submit(
        &self,
        proposal: ProposalBuilder,
    ) -> Result<SubmittedTransaction, TransactionError> {
        let identity = self.identity.as_ref();
        let proposal = proposal.build(identity)?;
        let tx_id = proposal.tx_id().clone();
        debug!("submitting {}", tx_id);

        let responses = self.endorser.propose(&proposal, identity, &self.peers).await?;
        let set = verify_with_quorum(responses, self.min_endorsements)?;
        let commit = self
            .watcher
            .watch(tx_id.clone(), Instant::now() + self.commit_timeout)
            .await?;
        self.submitter
            .submit(&set, &proposal, identity, &self.orderers)
            .await?;

        Ok(SubmittedTransaction {
            tx_id,
            payload: set.payload().to_vec(),
            commit,
        })
    }

    pub async fn submit_and_wait(
        &self,
        proposal: ProposalBuilder,
    ) -> Result<CommittedTransaction, TransactionError> {
        let SubmittedTransaction {
            tx_id,
            payload,
            commit,
        } = self.submit(proposal).await?;
        let block_number = commit.committed().await?;
        debug!("{} finished in block {}", tx_id, block_number);
        Ok(CommittedTransaction {
            tx_id,
            block_number,
            payload,
        })
    }

    /// Read-only evaluation on a single peer; never ordered, never committed.
    pub async fn evaluate(
        &self,
        proposal: ProposalBuilder,
    ) -> Result<QueryResult, TransactionError> {
        let identity = self.identity.as_ref();
        let proposal = proposal.build(identity)?;
        Ok(self.query.query(&proposal, identity, &self.peers).await?)
    }

    /// Commit watches registered through this session and not yet resolved.
    pub fn pending_watches(&self) -> usize {
        self.watcher.pending_watches()
    }
}
