use crate::error::{EndorseError, TransportError};
use crate::proposal::TransactionProposal;
use crate::transport::{EndorserTransport, Endpoint};

use std::sync::Arc;

use endorse_common::{
    crypto::Identity, status_code, Digest, KvWrite, ProposalResponse, SignedProposal, Status,
};
use futures::future::join_all;
use log::{debug, warn};

/// One peer's answer to a proposal, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndorsementResponse {
    pub peer: String,
    pub status: Status,
    pub payload: Vec<u8>,
    pub write_set: Vec<KvWrite>,
    pub proposal_hash: Digest,
    pub endorser: Vec<u8>,
    pub signature: Vec<u8>,
}

impl EndorsementResponse {
    /// Accepts a peer's response only if it is signed by the endorser it names
    /// and answers the proposal that was actually sent.
    pub fn checked(peer: &Endpoint, response: ProposalResponse, expected_hash: Digest) -> Self {
        if !response.verify_signature() {
            warn!("endorsement from {} carries an invalid signature", peer);
            return Self::failed(
                peer,
                Status::failure(status_code::ENDORSEMENT_INVALID, "invalid endorser signature"),
                expected_hash,
            );
        }
        if response.body.proposal_hash != expected_hash {
            warn!("endorsement from {} answers a different proposal", peer);
            return Self::failed(
                peer,
                Status::failure(status_code::ENDORSEMENT_INVALID, "proposal hash mismatch"),
                expected_hash,
            );
        }
        let body = response.body;
        Self {
            peer: peer.name.clone(),
            status: body.status,
            payload: body.payload,
            write_set: body.write_set,
            proposal_hash: body.proposal_hash,
            endorser: body.endorser,
            signature: response.signature,
        }
    }

    pub fn failed(peer: &Endpoint, status: Status, proposal_hash: Digest) -> Self {
        Self {
            peer: peer.name.clone(),
            status,
            payload: Vec::new(),
            write_set: Vec::new(),
            proposal_hash,
            endorser: Vec::new(),
            signature: Vec::new(),
        }
    }

    pub fn unreachable(peer: &Endpoint, error: &TransportError, proposal_hash: Digest) -> Self {
        Self::failed(
            peer,
            Status::failure(status_code::UNAVAILABLE, error.to_string()),
            proposal_hash,
        )
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Byte-for-byte agreement on everything the execution produced.
    pub fn agrees_with(&self, other: &Self) -> bool {
        self.status == other.status
            && self.payload == other.payload
            && self.proposal_hash == other.proposal_hash
            && self.write_set == other.write_set
    }
}

pub struct Endorser {
    transport: Arc<dyn EndorserTransport>,
}

impl Endorser {
    pub fn new(transport: Arc<dyn EndorserTransport>) -> Self {
        Self { transport }
    }

    /// Signs `proposal` once and sends it to every peer concurrently.
    ///
    /// The result holds exactly one entry per peer, in the order of `peers`,
    /// whatever order the answers arrive in. Peers that could not be reached
    /// are recorded as `UNAVAILABLE` failures; only when none could be reached
    /// does the call itself fail.
    pub async fn propose(
        &self,
        proposal: &TransactionProposal,
        identity: &dyn Identity,
        peers: &[Endpoint],
    ) -> Result<Vec<EndorsementResponse>, EndorseError> {
        if peers.is_empty() {
            return Err(EndorseError::NoPeers);
        }
        let signed = proposal.sign(identity);
        let expected_hash = proposal.proposal_hash();
        debug!(
            "sending proposal {} to {} peers",
            proposal.tx_id(),
            peers.len()
        );

        let outcomes = join_all(
            peers
                .iter()
                .map(|peer| self.endorse_one(peer, &signed, expected_hash)),
        )
        .await;

        let mut responses = Vec::with_capacity(peers.len());
        let mut failures = Vec::new();
        for (peer, outcome) in peers.iter().zip(outcomes) {
            match outcome {
                Ok(response) => responses.push(response),
                Err(e) => {
                    warn!("peer {} unreachable: {}", peer, e);
                    responses.push(EndorsementResponse::unreachable(peer, &e, expected_hash));
                    failures.push((peer.name.clone(), e));
                }
            }
        }
        if failures.len() == peers.len() {
            return Err(EndorseError::NoPeersReachable { failures });
        }
        Ok(responses)
    }

    async fn endorse_one(
        &self,
        peer: &Endpoint,
        signed: &SignedProposal,
        expected_hash: Digest,
    ) -> Result<EndorsementResponse, TransportError> {
        let response = self.transport.endorse(peer, signed).await?;
        Ok(EndorsementResponse::checked(peer, response, expected_hash))
    }
}
