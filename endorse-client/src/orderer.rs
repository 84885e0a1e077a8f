use crate::consistency::ConsistencySet;
use crate::error::{OrderError, TransportError};
use crate::proposal::TransactionProposal;
use crate::transport::{Endpoint, OrdererTransport};

use std::sync::Arc;

use endorse_common::{
    crypto::Identity, BroadcastAck, Endorsement, Envelope, EnvelopeBody, TransactionId,
};
use futures::future::join_all;
use log::{debug, info, warn};

pub struct OrdererSubmitter {
    transport: Arc<dyn OrdererTransport>,
}

impl OrdererSubmitter {
    pub fn new(transport: Arc<dyn OrdererTransport>) -> Self {
        Self { transport }
    }

    /// Packages the agreed endorsements into a signed envelope and hands it to
    /// every orderer at once. One acceptance is enough; ordering nodes replicate
    /// among themselves. Nothing is retried here.
    pub async fn submit(
        &self,
        set: &ConsistencySet,
        proposal: &TransactionProposal,
        identity: &dyn Identity,
        orderers: &[Endpoint],
    ) -> Result<TransactionId, OrderError> {
        if orderers.is_empty() {
            return Err(OrderError::NoOrderers);
        }
        let envelope = build_envelope(set, proposal, identity)?;
        let tx_id = proposal.tx_id();
        debug!("broadcasting {} to {} orderers", tx_id, orderers.len());

        let outcomes = join_all(
            orderers
                .iter()
                .map(|orderer| self.transport.broadcast(orderer, &envelope)),
        )
        .await;

        let mut accepted = 0;
        let mut failures = Vec::new();
        for (orderer, outcome) in orderers.iter().zip(outcomes) {
            match outcome {
                Ok(BroadcastAck::Accepted) => accepted += 1,
                Ok(BroadcastAck::Rejected(reason)) => {
                    warn!("orderer {} rejected {}: {}", orderer, tx_id, reason);
                    failures.push((orderer.name.clone(), TransportError::Rejected(reason)));
                }
                Err(e) => {
                    warn!("orderer {} unreachable for {}: {}", orderer, tx_id, e);
                    failures.push((orderer.name.clone(), e));
                }
            }
        }
        if accepted == 0 {
            return Err(OrderError::OrdererUnreachable { failures });
        }
        info!("{} accepted by {} of {} orderers", tx_id, accepted, orderers.len());
        Ok(tx_id.clone())
    }
}

fn build_envelope(
    set: &ConsistencySet,
    proposal: &TransactionProposal,
    identity: &dyn Identity,
) -> Result<Envelope, OrderError> {
    if set.proposal_hash() != proposal.proposal_hash() {
        return Err(OrderError::Envelope(format!(
            "endorsements do not belong to proposal {}",
            proposal.tx_id()
        )));
    }
    let representative = set.representative();
    let body = EnvelopeBody {
        header_bytes: proposal.header_bytes().to_vec(),
        payload: representative.payload.clone(),
        write_set: representative.write_set.clone(),
        proposal_hash: representative.proposal_hash,
        endorsements: set
            .responses()
            .iter()
            .map(|response| Endorsement {
                endorser: response.endorser.clone(),
                signature: response.signature.clone(),
            })
            .collect(),
    };
    Envelope::sign(body, identity).map_err(|e| OrderError::Envelope(e.to_string()))
}
