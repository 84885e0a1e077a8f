use crate::endorsement::EndorsementResponse;
use crate::error::QueryError;
use crate::proposal::TransactionProposal;
use crate::transport::{EndorserTransport, Endpoint};

use std::sync::Arc;

use endorse_common::{crypto::Identity, status_code, Status};
use log::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    /// Name of the peer that answered.
    pub peer: String,
    /// Always `Status::Success`; failures end up in `QueryError`.
    pub status: Status,
    pub payload: Vec<u8>,
}

pub struct QueryClient {
    transport: Arc<dyn EndorserTransport>,
}

impl QueryClient {
    pub fn new(transport: Arc<dyn EndorserTransport>) -> Self {
        Self { transport }
    }

    /// Asks the peers one after another and returns the first successful answer.
    ///
    /// Nothing is compared across peers and nothing reaches the orderer, so the
    /// result reflects a single peer's view of the ledger.
    pub async fn query(
        &self,
        proposal: &TransactionProposal,
        identity: &dyn Identity,
        peers: &[Endpoint],
    ) -> Result<QueryResult, QueryError> {
        if peers.is_empty() {
            return Err(QueryError::NoPeers);
        }
        let signed = proposal.sign(identity);
        let expected_hash = proposal.proposal_hash();

        let mut failures = Vec::new();
        for peer in peers {
            let status = match self.transport.query(peer, &signed).await {
                Ok(response) => {
                    let response = EndorsementResponse::checked(peer, response, expected_hash);
                    if response.is_success() {
                        debug!("query {} answered by {}", proposal.tx_id(), peer);
                        return Ok(QueryResult {
                            peer: response.peer,
                            status: response.status,
                            payload: response.payload,
                        });
                    }
                    response.status
                }
                Err(e) => Status::failure(status_code::UNAVAILABLE, e.to_string()),
            };
            warn!("query to {} failed: {}", peer, status);
            failures.push((peer.name.clone(), status));
        }
        Err(QueryError::NoSuccessfulResponse { failures })
    }
}
