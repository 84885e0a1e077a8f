use crate::chaincode::{Chaincode, ChaincodeStub};
use crate::ledger::SharedLedger;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;
use endorse_common::{
    crypto::{Identity, KeypairIdentity},
    status_code, Digest, EndorsementBody, KvWrite, ProposalResponse, Request, Response,
    SignedProposal, Status, TransactionId,
};
use endorse_network::{server::Server, ServerEvent};
use log::{debug, error, trace, warn};
use tokio::sync::mpsc::{Receiver, Sender};

/// An endorsing peer: executes proposals against a ledger snapshot and signs
/// the outcome. It never writes to the ledger itself.
pub struct PeerService {
    name: String,
    identity: KeypairIdentity,
    chaincode: Arc<dyn Chaincode>,
    ledger: SharedLedger,
    net_sender: Sender<(SocketAddr, Bytes)>,
    net_receiver: Receiver<ServerEvent>,
}

impl PeerService {
    pub async fn spawn(
        name: String,
        listen_addr: SocketAddr,
        identity: KeypairIdentity,
        chaincode: Arc<dyn Chaincode>,
        ledger: SharedLedger,
    ) -> Result<SocketAddr> {
        let (local_addr, (net_sender, net_receiver)) = Server::spawn(listen_addr).await?;
        debug!("peer {} listening on {}", name, local_addr);
        tokio::spawn(async move {
            Self {
                name,
                identity,
                chaincode,
                ledger,
                net_sender,
                net_receiver,
            }
            .run()
            .await
        });
        Ok(local_addr)
    }

    async fn run(&mut self) {
        while let Some(event) = self.net_receiver.recv().await {
            let ServerEvent::Frame(addr, data) = event else {
                continue;
            };
            let response = match Request::try_from_slice(&data) {
                Ok(request) => self.handle(request),
                Err(e) => {
                    warn!("{}: malformed request from {}: {}", self.name, addr, e);
                    Response::Error(format!("malformed request: {e}"))
                }
            };
            let reply = match response.try_to_vec() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("{}: cannot encode response: {}", self.name, e);
                    continue;
                }
            };
            if self.net_sender.send((addr, reply.into())).await.is_err() {
                return;
            }
        }
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Endorse(proposal) => self.execute(&proposal, true),
            Request::Query(proposal) => self.execute(&proposal, false),
            Request::BlockByTransactionId(tx_id) => {
                Response::BlockNumber(self.ledger.read().block_by_transaction_id(&tx_id))
            }
            other => Response::Error(format!("{} does not serve {:?}", self.name, other)),
        }
    }

    /// Runs the chaincode and signs the result. Queries keep no write set.
    fn execute(&self, proposal: &SignedProposal, endorse: bool) -> Response {
        let proposal_hash = proposal.proposal_hash();
        let header = match proposal.header() {
            Ok(header) => header,
            Err(e) => {
                return self.sign(
                    Status::failure(status_code::BAD_REQUEST, e.to_string()),
                    vec![],
                    vec![],
                    proposal_hash,
                )
            }
        };
        if !proposal.verify_signature(&header.creator) {
            warn!("{}: bad creator signature on {}", self.name, header.tx_id);
            return self.sign(
                Status::failure(status_code::FORBIDDEN, "invalid creator signature"),
                vec![],
                vec![],
                proposal_hash,
            );
        }
        if TransactionId::derive(&header.nonce, &header.creator) != header.tx_id {
            warn!("{}: {} does not match its nonce and creator", self.name, header.tx_id);
            return self.sign(
                Status::failure(status_code::BAD_REQUEST, "transaction id mismatch"),
                vec![],
                vec![],
                proposal_hash,
            );
        }

        let snapshot = self.ledger.read().state().snapshot();
        let mut stub = ChaincodeStub::new(&header, &proposal.transient, snapshot);
        let result = self.chaincode.invoke(&mut stub);
        trace!("{}: executed {} for {}", self.name, header.function, header.tx_id);
        match result {
            Ok(payload) => {
                let write_set = if endorse { stub.into_write_set() } else { vec![] };
                self.sign(Status::Success, payload, write_set, proposal_hash)
            }
            Err(e) => {
                debug!("{}: {} failed: {}", self.name, header.tx_id, e);
                self.sign(e.status(), vec![], vec![], proposal_hash)
            }
        }
    }

    fn sign(
        &self,
        status: Status,
        payload: Vec<u8>,
        write_set: Vec<KvWrite>,
        proposal_hash: Digest,
    ) -> Response {
        let body = EndorsementBody {
            endorser: self.identity.certificate(),
            status,
            payload,
            write_set,
            proposal_hash,
        };
        match ProposalResponse::sign(body, &self.identity) {
            Ok(response) => Response::Proposal(response),
            Err(e) => Response::Error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaincode::DemoChaincode;
    use crate::ledger::Ledger;

    use endorse_common::ProposalHeader;
    use tokio::sync::mpsc::channel;

    fn peer(ledger: SharedLedger) -> PeerService {
        let (net_sender, _) = channel(1);
        let (_, net_receiver) = channel(1);
        PeerService {
            name: "peer0".into(),
            identity: KeypairIdentity::generate(),
            chaincode: Arc::new(DemoChaincode),
            ledger,
            net_sender,
            net_receiver,
        }
    }

    fn proposal(client: &KeypairIdentity, function: &str, tx_id: Option<&str>) -> SignedProposal {
        let nonce = vec![7; 24];
        let creator = client.certificate();
        let header = ProposalHeader {
            tx_id: tx_id
                .map(TransactionId::from)
                .unwrap_or_else(|| TransactionId::derive(&nonce, &creator)),
            chaincode_id: "demo".into(),
            function: function.into(),
            args: vec![b"k1".to_vec()],
            creator,
            nonce,
            timestamp_ms: 0,
        };
        let header_bytes = header.try_to_vec().unwrap();
        SignedProposal {
            signature: client.sign(&header_bytes),
            header_bytes,
            transient: Default::default(),
        }
    }

    fn endorsement(response: Response) -> ProposalResponse {
        match response {
            Response::Proposal(response) => response,
            other => panic!("expected a proposal response, got {other:?}"),
        }
    }

    #[test]
    fn endorses_with_a_write_set_and_queries_without() {
        let ledger = SharedLedger::new(Ledger::new(Default::default(), 1));
        let peer = peer(ledger.clone());
        let client = KeypairIdentity::generate();

        let endorsed = endorsement(peer.handle(Request::Endorse(proposal(&client, "put", None))));
        assert!(endorsed.verify_signature());
        assert_eq!(endorsed.body.status, Status::Success);
        assert_eq!(endorsed.body.write_set.len(), 1);
        assert_eq!(endorsed.body.endorser, peer.identity.certificate());

        let queried = endorsement(peer.handle(Request::Query(proposal(&client, "put", None))));
        assert!(queried.body.write_set.is_empty());
        assert!(ledger.read().state().is_empty());
    }

    #[test]
    fn refuses_forged_proposals() {
        let peer = peer(SharedLedger::new(Ledger::new(Default::default(), 1)));
        let client = KeypairIdentity::generate();

        let mut forged = proposal(&client, "put", None);
        forged.signature = KeypairIdentity::generate().sign(&forged.header_bytes);
        let response = endorsement(peer.handle(Request::Endorse(forged)));
        assert_eq!(response.body.status.code(), status_code::FORBIDDEN);

        let chosen_id = proposal(&client, "put", Some("my-own-id"));
        let response = endorsement(peer.handle(Request::Endorse(chosen_id)));
        assert_eq!(response.body.status.code(), status_code::BAD_REQUEST);
    }

    #[test]
    fn answers_block_lookups_and_refuses_other_requests() {
        let peer = peer(SharedLedger::new(Ledger::new(Default::default(), 1)));
        assert_eq!(
            peer.handle(Request::BlockByTransactionId("tx1".into())),
            Response::BlockNumber(None)
        );
        assert!(matches!(
            peer.handle(Request::SubscribeCommits),
            Response::Error(_)
        ));
    }
}
