use crate::crypto::{self, Identity};
use crate::types::{Digest, KvWrite, Status, TransactionId, TxValidation};

use std::collections::BTreeMap;
use std::io;

use borsh::{BorshDeserialize, BorshSerialize};

/// The signed part of a proposal. Transient data is deliberately not in here.
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct ProposalHeader {
    pub tx_id: TransactionId,
    pub chaincode_id: String,
    pub function: String,
    pub args: Vec<Vec<u8>>,
    pub creator: Vec<u8>,
    pub nonce: Vec<u8>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct SignedProposal {
    pub header_bytes: Vec<u8>,
    pub transient: BTreeMap<String, Vec<u8>>,
    pub signature: Vec<u8>,
}

impl SignedProposal {
    pub fn header(&self) -> io::Result<ProposalHeader> {
        ProposalHeader::try_from_slice(&self.header_bytes)
    }

    pub fn proposal_hash(&self) -> Digest {
        crypto::sha256(&self.header_bytes)
    }

    pub fn verify_signature(&self, creator: &[u8]) -> bool {
        crypto::verify(creator, &self.header_bytes, &self.signature)
    }
}

/// What an endorser signs when it answers a proposal.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EndorsementBody {
    pub endorser: Vec<u8>,
    pub status: Status,
    pub payload: Vec<u8>,
    pub write_set: Vec<KvWrite>,
    pub proposal_hash: Digest,
}

impl EndorsementBody {
    pub fn signing_bytes(&self) -> io::Result<Vec<u8>> {
        self.try_to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalResponse {
    pub body: EndorsementBody,
    pub signature: Vec<u8>,
}

impl ProposalResponse {
    pub fn sign(body: EndorsementBody, identity: &dyn Identity) -> io::Result<Self> {
        let signature = identity.sign(&body.signing_bytes()?);
        Ok(Self { body, signature })
    }

    pub fn verify_signature(&self) -> bool {
        match self.body.signing_bytes() {
            Ok(bytes) => crypto::verify(&self.body.endorser, &bytes, &self.signature),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Endorsement {
    pub endorser: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct EnvelopeBody {
    pub header_bytes: Vec<u8>,
    pub payload: Vec<u8>,
    pub write_set: Vec<KvWrite>,
    pub proposal_hash: Digest,
    pub endorsements: Vec<Endorsement>,
}

impl EnvelopeBody {
    pub fn header(&self) -> io::Result<ProposalHeader> {
        ProposalHeader::try_from_slice(&self.header_bytes)
    }

    /// Rebuilds what `endorser` signed, given that every endorsement in the
    /// envelope agreed on a successful result.
    pub fn endorsement_body(&self, endorser: &[u8]) -> EndorsementBody {
        EndorsementBody {
            endorser: endorser.to_vec(),
            status: Status::Success,
            payload: self.payload.clone(),
            write_set: self.write_set.clone(),
            proposal_hash: self.proposal_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Envelope {
    pub body: EnvelopeBody,
    pub signature: Vec<u8>,
}

impl Envelope {
    pub fn sign(body: EnvelopeBody, identity: &dyn Identity) -> io::Result<Self> {
        let signature = identity.sign(&body.try_to_vec()?);
        Ok(Self { body, signature })
    }

    pub fn verify_signature(&self, creator: &[u8]) -> bool {
        match self.body.try_to_vec() {
            Ok(bytes) => crypto::verify(creator, &bytes, &self.signature),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BroadcastAck {
    Accepted,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CommitEvent {
    pub tx_id: TransactionId,
    pub block_number: u64,
    pub validation: TxValidation,
}

#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Request {
    Endorse(SignedProposal),
    Query(SignedProposal),
    Broadcast(Envelope),
    BlockByTransactionId(TransactionId),
    SubscribeCommits,
}

#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Response {
    Proposal(ProposalResponse),
    Broadcast(BroadcastAck),
    BlockNumber(Option<u64>),
    Commit(CommitEvent),
    /// Sent once per `SubscribeCommits`, after the subscriber is registered.
    Subscribed,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeypairIdentity;

    #[test]
    fn endorsement_signature_covers_the_body() {
        let endorser = KeypairIdentity::generate();
        let body = EndorsementBody {
            endorser: endorser.certificate(),
            status: Status::Success,
            payload: br#"{"value":"done!"}"#.to_vec(),
            write_set: vec![],
            proposal_hash: [7; 32],
        };
        let mut response = ProposalResponse::sign(body, &endorser).unwrap();
        assert!(response.verify_signature());

        response.body.payload = b"forged".to_vec();
        assert!(!response.verify_signature());
    }

    #[test]
    fn envelope_rebuilds_endorsed_body() {
        let endorser = KeypairIdentity::generate();
        let body = EndorsementBody {
            endorser: endorser.certificate(),
            status: Status::Success,
            payload: b"ok".to_vec(),
            write_set: vec![KvWrite {
                key: "k1".into(),
                value: Some(b"v".to_vec()),
            }],
            proposal_hash: [1; 32],
        };
        let response = ProposalResponse::sign(body.clone(), &endorser).unwrap();
        let envelope_body = EnvelopeBody {
            header_bytes: vec![],
            payload: body.payload.clone(),
            write_set: body.write_set.clone(),
            proposal_hash: body.proposal_hash,
            endorsements: vec![Endorsement {
                endorser: endorser.certificate(),
                signature: response.signature.clone(),
            }],
        };
        let rebuilt = envelope_body.endorsement_body(&endorser.certificate());
        assert_eq!(rebuilt, body);
    }

    #[test]
    fn request_frames_decode() {
        let request = Request::BlockByTransactionId("tx1".into());
        let bytes = request.try_to_vec().unwrap();
        assert_eq!(Request::try_from_slice(&bytes).unwrap(), request);
    }
}
