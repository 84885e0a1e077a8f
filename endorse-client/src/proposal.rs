use crate::error::ProposalError;

use std::collections::BTreeMap;

use borsh::BorshSerialize;
use chrono::Utc;
use endorse_common::{
    crypto::{self, Identity},
    Digest, ProposalHeader, SignedProposal, TransactionId,
};
use rand::{thread_rng, Rng};

/// Transient keys starting with this prefix belong to the protocol.
pub const RESERVED_TRANSIENT_PREFIX: &str = "__";

const NONCE_LEN: usize = 24;

/// A proposal ready to be signed and sent. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionProposal {
    header: ProposalHeader,
    header_bytes: Vec<u8>,
    transient: BTreeMap<String, Vec<u8>>,
}

impl TransactionProposal {
    pub fn builder(
        chaincode_id: impl Into<String>,
        function: impl Into<String>,
    ) -> ProposalBuilder {
        ProposalBuilder {
            chaincode_id: chaincode_id.into(),
            function: function.into(),
            args: Vec::new(),
            transient: BTreeMap::new(),
        }
    }

    pub fn tx_id(&self) -> &TransactionId {
        &self.header.tx_id
    }

    pub fn header(&self) -> &ProposalHeader {
        &self.header
    }

    pub fn header_bytes(&self) -> &[u8] {
        &self.header_bytes
    }

    pub fn transient(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.transient
    }

    pub fn proposal_hash(&self) -> Digest {
        crypto::sha256(&self.header_bytes)
    }

    pub fn sign(&self, identity: &dyn Identity) -> SignedProposal {
        SignedProposal {
            header_bytes: self.header_bytes.clone(),
            transient: self.transient.clone(),
            signature: identity.sign(&self.header_bytes),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProposalBuilder {
    chaincode_id: String,
    function: String,
    args: Vec<Vec<u8>>,
    transient: BTreeMap<String, Vec<u8>>,
}

impl ProposalBuilder {
    pub fn arg(mut self, arg: impl Into<Vec<u8>>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn transient(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.transient.insert(key.into(), value.into());
        self
    }

    /// Validates the request and stamps it with a fresh nonce, transaction id and timestamp.
    pub fn build(self, identity: &dyn Identity) -> Result<TransactionProposal, ProposalError> {
        if self.chaincode_id.is_empty() {
            return Err(ProposalError::EmptyChaincodeId);
        }
        if self.function.is_empty() {
            return Err(ProposalError::EmptyFunction);
        }
        if let Some(key) = self
            .transient
            .keys()
            .find(|key| key.starts_with(RESERVED_TRANSIENT_PREFIX))
        {
            return Err(ProposalError::ReservedTransientKey(key.clone()));
        }

        let creator = identity.certificate();
        let nonce = generate_random_bytes(NONCE_LEN);
        let header = ProposalHeader {
            tx_id: TransactionId::derive(&nonce, &creator),
            chaincode_id: self.chaincode_id,
            function: self.function,
            args: self.args,
            creator,
            nonce,
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        let header_bytes = header
            .try_to_vec()
            .map_err(|e| ProposalError::Encoding(e.to_string()))?;
        Ok(TransactionProposal {
            header,
            header_bytes,
            transient: self.transient,
        })
    }
}

fn generate_random_bytes(length: usize) -> Vec<u8> {
    let mut rng = thread_rng();
    let mut result = vec![0; length];
    rng.fill(&mut result[..]);
    result
}
