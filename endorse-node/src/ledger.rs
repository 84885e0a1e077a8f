//! Block sequencing, the transaction index and the world state valid transactions produce.

use crate::kv_store::KVStore;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use endorse_common::{crypto, CommitEvent, Envelope, TransactionId, TxValidation};
use log::{info, warn};

pub struct Ledger {
    height: u64,
    tx_index: HashMap<TransactionId, u64>,
    state: KVStore,
    endorsers: HashSet<Vec<u8>>,
    min_endorsements: usize,
}

impl Ledger {
    /// Starts from the empty genesis block 0. Only `endorsers` count toward the
    /// endorsement policy.
    pub fn new(endorsers: HashSet<Vec<u8>>, min_endorsements: usize) -> Self {
        Self {
            height: 0,
            tx_index: HashMap::new(),
            state: KVStore::new(),
            endorsers,
            min_endorsements,
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn block_by_transaction_id(&self, tx_id: &TransactionId) -> Option<u64> {
        self.tx_index.get(tx_id).copied()
    }

    pub fn state(&self) -> &KVStore {
        &self.state
    }

    /// Validates every envelope in order, applies the valid write sets and
    /// seals them as the next block. Invalid transactions are indexed too, so
    /// their submitters learn the outcome.
    pub fn commit_block(&mut self, envelopes: Vec<Envelope>) -> Vec<CommitEvent> {
        let number = self.height + 1;
        let mut events = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let (tx_id, validation) = match envelope.body.header() {
                Ok(header) => {
                    let validation = self.validate(&header.tx_id, &envelope);
                    (header.tx_id, validation)
                }
                Err(e) => {
                    warn!("block {}: dropping envelope with unreadable header: {}", number, e);
                    continue;
                }
            };
            match &validation {
                TxValidation::Valid => self.state.apply(&envelope.body.write_set),
                TxValidation::Invalid(reason) => {
                    warn!("block {}: {} is invalid: {}", number, tx_id, reason)
                }
            }
            self.tx_index.entry(tx_id.clone()).or_insert(number);
            events.push(CommitEvent {
                tx_id,
                block_number: number,
                validation,
            });
        }

        self.height = number;
        info!(
            "committed block {} with {} transactions ({} valid)",
            number,
            events.len(),
            events.iter().filter(|e| e.validation.is_valid()).count()
        );
        events
    }

    fn validate(&self, tx_id: &TransactionId, envelope: &Envelope) -> TxValidation {
        if self.tx_index.contains_key(tx_id) {
            return TxValidation::Invalid("duplicate transaction id".into());
        }
        let body = &envelope.body;
        if body.proposal_hash != crypto::sha256(&body.header_bytes) {
            return TxValidation::Invalid("proposal hash does not match the header".into());
        }

        let mut endorsed_by = HashSet::new();
        for endorsement in &body.endorsements {
            let signed = match body.endorsement_body(&endorsement.endorser).signing_bytes() {
                Ok(bytes) => bytes,
                Err(e) => return TxValidation::Invalid(e.to_string()),
            };
            if !crypto::verify(&endorsement.endorser, &signed, &endorsement.signature) {
                return TxValidation::Invalid("invalid endorsement signature".into());
            }
            if self.endorsers.contains(&endorsement.endorser) {
                endorsed_by.insert(endorsement.endorser.as_slice());
            }
        }
        if endorsed_by.len() < self.min_endorsements {
            return TxValidation::Invalid(format!(
                "endorsement policy not satisfied: {} of {} required endorsements",
                endorsed_by.len(),
                self.min_endorsements
            ));
        }
        TxValidation::Valid
    }
}

/// `Ledger` behind a lock, shared by every service of the devnet.
#[derive(Clone)]
pub struct SharedLedger(Arc<RwLock<Ledger>>);

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self(Arc::new(RwLock::new(ledger)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Ledger> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Ledger> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}
