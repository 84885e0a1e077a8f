use crate::endorsement::EndorsementResponse;
use crate::error::ConsistencyError;

use endorse_common::{Digest, KvWrite};
use log::{debug, warn};

/// Successful endorsements that agree byte for byte. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencySet {
    responses: Vec<EndorsementResponse>,
}

impl ConsistencySet {
    /// Any member stands for the whole set: they are identical where it matters.
    pub fn representative(&self) -> &EndorsementResponse {
        &self.responses[0]
    }

    pub fn responses(&self) -> &[EndorsementResponse] {
        &self.responses
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.representative().payload
    }

    pub fn write_set(&self) -> &[KvWrite] {
        &self.representative().write_set
    }

    pub fn proposal_hash(&self) -> Digest {
        self.representative().proposal_hash
    }

    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.responses.iter().map(|r| r.peer.as_str())
    }
}

/// Groups successful responses by exact agreement and requires a single group.
///
/// Failed responses are left out of the comparison (and logged). More than one
/// group means endorsers diverged: this is a hard stop, never settled by majority.
pub fn verify(responses: Vec<EndorsementResponse>) -> Result<ConsistencySet, ConsistencyError> {
    let (succeeded, failed): (Vec<_>, Vec<_>) = responses
        .into_iter()
        .partition(EndorsementResponse::is_success);
    for response in &failed {
        warn!(
            "excluding endorsement from {}: {}",
            response.peer, response.status
        );
    }
    if succeeded.is_empty() {
        return Err(if failed.is_empty() {
            ConsistencyError::NoSuccessfulEndorsements
        } else {
            ConsistencyError::AllEndorsementsFailed { failures: failed }
        });
    }

    // Sets appear in the order of their first member, so the outcome only
    // depends on the peer list.
    let mut sets: Vec<ConsistencySet> = Vec::new();
    for response in succeeded {
        match sets
            .iter_mut()
            .find(|set| set.representative().agrees_with(&response))
        {
            Some(set) => set.responses.push(response),
            None => sets.push(ConsistencySet {
                responses: vec![response],
            }),
        }
    }

    if sets.len() == 1 {
        let set = sets.swap_remove(0);
        debug!("{} endorsements agree", set.len());
        Ok(set)
    } else {
        warn!("endorsers diverged into {} result sets", sets.len());
        Err(ConsistencyError::EndorsementMismatch { sets })
    }
}

/// `verify`, then insists that at least `quorum` endorsers are in the agreeing set.
pub fn verify_with_quorum(
    responses: Vec<EndorsementResponse>,
    quorum: usize,
) -> Result<ConsistencySet, ConsistencyError> {
    let set = verify(responses)?;
    if set.len() < quorum {
        return Err(ConsistencyError::InsufficientEndorsements {
            required: quorum,
            got: set.len(),
        });
    }
    Ok(set)
}
