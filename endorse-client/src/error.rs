use crate::consistency::ConsistencySet;
use crate::endorsement::EndorsementResponse;

use std::fmt;
use std::io;

use endorse_common::{Status, TransactionId};
use thiserror::Error;

/// Failure talking to a single remote node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed message: {0}")]
    Codec(String),
    #[error("connection closed")]
    Closed,
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("not found")]
    NotFound,
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => Self::Closed,
            _ => Self::Io(e.to_string()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProposalError {
    #[error("chaincode id must not be empty")]
    EmptyChaincodeId,
    #[error("function name must not be empty")]
    EmptyFunction,
    #[error("transient key `{0}` collides with reserved protocol metadata")]
    ReservedTransientKey(String),
    #[error("cannot encode proposal: {0}")]
    Encoding(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndorseError {
    #[error("no endorsing peers given")]
    NoPeers,
    #[error("no endorsing peer reachable ({} tried)", .failures.len())]
    NoPeersReachable {
        failures: Vec<(String, TransportError)>,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("all {} endorsements failed", .failures.len())]
    AllEndorsementsFailed { failures: Vec<EndorsementResponse> },
    #[error("no successful endorsements")]
    NoSuccessfulEndorsements,
    #[error("endorsers disagree: {} conflicting result sets", .sets.len())]
    EndorsementMismatch { sets: Vec<ConsistencySet> },
    #[error("{got} agreeing endorsements, {required} required")]
    InsufficientEndorsements { required: usize, got: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("no orderers given")]
    NoOrderers,
    #[error("cannot build envelope: {0}")]
    Envelope(String),
    #[error("no orderer accepted the envelope ({} tried)", .failures.len())]
    OrdererUnreachable {
        failures: Vec<(String, TransportError)>,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("cannot subscribe to commit events: {0}")]
    Subscribe(TransportError),
    #[error("transaction {tx_id} was not committed before the deadline")]
    CommitTimeout { tx_id: TransactionId },
    #[error("commit watch for {tx_id} failed: {reason}")]
    WatchStreamFailure { tx_id: TransactionId, reason: String },
    #[error("transaction {tx_id} was invalidated by the ledger: {reason}")]
    Invalidated { tx_id: TransactionId, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no query peers given")]
    NoPeers,
    #[error("no peer returned a successful response ({} tried)", .failures.len())]
    NoSuccessfulResponse { failures: Vec<(String, Status)> },
}

/// Pipeline phase a `TransactionError` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Proposal,
    Endorsement,
    Consistency,
    Ordering,
    Commit,
    Query,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Proposal => "proposal",
            Self::Endorsement => "endorsement",
            Self::Consistency => "consistency",
            Self::Ordering => "ordering",
            Self::Commit => "commit",
            Self::Query => "query",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("proposal stage failed: {0}")]
    Proposal(#[from] ProposalError),
    #[error("endorsement stage failed: {0}")]
    Endorsement(#[from] EndorseError),
    #[error("consistency stage failed: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error("ordering stage failed: {0}")]
    Ordering(#[from] OrderError),
    #[error("commit stage failed: {0}")]
    Commit(#[from] CommitError),
    #[error("query failed: {0}")]
    Query(#[from] QueryError),
}

impl TransactionError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Proposal(_) => Stage::Proposal,
            Self::Endorsement(_) => Stage::Endorsement,
            Self::Consistency(_) => Stage::Consistency,
            Self::Ordering(_) => Stage::Ordering,
            Self::Commit(_) => Stage::Commit,
            Self::Query(_) => Stage::Query,
        }
    }

    /// Whether proposing again (always under a fresh transaction id) can help.
    /// Disagreement between endorsers and malformed proposals never heal by retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Proposal(_) => false,
            Self::Endorsement(_) => true,
            Self::Consistency(_) => false,
            Self::Ordering(OrderError::OrdererUnreachable { .. }) => true,
            Self::Ordering(_) => false,
            Self::Commit(CommitError::Invalidated { .. }) => false,
            Self::Commit(_) => true,
            Self::Query(QueryError::NoSuccessfulResponse { .. }) => true,
            Self::Query(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tags() {
        let mismatch: TransactionError =
            ConsistencyError::EndorsementMismatch { sets: vec![] }.into();
        assert_eq!(mismatch.stage(), Stage::Consistency);
        assert!(!mismatch.is_retryable());

        let unreachable: TransactionError =
            OrderError::OrdererUnreachable { failures: vec![] }.into();
        assert_eq!(unreachable.stage(), Stage::Ordering);
        assert!(unreachable.is_retryable());

        let reserved: TransactionError =
            ProposalError::ReservedTransientKey("__tx_id".into()).into();
        assert_eq!(reserved.stage(), Stage::Proposal);
        assert!(!reserved.is_retryable());

        let timeout: TransactionError = CommitError::CommitTimeout {
            tx_id: "tx1".into(),
        }
        .into();
        assert_eq!(timeout.stage(), Stage::Commit);
        assert!(timeout.is_retryable());
        assert_eq!(
            timeout.to_string(),
            "commit stage failed: transaction tx1 was not committed before the deadline"
        );
    }
}
