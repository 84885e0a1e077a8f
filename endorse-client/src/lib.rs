pub mod commit;
pub mod config;
pub mod consistency;
pub mod endorsement;
pub mod error;
pub mod network;
pub mod orderer;
pub mod proposal;
pub mod query;
pub mod session;
pub mod transport;

pub use commit::{CommitFailure, CommitHandle, CommitStatus, CommitWatcher};
pub use config::ClientConfig;
pub use consistency::{verify, ConsistencySet};
pub use endorsement::{EndorsementResponse, Endorser};
pub use error::{
    CommitError, ConsistencyError, EndorseError, OrderError, ProposalError, QueryError, Stage,
    TransactionError, TransportError,
};
pub use network::TcpTransport;
pub use orderer::OrdererSubmitter;
pub use proposal::{ProposalBuilder, TransactionProposal};
pub use query::{QueryClient, QueryResult};
pub use session::{CommittedTransaction, Session, SubmittedTransaction, Transports};
pub use transport::Endpoint;
