//! Transport traits implemented over framed TCP, one borsh `Request` per connection.

use crate::error::TransportError;
use crate::transport::{
    CommitEventSource, CommitStream, EndorserTransport, Endpoint, LedgerQuery, OrdererTransport,
};

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;
use endorse_common::{
    BroadcastAck, CommitEvent, Envelope, ProposalResponse, Request, Response, SignedProposal,
    TransactionId,
};
use endorse_network::client::{self, Subscription};
use futures::StreamExt;
use log::{debug, trace};

const SUBSCRIBE_ATTEMPTS: u32 = 3;

pub struct TcpTransport {
    timeout: Duration,
    /// Peers asked, in order, for block lookups.
    ledger_peers: Vec<Endpoint>,
    event_source: SocketAddr,
}

impl TcpTransport {
    pub fn new(timeout: Duration, ledger_peers: Vec<Endpoint>, event_source: SocketAddr) -> Self {
        Self {
            timeout,
            ledger_peers,
            event_source,
        }
    }

    async fn exchange(
        &self,
        addr: SocketAddr,
        request: &Request,
    ) -> Result<Response, TransportError> {
        let data = request
            .try_to_vec()
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        let reply = client::request(addr, data.into(), self.timeout).await?;
        match decode(&reply)? {
            Response::Error(reason) => Err(TransportError::Rejected(reason)),
            response => Ok(response),
        }
    }

    async fn propose(
        &self,
        peer: &Endpoint,
        request: Request,
    ) -> Result<ProposalResponse, TransportError> {
        match self.exchange(peer.address, &request).await? {
            Response::Proposal(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }
}

#[async_trait]
impl EndorserTransport for TcpTransport {
    async fn endorse(
        &self,
        peer: &Endpoint,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        self.propose(peer, Request::Endorse(proposal.clone())).await
    }

    async fn query(
        &self,
        peer: &Endpoint,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        self.propose(peer, Request::Query(proposal.clone())).await
    }
}

#[async_trait]
impl OrdererTransport for TcpTransport {
    async fn broadcast(
        &self,
        orderer: &Endpoint,
        envelope: &Envelope,
    ) -> Result<BroadcastAck, TransportError> {
        match self
            .exchange(orderer.address, &Request::Broadcast(envelope.clone()))
            .await?
        {
            Response::Broadcast(ack) => Ok(ack),
            other => Err(unexpected(&other)),
        }
    }
}

#[async_trait]
impl LedgerQuery for TcpTransport {
    async fn block_by_transaction_id(
        &self,
        tx_id: &TransactionId,
    ) -> Result<u64, TransportError> {
        let request = Request::BlockByTransactionId(tx_id.clone());
        let mut last_error = TransportError::NotFound;
        for peer in &self.ledger_peers {
            match self.exchange(peer.address, &request).await {
                Ok(Response::BlockNumber(Some(block_number))) => return Ok(block_number),
                Ok(Response::BlockNumber(None)) => last_error = TransportError::NotFound,
                Ok(other) => last_error = unexpected(&other),
                Err(e) => last_error = e,
            }
            trace!("{} could not locate {}: {}", peer, tx_id, last_error);
        }
        Err(last_error)
    }
}

#[async_trait]
impl CommitEventSource for TcpTransport {
    async fn subscribe(&self) -> Result<CommitStream, TransportError> {
        let hello = Request::SubscribeCommits
            .try_to_vec()
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        let (subscription, ack) = Subscription::connect(
            self.event_source,
            Bytes::from(hello),
            SUBSCRIBE_ATTEMPTS,
            self.timeout,
        )
        .await?;
        match decode(&ack)? {
            Response::Subscribed => {}
            Response::Error(reason) => return Err(TransportError::Rejected(reason)),
            other => return Err(unexpected(&other)),
        }
        debug!("subscribed to commit events at {}", subscription.remote_addr());
        Ok(subscription.map(commit_event).boxed())
    }
}

fn commit_event(frame: std::io::Result<Bytes>) -> Result<CommitEvent, TransportError> {
    match decode(&frame?)? {
        Response::Commit(event) => Ok(event),
        Response::Error(reason) => Err(TransportError::Rejected(reason)),
        other => Err(unexpected(&other)),
    }
}

fn decode(data: &[u8]) -> Result<Response, TransportError> {
    Response::try_from_slice(data).map_err(|e| TransportError::Codec(e.to_string()))
}

fn unexpected(response: &Response) -> TransportError {
    let kind = match response {
        Response::Proposal(_) => "proposal response",
        Response::Broadcast(_) => "broadcast ack",
        Response::BlockNumber(_) => "block number",
        Response::Commit(_) => "commit event",
        Response::Subscribed => "subscription ack",
        Response::Error(_) => "error",
    };
    TransportError::UnexpectedResponse(kind.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use endorse_common::TxValidation;
    use endorse_network::{server::Server, ServerEvent};

    fn reply(response: &Response) -> Bytes {
        response.try_to_vec().unwrap().into()
    }

    #[tokio::test]
    async fn ledger_lookup_falls_through_to_the_next_peer() {
        let (first, (first_out, mut first_in)) =
            Server::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (second, (second_out, mut second_in)) =
            Server::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        tokio::spawn(async move {
            if let Some(ServerEvent::Frame(from, _)) = first_in.recv().await {
                first_out.send((from, reply(&Response::BlockNumber(None)))).await.unwrap();
            }
            while first_in.recv().await.is_some() {}
        });
        tokio::spawn(async move {
            if let Some(ServerEvent::Frame(from, data)) = second_in.recv().await {
                let request = Request::try_from_slice(&data).unwrap();
                assert_eq!(request, Request::BlockByTransactionId("tx1".into()));
                second_out.send((from, reply(&Response::BlockNumber(Some(4))))).await.unwrap();
            }
            while second_in.recv().await.is_some() {}
        });

        let transport = TcpTransport::new(
            Duration::from_secs(2),
            vec![Endpoint::new("peer0", first), Endpoint::new("peer1", second)],
            first,
        );
        assert_eq!(transport.block_by_transaction_id(&"tx1".into()).await, Ok(4));
    }

    #[tokio::test]
    async fn error_responses_become_rejections() {
        let (addr, (out, mut events)) =
            Server::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let ServerEvent::Frame(from, _) = event {
                    let _ = out.send((from, reply(&Response::Error("bad signature".into())))).await;
                }
            }
        });
        let transport = TcpTransport::new(Duration::from_secs(2), vec![], addr);
        let err = transport
            .broadcast(
                &Endpoint::new("orderer0", addr),
                &Envelope {
                    body: endorse_common::EnvelopeBody {
                        header_bytes: vec![],
                        payload: vec![],
                        write_set: vec![],
                        proposal_hash: [0; 32],
                        endorsements: vec![],
                    },
                    signature: vec![],
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Rejected("bad signature".into()));
    }

    #[tokio::test]
    async fn subscription_decodes_commit_events() {
        let (addr, (out, mut events)) =
            Server::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let transport = TcpTransport::new(Duration::from_secs(2), vec![], addr);
        let acknowledge = async {
            let Some(ServerEvent::Frame(from, hello)) = events.recv().await else {
                panic!("expected the subscribe frame");
            };
            assert_eq!(
                Request::try_from_slice(&hello).unwrap(),
                Request::SubscribeCommits
            );
            out.send((from, reply(&Response::Subscribed))).await.unwrap();
            from
        };
        let (stream, from) = tokio::join!(transport.subscribe(), acknowledge);
        let mut stream = stream.unwrap();
        let event = CommitEvent {
            tx_id: "tx1".into(),
            block_number: 3,
            validation: TxValidation::Valid,
        };
        out.send((from, reply(&Response::Commit(event.clone())))).await.unwrap();
        out.send((from, Bytes::from_static(b"\xff garbage"))).await.unwrap();

        assert_eq!(stream.next().await, Some(Ok(event)));
        assert!(matches!(stream.next().await, Some(Err(TransportError::Codec(_)))));
    }

    #[tokio::test]
    async fn subscription_refused_by_the_event_source() {
        let (addr, (out, mut events)) =
            Server::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let transport = TcpTransport::new(Duration::from_secs(2), vec![], addr);
        let refuse = async {
            let Some(ServerEvent::Frame(from, _)) = events.recv().await else {
                panic!("expected the subscribe frame");
            };
            let refusal = Response::Error("not serving commits".into());
            out.send((from, reply(&refusal))).await.unwrap();
        };
        let (subscribed, ()) = tokio::join!(transport.subscribe(), refuse);
        assert_eq!(
            subscribed.err(),
            Some(TransportError::Rejected("not serving commits".into()))
        );
    }
}
