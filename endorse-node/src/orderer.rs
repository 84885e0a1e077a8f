use crate::ledger::SharedLedger;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;
use endorse_common::{BroadcastAck, CommitEvent, Envelope, Request, Response, TransactionId};
use endorse_network::{server::Server, ServerEvent};
use log::{debug, error, trace, warn};
use tokio::{
    sync::mpsc::{Receiver, Sender},
    time::{self, MissedTickBehavior},
};

/// Solo ordering service: queues accepted envelopes and cuts them into a block
/// every `batch_timeout`, or as soon as `max_batch_size` are waiting.
pub struct OrdererService {
    ledger: SharedLedger,
    commits: Sender<CommitEvent>,
    batch_timeout: Duration,
    max_batch_size: usize,
    pending: Vec<Envelope>,
    queued: HashSet<TransactionId>,
}

impl OrdererService {
    pub fn new(
        ledger: SharedLedger,
        commits: Sender<CommitEvent>,
        batch_timeout: Duration,
        max_batch_size: usize,
    ) -> Self {
        Self {
            ledger,
            commits,
            batch_timeout,
            max_batch_size,
            pending: Vec::new(),
            queued: HashSet::new(),
        }
    }

    pub async fn spawn(self, listen_addr: SocketAddr) -> Result<SocketAddr> {
        let (local_addr, channel) = Server::spawn(listen_addr).await?;
        debug!("orderer listening on {}", local_addr);
        tokio::spawn(async move {
            let mut service = self;
            service.run(channel.0, channel.1).await
        });
        Ok(local_addr)
    }

    async fn run(
        &mut self,
        net_sender: Sender<(SocketAddr, Bytes)>,
        mut net_receiver: Receiver<ServerEvent>,
    ) {
        let mut batch_timer = time::interval(self.batch_timeout);
        batch_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = net_receiver.recv() => {
                    let Some(event) = event else {
                        return;
                    };
                    let ServerEvent::Frame(addr, data) = event else {
                        continue;
                    };
                    let response = match Request::try_from_slice(&data) {
                        Ok(Request::Broadcast(envelope)) => {
                            Response::Broadcast(self.accept(envelope))
                        }
                        Ok(_) => Response::Error("the orderer only accepts broadcasts".into()),
                        Err(e) => {
                            warn!("malformed request from {}: {}", addr, e);
                            Response::Error(format!("malformed request: {e}"))
                        }
                    };
                    match response.try_to_vec() {
                        Ok(reply) => {
                            if net_sender.send((addr, reply.into())).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => error!("cannot encode response: {}", e),
                    }
                    if self.pending.len() >= self.max_batch_size {
                        self.cut_block().await;
                        batch_timer.reset();
                    }
                }
                _ = batch_timer.tick() => {
                    if !self.pending.is_empty() {
                        self.cut_block().await;
                    }
                }
            }
        }
    }

    /// Admits an envelope signed by its proposal's creator, once per transaction id.
    pub fn accept(&mut self, envelope: Envelope) -> BroadcastAck {
        let header = match envelope.body.header() {
            Ok(header) => header,
            Err(e) => return BroadcastAck::Rejected(format!("unreadable header: {e}")),
        };
        if !envelope.verify_signature(&header.creator) {
            return BroadcastAck::Rejected("invalid submitter signature".into());
        }
        if self.queued.contains(&header.tx_id)
            || self
                .ledger
                .read()
                .block_by_transaction_id(&header.tx_id)
                .is_some()
        {
            return BroadcastAck::Rejected(format!("{} already ordered", header.tx_id));
        }
        trace!("queued {}", header.tx_id);
        self.queued.insert(header.tx_id);
        self.pending.push(envelope);
        BroadcastAck::Accepted
    }

    /// Commits everything pending as one block and forwards the resulting events.
    pub async fn cut_block(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        self.queued.clear();
        let events = self.ledger.write().commit_block(batch);
        for event in events {
            if self.commits.send(event).await.is_err() {
                warn!("commit event source is gone");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;

    use endorse_common::{
        crypto::{self, Identity, KeypairIdentity},
        EnvelopeBody, ProposalHeader,
    };
    use tokio::sync::mpsc::channel;

    fn envelope(client: &KeypairIdentity, tx_id: &str) -> Envelope {
        let header = ProposalHeader {
            tx_id: tx_id.into(),
            chaincode_id: "demo".into(),
            function: "put".into(),
            args: vec![],
            creator: client.certificate(),
            nonce: vec![],
            timestamp_ms: 0,
        };
        let header_bytes = header.try_to_vec().unwrap();
        let body = EnvelopeBody {
            proposal_hash: crypto::sha256(&header_bytes),
            header_bytes,
            payload: vec![],
            write_set: vec![],
            endorsements: vec![],
        };
        Envelope::sign(body, client).unwrap()
    }

    #[tokio::test]
    async fn dedupes_and_cuts_blocks_in_order() {
        let ledger = SharedLedger::new(Ledger::new(Default::default(), 0));
        let (commits, mut events) = channel(16);
        let mut orderer = OrdererService::new(ledger.clone(), commits, Duration::from_secs(1), 10);
        let client = KeypairIdentity::generate();

        assert_eq!(orderer.accept(envelope(&client, "tx1")), BroadcastAck::Accepted);
        assert_eq!(orderer.accept(envelope(&client, "tx2")), BroadcastAck::Accepted);
        assert!(matches!(
            orderer.accept(envelope(&client, "tx1")),
            BroadcastAck::Rejected(_)
        ));
        orderer.cut_block().await;

        for expected in ["tx1", "tx2"] {
            let event = events.recv().await.unwrap();
            assert_eq!(event.tx_id, TransactionId::from(expected));
            assert_eq!(event.block_number, 1);
        }
        assert!(matches!(
            orderer.accept(envelope(&client, "tx2")),
            BroadcastAck::Rejected(_)
        ));
        assert_eq!(ledger.read().height(), 1);
    }

    #[tokio::test]
    async fn rejects_envelopes_not_signed_by_the_creator() {
        let ledger = SharedLedger::new(Ledger::new(Default::default(), 0));
        let (commits, _events) = channel(1);
        let mut orderer = OrdererService::new(ledger, commits, Duration::from_secs(1), 10);
        let mut forged = envelope(&KeypairIdentity::generate(), "tx1");
        forged.signature = KeypairIdentity::generate().sign(b"something else");
        assert_eq!(
            orderer.accept(forged),
            BroadcastAck::Rejected("invalid submitter signature".into())
        );
    }
}
