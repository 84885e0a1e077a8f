use std::collections::HashSet;
use std::net::SocketAddr;

use anyhow::Result;
use borsh::{BorshDeserialize, BorshSerialize};
use bytes::Bytes;
use endorse_common::{CommitEvent, Request, Response};
use endorse_network::{server::Server, ServerEvent};
use log::{debug, error, trace, warn};
use tokio::sync::mpsc::{Receiver, Sender};

/// Pushes every commit event to every connection that asked for them.
pub struct EventService {
    commits: Receiver<CommitEvent>,
    net_sender: Sender<(SocketAddr, Bytes)>,
    net_receiver: Receiver<ServerEvent>,
    subscribers: HashSet<SocketAddr>,
}

impl EventService {
    pub async fn spawn(
        listen_addr: SocketAddr,
        commits: Receiver<CommitEvent>,
    ) -> Result<SocketAddr> {
        let (local_addr, (net_sender, net_receiver)) = Server::spawn(listen_addr).await?;
        debug!("commit events served on {}", local_addr);
        tokio::spawn(async move {
            Self {
                commits,
                net_sender,
                net_receiver,
                subscribers: Default::default(),
            }
            .run()
            .await
        });
        Ok(local_addr)
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                Some(event) = self.net_receiver.recv() => match event {
                    ServerEvent::Frame(addr, data) => self.on_request(addr, &data).await,
                    ServerEvent::Closed(addr) => {
                        if self.subscribers.remove(&addr) {
                            debug!("subscriber {} went away", addr);
                        }
                    }
                },
                commit = self.commits.recv() => {
                    let Some(commit) = commit else {
                        debug!("orderer stopped, closing the event source");
                        return;
                    };
                    self.publish(commit).await;
                }
            }
        }
    }

    async fn on_request(&mut self, addr: SocketAddr, data: &[u8]) {
        match Request::try_from_slice(data) {
            Ok(Request::SubscribeCommits) => {
                trace!("{} subscribed to commit events", addr);
                self.subscribers.insert(addr);
                self.reply(addr, &Response::Subscribed).await;
            }
            Ok(_) => {
                let refusal = Response::Error("only commit subscriptions are served here".into());
                self.reply(addr, &refusal).await
            }
            Err(e) => warn!("malformed request from {}: {}", addr, e),
        }
    }

    async fn publish(&mut self, commit: CommitEvent) {
        trace!(
            "publishing {} (block {}) to {} subscribers",
            commit.tx_id,
            commit.block_number,
            self.subscribers.len()
        );
        let response = Response::Commit(commit);
        let subscribers: Vec<_> = self.subscribers.iter().copied().collect();
        for addr in subscribers {
            self.reply(addr, &response).await;
        }
    }

    async fn reply(&self, addr: SocketAddr, response: &Response) {
        let data = match response.try_to_vec() {
            Ok(data) => data,
            Err(e) => {
                error!("cannot encode response: {}", e);
                return;
            }
        };
        if self.net_sender.send((addr, data.into())).await.is_err() {
            warn!("event server stopped, dropping message to {}", addr);
        }
    }
}
