use crate::common::{framed, Reader, ServerChannel, ServerEvent, Writer};

use std::collections::{hash_map::Entry, HashMap};
use std::io::Result;
use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{error, trace, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{channel, Receiver, Sender},
};

pub struct Server {
    listener: TcpListener,
    events: Sender<ServerEvent>,
    receiver: Receiver<(SocketAddr, Bytes)>,
    closed_sender: Sender<SocketAddr>,
    closed_receiver: Receiver<SocketAddr>,
    connections: HashMap<SocketAddr, Sender<Bytes>>,
}

impl Server {
    /// Binds `host_addr` and spawns the accept loop. Returns the bound address
    /// (useful with port 0) and the channel pair used to talk to clients.
    pub async fn spawn(host_addr: SocketAddr) -> Result<(SocketAddr, ServerChannel)> {
        let listener = TcpListener::bind(host_addr).await?;
        let local_addr = listener.local_addr()?;
        let (events, ret_receiver) = channel(1000);
        let (ret_sender, receiver) = channel(1000);
        let (closed_sender, closed_receiver) = channel(100);
        tokio::spawn(async move {
            Self {
                listener,
                events,
                receiver,
                closed_sender,
                closed_receiver,
                connections: Default::default(),
            }
            .run()
            .await;
        });
        Ok((local_addr, (ret_sender, ret_receiver)))
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                connection = self.listener.accept() => {
                    match connection {
                        Ok((socket, addr)) => {
                            trace!("accept connection from {}", addr);
                            let (sender, receiver) = channel(1000);
                            self.connections.insert(addr, sender);
                            Connection::spawn(
                                addr,
                                socket,
                                self.events.clone(),
                                self.closed_sender.clone(),
                                receiver,
                            );
                        }
                        Err(e) => error!("couldn't get client: {e:?}"),
                    }
                }
                Some(addr) = self.closed_receiver.recv() => {
                    self.connections.remove(&addr);
                    if self.events.send(ServerEvent::Closed(addr)).await.is_err() {
                        return;
                    }
                }
                outgoing = self.receiver.recv() => {
                    let Some((addr, msg)) = outgoing else {
                        trace!("server owner dropped, stop accepting");
                        return;
                    };
                    match self.connections.entry(addr) {
                        Entry::Occupied(mut entry) => {
                            trace!("sending msg to {}", addr);
                            if let Err(e) = entry.get_mut().send(msg).await {
                                warn!("Disconnected from {}: {}", addr, e);
                                entry.remove();
                            }
                        }
                        Entry::Vacant(_) => warn!("No connection from {}", addr),
                    }
                }
            }
        }
    }
}

struct Connection {
    events: Sender<ServerEvent>,
    closed: Sender<SocketAddr>,
    receiver: Receiver<Bytes>,
    remote_addr: SocketAddr,
    reader: Reader,
    writer: Writer,
}

impl Connection {
    fn spawn(
        remote_addr: SocketAddr,
        socket: TcpStream,
        events: Sender<ServerEvent>,
        closed: Sender<SocketAddr>,
        receiver: Receiver<Bytes>,
    ) {
        let (writer, reader) = framed(socket).split();
        tokio::spawn(async move {
            Self {
                events,
                closed,
                receiver,
                remote_addr,
                reader,
                writer,
            }
            .run()
            .await
        });
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                framed_data = self.reader.next() => {
                    match framed_data {
                        Some(Ok(data)) => {
                            trace!("received msg from: {}", self.remote_addr);
                            let event = ServerEvent::Frame(self.remote_addr, data.freeze());
                            if self.events.send(event).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("bad frame from {}: {}", self.remote_addr, e);
                            break;
                        }
                        None => {
                            trace!("{} closed the connection", self.remote_addr);
                            break;
                        }
                    }
                },
                outgoing = self.receiver.recv() => {
                    let Some(data) = outgoing else {
                        break;
                    };
                    if let Err(e) = self.writer.send(data).await {
                        warn!("Disconnected from {}: {}", self.remote_addr, e);
                        break;
                    }
                }
            }
        }
        let _ = self.closed.send(self.remote_addr).await;
    }
}
