use std::net::SocketAddr;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use tokio::{
    net::TcpStream,
    sync::mpsc::{Receiver, Sender},
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Convenient alias for the writer end of the TCP channel.
pub type Writer = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;
pub type Reader = SplitStream<Framed<TcpStream, LengthDelimitedCodec>>;

/// What a listening server reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Frame(SocketAddr, Bytes),
    Closed(SocketAddr),
}

/// Outgoing frames addressed by remote address, and inbound server events.
pub type ServerChannel = (Sender<(SocketAddr, Bytes)>, Receiver<ServerEvent>);

pub fn framed(stream: TcpStream) -> Framed<TcpStream, LengthDelimitedCodec> {
    Framed::new(stream, LengthDelimitedCodec::new())
}
