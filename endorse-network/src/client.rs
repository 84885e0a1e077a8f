use crate::common::{framed, Reader, Writer};

use std::cmp;
use std::io::{Error, ErrorKind, Result};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, Stream, StreamExt};
use log::{trace, warn};
use tokio::{net::TcpStream, time};

/// Sends one frame to `addr` over a fresh connection and waits for one frame back.
pub async fn request(addr: SocketAddr, data: Bytes, timeout: Duration) -> Result<Bytes> {
    let exchange = async {
        let stream = TcpStream::connect(addr).await?;
        let mut framed = framed(stream);
        trace!("send request to {}", addr);
        framed.send(data).await?;
        match framed.next().await {
            Some(frame) => Ok(frame?.freeze()),
            None => Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("{addr} closed the connection before replying"),
            )),
        }
    };
    time::timeout(timeout, exchange).await.map_err(|_| {
        Error::new(
            ErrorKind::TimedOut,
            format!("request to {addr} timed out after {timeout:?}"),
        )
    })?
}

/// A long-lived connection that yields every frame the remote pushes.
///
/// The stream ends (or yields an error) when the connection breaks; it never
/// reconnects on its own, so the owner learns about every gap. Open a new
/// subscription to restart.
pub struct Subscription {
    remote_addr: SocketAddr,
    reader: Reader,
    // Held so the remote does not see a half-closed socket.
    _writer: Writer,
}

impl Subscription {
    /// Connects to `remote_addr`, retrying up to `attempts` times with an
    /// increasing delay, sends `hello` as the first frame and waits up to
    /// `timeout` for the remote's first frame in return.
    ///
    /// That reply acknowledges the hello and is handed back to the caller;
    /// every frame the stream yields afterwards was sent after it.
    pub async fn connect(
        remote_addr: SocketAddr,
        hello: Bytes,
        attempts: u32,
        timeout: Duration,
    ) -> Result<(Self, Bytes)> {
        let mut delay = 200;
        let mut retry = 0;
        loop {
            match TcpStream::connect(remote_addr).await {
                Ok(stream) => {
                    trace!("Outgoing connection established with {}", remote_addr);
                    let (mut writer, mut reader) = framed(stream).split();
                    writer.send(hello).await?;
                    let ack = match time::timeout(timeout, reader.next()).await {
                        Ok(Some(frame)) => frame?.freeze(),
                        Ok(None) => {
                            return Err(Error::new(
                                ErrorKind::UnexpectedEof,
                                format!("{remote_addr} closed the connection before acknowledging"),
                            ))
                        }
                        Err(_) => {
                            return Err(Error::new(
                                ErrorKind::TimedOut,
                                format!("{remote_addr} did not acknowledge within {timeout:?}"),
                            ))
                        }
                    };
                    let subscription = Self {
                        remote_addr,
                        reader,
                        _writer: writer,
                    };
                    return Ok((subscription, ack));
                }
                Err(e) if retry + 1 < attempts => {
                    warn!(
                        "connect to {}, retry {} times, reason {}",
                        remote_addr, retry, e
                    );
                    time::sleep(Duration::from_millis(delay)).await;
                    delay = cmp::min(2 * delay, 60_000);
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl Stream for Subscription {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.reader
            .poll_next_unpin(cx)
            .map(|frame| frame.map(|data| data.map(BytesMut::freeze)))
    }
}
