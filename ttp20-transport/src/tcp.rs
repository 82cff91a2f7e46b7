//! TCP transport

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use ttp20_core::hex_dump;

use crate::{Transport, error::*};

/// TCP connection
///
/// The stream is split so a write never waits behind a pending read.
/// Closing cancels any in-flight read or write immediately; the socket
/// itself is released when the last handle is dropped.
pub struct TcpTransport {
    peer: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: CancellationToken,
}

impl TcpTransport {
    /// Dial `addr` ("host:port"), giving up after `connect_timeout`
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<Self> {
        let socket_addr = resolve_addr(addr).await?;

        debug!("Connecting to {}...", socket_addr);

        let stream = timeout(connect_timeout, TcpStream::connect(socket_addr))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::Io)?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        debug!("Connected to {}", socket_addr);

        Self::from_stream(stream)
    }

    /// Wrap an accepted stream
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
        })
    }

    /// Remote socket address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Resolve "host:port" to the first matching SocketAddr
async fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr, e)))?;

    addrs
        .next()
        .ok_or_else(|| Error::InvalidAddress(format!("No addresses found for {}", addr)))
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }

        let mut writer = self.writer.lock().await;

        trace!("Sending {} bytes: {}", data.len(), hex_dump(data));

        tokio::select! {
            _ = self.closed.cancelled() => Err(Error::Closed),
            res = async {
                writer.write_all(data).await?;
                writer.flush().await
            } => res.map_err(Error::Io),
        }
    }

    async fn receive(&self, buf: &mut BytesMut) -> Result<usize> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }

        let mut reader = self.reader.lock().await;

        let n = tokio::select! {
            _ = self.closed.cancelled() => return Err(Error::Closed),
            res = reader.read_buf(buf) => res?,
        };

        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        trace!("Received {} bytes: {}", n, hex_dump(&buf[buf.len() - n..]));

        Ok(n)
    }

    fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!("Closing connection to {}", self.peer);
            self.closed.cancel();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn remote_addr(&self) -> String {
        self.peer.to_string()
    }
}
