//! Per-connection request handling

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ttp20_core::{Command, Frame, corrupt_checksum, extract_frame, hex_dump};
use ttp20_transport::{TcpTransport, Transport};
use ttp20_types::{DeviceTime, ServerConfig};

use super::fault::FaultInjector;
use super::response::build_response;
use crate::error::{Error, Result};

const READ_CHUNK: usize = 1024;

/// State for one accepted connection
pub(crate) struct ConnectionHandler {
    conn: TcpTransport,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    faults: FaultInjector,
    shutdown: CancellationToken,
    buf: BytesMut,
}

impl ConnectionHandler {
    pub(crate) fn new(
        conn: TcpTransport,
        config: Arc<ServerConfig>,
        faults: FaultInjector,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            peer: conn.peer_addr(),
            conn,
            config,
            faults,
            shutdown,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Serve until the peer leaves, idles out, a write fails or shutdown
    async fn run(mut self) -> Result<()> {
        let idle = self.config.idle_read_timeout;

        loop {
            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!("[{}] shutdown, closing", self.peer);
                    return Ok(());
                }
                res = timeout(idle, self.conn.receive(&mut self.buf)) => res,
            };

            match read {
                Err(_) => {
                    info!("[{}] idle for {:?}, closing", self.peer, idle);
                    return Ok(());
                }
                Ok(Err(ttp20_transport::Error::ConnectionClosed)) => {
                    info!("[{}] closed by peer", self.peer);
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(_)) => {}
            }

            while let Some(raw) = extract_frame(&mut self.buf) {
                self.handle_frame(&raw).await?;
            }
        }
    }

    async fn handle_frame(&mut self, raw: &[u8]) -> Result<()> {
        debug!("[{}] RX: {}", self.peer, hex_dump(raw));

        let request = match Frame::decode(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("[{}] frame verification failed: {}", self.peer, e);
                return Ok(());
            }
        };

        if request.address != self.config.adapter_address {
            debug!(
                "[{}] request for adapter 0x{:02X}, emulating 0x{:02X}",
                self.peer, request.address, self.config.adapter_address
            );
        }

        match request.command() {
            Some(Command::ReadTime) => info!(
                "[{}] read-time request (ctrl=0x{:02X}, addr=0x{:02X})",
                self.peer,
                request.control.bits(),
                request.address
            ),
            Some(other) => info!("[{}] {} request, sending ACK", self.peer, other),
            None => info!("[{}] empty request, sending ACK", self.peer),
        }

        let response = build_response(&request, DeviceTime::now());
        self.send_response(&response).await
    }

    /// Encode, delay, apply faults, write
    async fn send_response(&mut self, response: &Frame) -> Result<()> {
        let mode = self.config.checksum_mode;
        let mut bytes = response.encode(mode)?;

        if !self.config.response_delay.is_zero() {
            sleep(self.config.response_delay).await;
        }

        let plan = self.faults.plan(bytes.len());

        if plan.corrupt_checksum && corrupt_checksum(&mut bytes, mode) {
            info!("[{}] injecting bad checksum", self.peer);
        }

        match plan.split_at {
            Some(at) => {
                info!(
                    "[{}] sending fragmented response ({} + {} bytes)",
                    self.peer,
                    at,
                    bytes.len() - at
                );
                self.write(&bytes[..at]).await?;
                sleep(self.config.fragment_pause).await;
                self.write(&bytes[at..]).await?;
            }
            None => self.write(&bytes).await?,
        }

        debug!("[{}] TX: {}", self.peer, hex_dump(&bytes));

        Ok(())
    }

    /// Write one chunk
    ///
    /// A write the socket accepts right away always completes, so responses
    /// already in flight drain on shutdown. A write stalled by a peer that
    /// stopped reading is abandoned on shutdown, or once it has made no
    /// progress for the idle window.
    async fn write(&self, bytes: &[u8]) -> Result<()> {
        tokio::select! {
            biased;
            res = timeout(self.config.idle_read_timeout, self.conn.send(bytes)) => {
                res.map_err(|_| ttp20_transport::Error::WriteTimeout)??;
                Ok(())
            }
            _ = self.shutdown.cancelled() => Err(Error::ShuttingDown),
        }
    }
}

/// Run a handler behind an error boundary
///
/// Errors and panics end only this connection; they are logged here and
/// never reach the accept loop.
pub(crate) async fn serve(handler: ConnectionHandler) {
    let peer = handler.peer;

    match tokio::spawn(handler.run()).await {
        Ok(Ok(())) => {}
        Ok(Err(Error::ShuttingDown)) => debug!("[{}] pending write dropped on shutdown", peer),
        Ok(Err(e)) => warn!("[{}] connection error: {}", peer, e),
        Err(e) if e.is_panic() => {
            error!("[{}] handler panicked: {}", peer, panic_message(e.into_panic()))
        }
        Err(e) => warn!("[{}] handler cancelled: {}", peer, e),
    }

    info!("[{}] connection closed", peer);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
