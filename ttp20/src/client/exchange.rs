//! One poll cycle: request, bounded retries, decode

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, info, warn};
use ttp20_core::constants::commands;
use ttp20_core::{Command, Frame, extract_frame, hex_dump, payload_data, verify_frame};
use ttp20_transport::Transport;
use ttp20_types::DeviceTime;

use super::ClientInner;
use crate::error::{Error, Result};

const READ_CHUNK: usize = 256;

/// How a poll cycle ended
#[derive(Debug)]
pub enum PollOutcome {
    /// Valid read-time response
    Time(DeviceTime),

    /// Verified response that did not carry a usable time (not retried)
    Rejected(Error),

    /// No verified response within the allowed attempts
    Failed(Error),
}

/// Result of one poll cycle
#[derive(Debug)]
pub struct PollReport {
    /// Attempts made, including the successful one
    pub attempts: u32,
    pub outcome: PollOutcome,
}

impl PollReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PollOutcome::Time(_))
    }

    /// Device time, if the cycle succeeded
    pub fn time(&self) -> Option<DeviceTime> {
        match self.outcome {
            PollOutcome::Time(time) => Some(time),
            _ => None,
        }
    }

    fn failed(attempts: u32, error: Error) -> Self {
        Self {
            attempts,
            outcome: PollOutcome::Failed(error),
        }
    }
}

/// Build the read-time request for the configured adapter
pub fn build_request(address: u8, mode: ttp20_core::ChecksumMode) -> Result<BytesMut> {
    Ok(Frame::request(address, vec![commands::READ_TIME]).encode(mode)?)
}

/// Decode the DATA of a verified response
pub fn decode_time(data: &[u8]) -> Result<DeviceTime> {
    let (&cmd, rest) = data.split_first().ok_or(Error::EmptyPayload)?;

    if Command::from(cmd) != Command::ReadTime {
        return Err(Error::UnexpectedCommand(cmd));
    }

    let raw = String::from_utf8_lossy(rest);
    DeviceTime::parse(&raw).map_err(|_| Error::InvalidTimestamp(raw.into_owned()))
}

/// Run one poll cycle against the shared connection
pub(crate) async fn poll(inner: &ClientInner) -> PollReport {
    let config = &inner.config;

    if let Err(e) = inner.connections.ensure().await {
        warn!("No connection to {}: {}", inner.connections.addr(), e);
        return PollReport::failed(0, e);
    }

    let request = match build_request(config.adapter_address, config.checksum_mode) {
        Ok(request) => request,
        Err(e) => return PollReport::failed(0, e),
    };

    let attempts = config.attempts();
    let mut last_error = Error::NotConnected;

    for attempt in 1..=attempts {
        if inner.shutdown.is_cancelled() {
            return PollReport::failed(attempt - 1, Error::ShuttingDown);
        }

        if attempt > 1 {
            debug!("Retry {}/{}", attempt - 1, config.retry_count);
        }

        let conn = match inner.connections.current() {
            Some(conn) => conn,
            None => {
                warn!("Attempt {}: not connected", attempt);
                last_error = Error::NotConnected;
                recover(inner, None).await;
                continue;
            }
        };

        debug!("TX request: {}", hex_dump(&request));

        if let Err(e) = send_request(&*conn, &request, config.response_timeout).await {
            warn!("Write error: {}", e);
            last_error = e;
            recover(inner, Some(&conn)).await;
            continue;
        }

        let raw = match read_frame(&*conn, Instant::now() + config.response_timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Read error/timeout: {}", e);
                last_error = e;
                recover(inner, Some(&conn)).await;
                continue;
            }
        };

        debug!("RX response: {}", hex_dump(&raw));

        // Damaged frames are retried on the same connection
        if let Err(e) = verify_frame(&raw) {
            warn!("Frame verification failed: {}", e);
            last_error = e.into();
            continue;
        }

        let outcome = match payload_data(&raw).map_err(Error::from).and_then(decode_time) {
            Ok(time) => {
                info!("Device time: {}", time);
                PollOutcome::Time(time)
            }
            // Well-formed but unusable: asking again gets the same answer
            Err(e) if e.is_decode_error() => {
                warn!("{}", e);
                PollOutcome::Rejected(e)
            }
            Err(e) => {
                warn!("Malformed response: {}", e);
                last_error = e;
                continue;
            }
        };

        return PollReport { attempts: attempt, outcome };
    }

    warn!("All {} attempts failed, last error: {}", attempts, last_error);
    PollReport::failed(attempts, last_error)
}

async fn send_request(conn: &dyn Transport, request: &[u8], limit: Duration) -> Result<()> {
    timeout(limit, conn.send(request))
        .await
        .map_err(|_| ttp20_transport::Error::WriteTimeout)??;
    Ok(())
}

/// Read until one complete frame arrives or `deadline` passes
///
/// The deadline is absolute: partial reads do not extend it.
async fn read_frame(conn: &dyn Transport, deadline: Instant) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        if let Some(frame) = extract_frame(&mut buf) {
            return Ok(frame);
        }

        timeout_at(deadline, conn.receive(&mut buf))
            .await
            .map_err(|_| ttp20_transport::Error::ReadTimeout)??;
    }
}

/// Redial after a connection failure, then back off
async fn recover(inner: &ClientInner, stale: Option<&Arc<dyn Transport>>) {
    // Failure is already logged by the manager; the next attempt reports it
    let _ = inner.connections.reconnect(stale).await;

    tokio::select! {
        _ = inner.shutdown.cancelled() => {}
        _ = sleep(inner.config.retry_backoff) => {}
    }
}
