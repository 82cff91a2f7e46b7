//! Device emulator
//!
//! Accepts any number of concurrent connections and answers each request
//! with a read-time response or a generic acknowledgement, optionally
//! delayed, corrupted or fragmented for testing the client's recovery.

mod fault;
mod handler;
mod response;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use ttp20_transport::TcpTransport;
use ttp20_types::ServerConfig;

use crate::error::{Error, Result};

pub use fault::{FaultInjector, FaultPlan, split_point};
pub use response::{ack_payload, build_response, read_time_payload};

use handler::ConnectionHandler;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// TTP20 device emulator
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use ttp20::{Server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> ttp20::Result<()> {
///     let config = ServerConfig::new("0.0.0.0", 9000).with_bad_checksum_probability(0.1);
///     let server = Arc::new(Server::bind(config).await?);
///
///     let runner = Arc::clone(&server);
///     let accept = tokio::spawn(async move { runner.start().await });
///
///     tokio::signal::ctrl_c().await?;
///     server.stop().await;
///     accept.await.ok();
///     Ok(())
/// }
/// ```
pub struct Server {
    config: Arc<ServerConfig>,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    stopped: Mutex<bool>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    next_conn_id: AtomicU64,
}

impl Server {
    /// Validate the config and bind the listening socket
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.addr()).await?;
        let local_addr = listener.local_addr()?;

        info!(
            "Listening on {} (checksum={}, delay={:?}, badcrc={}, fragment={})",
            local_addr,
            config.checksum_mode,
            config.response_delay,
            config.bad_checksum_probability,
            config.fragment_probability,
        );

        Ok(Self {
            config: Arc::new(config),
            local_addr,
            listener: Mutex::new(Some(listener)),
            stopped: Mutex::new(false),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            next_conn_id: AtomicU64::new(0),
        })
    }

    /// Bound address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections until `stop`
    ///
    /// Each connection is served on its own tracked task. Returns once
    /// the listener is closed; returns immediately if already stopped.
    pub async fn start(&self) -> Result<()> {
        // Held for the life of the loop so `stop` waits for it
        let _running = self.tasks.token();

        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        let listener = self.listener.lock().take().ok_or(Error::AlreadyStarted)?;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                res = listener.accept() => res,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    if !accept_backoff(&self.shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("[{}] set_nodelay failed: {}", peer, e);
            }

            let conn = match TcpTransport::from_stream(stream) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("[{}] dropped: {}", peer, e);
                    continue;
                }
            };

            info!("Accepted connection from {}", peer);

            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
            let handler = ConnectionHandler::new(
                conn,
                Arc::clone(&self.config),
                FaultInjector::for_connection(&self.config, conn_id),
                self.shutdown.clone(),
            );

            self.tasks.spawn(handler::serve(handler));
        }

        debug!("Accept loop stopped");
        Ok(())
    }

    /// Close the listener and wait for every handler to finish
    ///
    /// Safe to call more than once and before `start`.
    pub async fn stop(&self) {
        let first = !std::mem::replace(&mut *self.stopped.lock(), true);

        if first {
            info!("Closing server, waiting for handlers...");
            self.shutdown.cancel();
        }

        // Never started: release the port now
        drop(self.listener.lock().take());

        self.tasks.close();
        self.tasks.wait().await;

        if first {
            info!("Server stopped");
        }
    }
}

/// Pause after a failed accept; false once shutdown fires
///
/// Persistent errors (e.g. out of descriptors) would spin the loop otherwise.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = sleep(ACCEPT_BACKOFF) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1", 0)
    }

    #[tokio::test]
    async fn test_bind_resolves_port() {
        let server = Server::bind(local_config()).await.unwrap();

        assert_ne!(server.local_addr().port(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = local_config().with_fragment_probability(1.5);

        assert!(matches!(Server::bind(config).await, Err(Error::Types(_))));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let server = Server::bind(local_config()).await.unwrap();

        server.stop().await;
        server.stop().await;

        assert!(server.start().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_backoff_pauses() {
        let shutdown = CancellationToken::new();
        let started = tokio::time::Instant::now();

        assert!(accept_backoff(&shutdown).await);
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_accept_backoff_ends_on_shutdown() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let ended = tokio::time::timeout(ACCEPT_BACKOFF / 2, accept_backoff(&shutdown)).await;

        assert!(matches!(ended, Ok(false)));
    }

    #[tokio::test]
    async fn test_start_twice() {
        let server = Arc::new(Server::bind(local_config()).await.unwrap());

        let runner = Arc::clone(&server);
        let accept = tokio::spawn(async move { runner.start().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(server.start().await, Err(Error::AlreadyStarted)));

        server.stop().await;
        assert!(accept.await.unwrap().is_ok());
    }
}
