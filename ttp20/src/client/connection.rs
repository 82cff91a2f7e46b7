//! Shared connection ownership

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ttp20_transport::{TcpTransport, Transport};

use crate::error::{Error, Result};

/// Owns the client's single connection
///
/// Readers take a cheap `Arc` snapshot under a short state lock and never
/// hold it across I/O. Dialing is serialized by a separate async lock, so a
/// slow connect attempt never blocks a caller that only wants a snapshot.
pub struct ConnectionManager {
    addr: String,
    connect_timeout: Duration,
    state: Mutex<Option<Arc<dyn Transport>>>,
    dial_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        addr: impl Into<String>,
        connect_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            state: Mutex::new(None),
            dial_lock: tokio::sync::Mutex::new(()),
            shutdown,
        }
    }

    /// Target address ("host:port")
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Snapshot of the current connection
    pub fn current(&self) -> Option<Arc<dyn Transport>> {
        self.state.lock().clone()
    }

    /// Check if a live connection is installed
    pub fn is_connected(&self) -> bool {
        self.current().is_some_and(|conn| !conn.is_closed())
    }

    /// Dial and install a connection, replacing any existing one
    pub async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let _dial = self.dial_lock.lock().await;
        self.dial().await
    }

    /// Replace a failed connection
    ///
    /// `stale` is the connection the caller saw fail. If another task has
    /// already swapped in a live replacement, that one is returned and no
    /// new dial happens.
    pub async fn reconnect(
        &self,
        stale: Option<&Arc<dyn Transport>>,
    ) -> Result<Arc<dyn Transport>> {
        let _dial = self.dial_lock.lock().await;

        if let (Some(stale), Some(current)) = (stale, self.current()) {
            if !Arc::ptr_eq(stale, &current) && !current.is_closed() {
                debug!("[dial] connection already replaced");
                return Ok(current);
            }
        }

        info!("[dial] reconnecting to {}...", self.addr);

        let old = self.state.lock().take();
        if let Some(old) = old {
            old.close();
        }

        match self.dial().await {
            Ok(conn) => {
                info!("[dial] reconnected");
                Ok(conn)
            }
            Err(e) => {
                warn!("[dial] reconnect failed: {}", e);
                Err(e)
            }
        }
    }

    /// Return the live connection, dialing one if there is none
    pub async fn ensure(&self) -> Result<Arc<dyn Transport>> {
        match self.current() {
            Some(conn) if !conn.is_closed() => Ok(conn),
            stale => self.reconnect(stale.as_ref()).await,
        }
    }

    /// Close and forget the current connection
    pub fn close(&self) {
        let conn = self.state.lock().take();
        if let Some(conn) = conn {
            conn.close();
        }
    }

    // Caller holds `dial_lock`
    async fn dial(&self) -> Result<Arc<dyn Transport>> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let transport = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(Error::ShuttingDown),
            res = TcpTransport::connect(&self.addr, self.connect_timeout) => res?,
        };

        let conn: Arc<dyn Transport> = Arc::new(transport);

        let previous = {
            let mut state = self.state.lock();
            // Checked under the lock: `stop` cancels first, then takes the lock to close
            if self.shutdown.is_cancelled() {
                conn.close();
                return Err(Error::ShuttingDown);
            }
            state.replace(Arc::clone(&conn))
        };

        if let Some(previous) = previous {
            previous.close();
        }

        info!("Connected to {}", self.addr);

        Ok(conn)
    }
}
