//! Polling client
//!
//! Keeps one shared connection to the device, polls its clock on a
//! wall-clock schedule and recovers from dropped or damaged traffic with
//! bounded reconnect and retry.

mod connection;
mod exchange;
mod scheduler;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use ttp20_types::ClientConfig;

use crate::error::{Error, Result};

pub use connection::ConnectionManager;
pub use exchange::{PollOutcome, PollReport, build_request, decode_time};
pub use scheduler::FireGate;

/// TTP20 polling client
///
/// Cheap to clone; all clones drive the same connection and lifecycle.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use ttp20::{ChecksumMode, Client, ClientConfig};
///
/// #[tokio::main]
/// async fn main() -> ttp20::Result<()> {
///     let config = ClientConfig::new("127.0.0.1", 9000)
///         .with_checksum_mode(ChecksumMode::Crc16)
///         .with_response_timeout(Duration::from_millis(500));
///
///     let client = Client::new(config);
///     client.start()?;
///
///     tokio::time::sleep(Duration::from_secs(30)).await;
///
///     client.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    connections: ConnectionManager,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    #[default]
    Idle,
    Running,
    Stopped,
}

impl Client {
    /// Create a client; nothing is dialed until `start` or `poll_once`
    pub fn new(config: ClientConfig) -> Self {
        let shutdown = CancellationToken::new();
        let connections =
            ConnectionManager::new(config.addr(), config.connect_timeout, shutdown.clone());

        Self {
            inner: Arc::new(ClientInner {
                config,
                connections,
                shutdown,
                tasks: TaskTracker::new(),
                lifecycle: Mutex::new(Lifecycle::Idle),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Check if a live connection is installed
    pub fn is_connected(&self) -> bool {
        self.inner.connections.is_connected()
    }

    /// Start background polling
    ///
    /// Returns immediately. The initial connect and the poll loop run on
    /// the current tokio runtime. Fails without side effects when the
    /// config does not validate.
    pub fn start(&self) -> Result<()> {
        self.inner.config.validate()?;

        {
            let mut lifecycle = self.inner.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => return Err(Error::AlreadyStarted),
                Lifecycle::Stopped => return Err(Error::ShuttingDown),
            }
        }

        info!(
            "Starting client for {} (adapter=0x{:02X}, checksum={}, timeout={:?}, retries={})",
            self.inner.connections.addr(),
            self.inner.config.adapter_address,
            self.inner.config.checksum_mode,
            self.inner.config.response_timeout,
            self.inner.config.retry_count,
        );

        self.inner.tasks.spawn(scheduler::run(Arc::clone(&self.inner)));

        Ok(())
    }

    /// Run one poll cycle now, outside the schedule
    ///
    /// The cycle is tracked like a scheduled one, so `stop` waits for it.
    pub async fn poll_once(&self) -> PollReport {
        let inner = Arc::clone(&self.inner);

        match self.inner.tasks.spawn(async move { exchange::poll(&inner).await }).await {
            Ok(report) => report,
            Err(e) => PollReport {
                attempts: 0,
                outcome: PollOutcome::Failed(Error::TaskFailed(e.to_string())),
            },
        }
    }

    /// Stop polling and wait for every in-flight cycle to finish
    ///
    /// Closing the connection unblocks pending reads, so this returns
    /// within roughly one connect timeout. Safe to call more than once.
    pub async fn stop(&self) {
        let first = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let first = *lifecycle != Lifecycle::Stopped;
            *lifecycle = Lifecycle::Stopped;
            first
        };

        if first {
            info!("Stopping client...");
            self.inner.shutdown.cancel();
            self.inner.connections.close();
        }

        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        if first {
            info!("Client stopped");
        }
    }
}
