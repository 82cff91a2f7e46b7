//! Wall-clock poll schedule

use std::sync::Arc;

use chrono::{Local, Timelike};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use ttp20_core::constants::POLL_PERIOD_SECS;

use super::{ClientInner, exchange};

/// Fires once per qualifying wall-clock second
///
/// A second qualifies when it is a multiple of the period. Seeing the same
/// qualifying second on consecutive ticks fires only once; any
/// non-qualifying second re-arms the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireGate {
    period: u32,
    last_fired: Option<u32>,
}

impl FireGate {
    pub fn new(period: u32) -> Self {
        Self {
            period: period.max(1),
            last_fired: None,
        }
    }

    /// Feed the current second-of-minute; returns true when a poll is due
    pub fn should_fire(&mut self, second: u32) -> bool {
        if second % self.period != 0 {
            self.last_fired = None;
            return false;
        }

        if self.last_fired == Some(second) {
            return false;
        }

        self.last_fired = Some(second);
        true
    }
}

impl Default for FireGate {
    fn default() -> Self {
        Self::new(POLL_PERIOD_SECS)
    }
}

/// Initial connect, then tick until shutdown
///
/// Each due poll runs as its own tracked task, so a slow cycle never delays
/// the schedule. Cycles may overlap when one outlives the period.
pub(crate) async fn run(inner: Arc<ClientInner>) {
    if let Err(e) = inner.connections.connect().await {
        warn!("Initial connect to {} failed: {}", inner.connections.addr(), e);
    }

    let mut ticker = interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut gate = FireGate::default();

    info!("Poll loop started (tick every {:?})", inner.config.poll_interval);

    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if gate.should_fire(Local::now().second()) {
                    let cycle = Arc::clone(&inner);
                    inner.tasks.spawn(async move {
                        exchange::poll(&cycle).await;
                    });
                }
            }
        }
    }

    debug!("Poll loop stopped");
}
