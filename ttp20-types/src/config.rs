//! Client and emulator configuration
//!
//! Both are immutable snapshots: built once (usually by a CLI), validated,
//! then handed to the engine.

use std::time::Duration;

use ttp20_core::{ChecksumMode, DEFAULT_PORT, constants};

use crate::error::{Error, Result};

/// Polling client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Device host
    pub host: String,

    /// Device port
    pub port: u16,

    /// Checksum mode used to sign requests
    pub checksum_mode: ChecksumMode,

    /// Adapter address put in every request
    pub adapter_address: u8,

    /// Deadline for one complete response
    pub response_timeout: Duration,

    /// Retries after the first attempt
    pub retry_count: u32,

    /// Base scheduler tick
    pub poll_interval: Duration,

    /// Dial timeout
    pub connect_timeout: Duration,

    /// Pause after a connection-level failure
    pub retry_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            checksum_mode: ChecksumMode::Sum,
            adapter_address: 1,
            response_timeout: Duration::from_millis(constants::DEFAULT_RESPONSE_TIMEOUT_MS),
            retry_count: constants::DEFAULT_RETRIES,
            poll_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(constants::DEFAULT_CONNECT_TIMEOUT),
            retry_backoff: Duration::from_millis(constants::RETRY_BACKOFF_MS),
        }
    }
}

impl ClientConfig {
    /// Create a config for the given device address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.checksum_mode = mode;
        self
    }

    pub fn with_adapter_address(mut self, address: u8) -> Self {
        self.adapter_address = address;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// "host:port"
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Total attempts per poll cycle
    pub fn attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Check field ranges
    pub fn validate(&self) -> Result<()> {
        require_host(&self.host)?;
        require_nonzero("response_timeout", self.response_timeout)?;
        require_nonzero("poll_interval", self.poll_interval)?;
        require_nonzero("connect_timeout", self.connect_timeout)?;
        Ok(())
    }
}

/// Emulator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,

    /// Listen port (0 picks an ephemeral port)
    pub port: u16,

    /// Checksum mode used to sign responses
    pub checksum_mode: ChecksumMode,

    /// Simulated latency before every response
    pub response_delay: Duration,

    /// Probability of corrupting a response checksum, in [0, 1]
    pub bad_checksum_probability: f64,

    /// Probability of splitting a response in two writes, in [0, 1]
    pub fragment_probability: f64,

    /// Adapter address the emulator answers as
    pub adapter_address: u8,

    /// Sliding idle timeout per connection
    pub idle_read_timeout: Duration,

    /// Pause between the halves of a fragmented response
    pub fragment_pause: Duration,

    /// Seed for reproducible fault injection
    pub fault_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            checksum_mode: ChecksumMode::Sum,
            response_delay: Duration::ZERO,
            bad_checksum_probability: 0.0,
            fragment_probability: 0.0,
            adapter_address: 1,
            idle_read_timeout: Duration::from_secs(constants::DEFAULT_IDLE_TIMEOUT),
            fragment_pause: Duration::from_millis(constants::FRAGMENT_PAUSE_MS),
            fault_seed: None,
        }
    }
}

impl ServerConfig {
    /// Create a config listening on the given address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.checksum_mode = mode;
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn with_bad_checksum_probability(mut self, probability: f64) -> Self {
        self.bad_checksum_probability = probability;
        self
    }

    pub fn with_fragment_probability(mut self, probability: f64) -> Self {
        self.fragment_probability = probability;
        self
    }

    pub fn with_adapter_address(mut self, address: u8) -> Self {
        self.adapter_address = address;
        self
    }

    pub fn with_idle_read_timeout(mut self, timeout: Duration) -> Self {
        self.idle_read_timeout = timeout;
        self
    }

    pub fn with_fragment_pause(mut self, pause: Duration) -> Self {
        self.fragment_pause = pause;
        self
    }

    pub fn with_fault_seed(mut self, seed: u64) -> Self {
        self.fault_seed = Some(seed);
        self
    }

    /// "host:port"
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check field ranges
    pub fn validate(&self) -> Result<()> {
        require_host(&self.host)?;
        require_probability("bad_checksum_probability", self.bad_checksum_probability)?;
        require_probability("fragment_probability", self.fragment_probability)?;
        require_nonzero("idle_read_timeout", self.idle_read_timeout)?;
        Ok(())
    }
}

fn require_host(host: &str) -> Result<()> {
    if host.trim().is_empty() {
        return Err(Error::Validation("host must not be empty".into()));
    }
    Ok(())
}

fn require_nonzero(name: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(Error::Validation(format!("{} must be greater than zero", name)));
    }
    Ok(())
}

fn require_probability(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::Validation(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}
