//! # ttp20
//!
//! Polling client and fault-injecting emulator for the TTP20 time-poll
//! protocol, a framed `0x68 … 0x16` request/response protocol over TCP.
//!
//! ## Features
//!
//! - Byte-exact frame codec with `sum` and `crc16` checksum modes
//! - Stream reassembly that survives fragmentation and garbage
//! - Client with bounded reconnect and retry
//! - Emulator that can corrupt or fragment its own responses
//! - Graceful, fully drained shutdown for both roles
//!
//! ## Quick Start
//!
//! ```no_run
//! use ttp20::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> ttp20::Result<()> {
//!     let client = Client::new(ClientConfig::new("127.0.0.1", 9000));
//!
//!     // One poll cycle
//!     let report = client.poll_once().await;
//!     println!("{:?}", report.outcome);
//!
//!     // Or poll on the 5-second schedule until stopped
//!     client.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     client.stop().await;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod logging;
pub mod server;

// Re-exports
pub use client::{Client, PollOutcome, PollReport};
pub use error::{Error, Result};
pub use server::Server;

// Re-export types
pub use ttp20_core::{ChecksumMode, Command, Frame};
pub use ttp20_types::{ClientConfig, DeviceTime, ServerConfig};
