//! Transport layer for the TTP20 protocol
//!
//! Provides the byte-stream connections both roles talk over.

pub mod error;
pub mod tcp;

pub use error::{Error, Result};
pub use tcp::TcpTransport;

use async_trait::async_trait;
use bytes::BytesMut;

/// Byte-stream connection
///
/// Methods take `&self` so one connection can be shared behind an `Arc`
/// while it is being read, written and closed from different tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Append whatever bytes are available to `buf` (waits for at least one)
    ///
    /// Callers bound the wait with their own deadline.
    async fn receive(&self, buf: &mut BytesMut) -> Result<usize>;

    /// Close the connection; pending and future I/O fails with `Error::Closed`
    fn close(&self);

    /// Check if `close` was called
    fn is_closed(&self) -> bool;

    /// Get remote address
    fn remote_addr(&self) -> String;
}
