//! High-level error types

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Frame error: {0}")]
    Core(#[from] ttp20_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] ttp20_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] ttp20_types::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device not connected")]
    NotConnected,

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Already started")]
    AlreadyStarted,

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Unexpected command in payload: 0x{0:02X}")]
    UnexpectedCommand(u8),

    #[error("Time parse failed, raw='{0}'")]
    InvalidTimestamp(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Check if the error is a connection failure that calls for a redial
    ///
    /// Damaged frames are line noise, not a broken connection, and decode
    /// errors describe a well-formed but unexpected reply.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::NotConnected)
    }

    /// Check if the error is a well-formed but unexpected response
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyPayload | Self::UnexpectedCommand(_) | Self::InvalidTimestamp(_)
        )
    }
}
