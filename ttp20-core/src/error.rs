//! Error types for ttp20-core

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Frame codec errors
///
/// None of these are fatal: a bad frame is dropped (server) or the
/// attempt is retried (client).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Frame is too short to be valid
    #[error("Frame too short: expected at least {expected} bytes, got {actual} bytes")]
    FrameTooShort {
        expected: usize,
        actual: usize,
    },

    /// Last byte is not the 0x16 terminator
    #[error("Missing end byte 0x16 (got 0x{0:02X})")]
    MissingEndByte(u8),

    /// Neither checksum layout matches the frame tail
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// DATA does not fit the one-byte LEN field
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        size: usize,
        max: usize,
    },

    /// LEN field smaller than CONTROL + ADDRESS
    #[error("Invalid length field: {0}")]
    InvalidLength(u8),

    /// Unknown checksum mode name
    #[error("Unknown checksum mode: {0} (expected \"sum\" or \"crc16\")")]
    UnknownChecksumMode(String),
}
