//! Protocol constants

/// First and second start byte of every frame
pub const START: u8 = 0x68;

/// Terminator byte of every frame
pub const END: u8 = 0x16;

/// Header size: START1, LEN, START2
pub const HEADER_SIZE: usize = 3;

/// Offset of the first checksummed byte (CONTROL)
pub const BODY_OFFSET: usize = 3;

/// Offset of the first DATA byte
pub const DATA_OFFSET: usize = 5;

/// CONTROL + ADDRESS, counted by LEN
pub const LEN_OVERHEAD: usize = 2;

/// Largest DATA that still fits the one-byte LEN field
pub const MAX_DATA_SIZE: usize = u8::MAX as usize - LEN_OVERHEAD;

/// Shortest valid frame: header, control, address, 1-byte checksum, end
pub const MIN_FRAME_SIZE: usize = 7;

/// Default dial timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 2;

/// Default response timeout (milliseconds)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Default number of retries after the first attempt
pub const DEFAULT_RETRIES: u32 = 2;

/// Pause between a failed attempt and the next one (milliseconds)
pub const RETRY_BACKOFF_MS: u64 = 200;

/// Pause between the two halves of a fragmented response (milliseconds)
pub const FRAGMENT_PAUSE_MS: u64 = 40;

/// Default server idle read timeout (seconds)
pub const DEFAULT_IDLE_TIMEOUT: u64 = 300;

/// Polls fire on wall-clock seconds divisible by this
pub const POLL_PERIOD_SECS: u32 = 5;

/// Layout of the ASCII timestamp carried by read-time responses
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Command bytes
pub mod commands {
    /// Read device time
    pub const READ_TIME: u8 = 0x01;

    /// Echoed by the emulator when a request carries no command byte
    pub const NO_COMMAND: u8 = 0xFF;
}

/// Reply body of the generic acknowledgement
pub const ACK_TEXT: &[u8] = b"OK";
