//! # ttp20-core
//!
//! Frame codec for the TTP20 time-poll protocol.
//!
//! This crate provides the low-level protocol primitives:
//! - Frame structure, building and extraction from a byte stream
//! - Checksum calculation (mod-256 sum and CRC-16/Modbus)
//! - Command definitions
//! - Protocol constants

pub mod checksum;
pub mod command;
pub mod constants;
pub mod dump;
pub mod error;
pub mod frame;

pub use checksum::ChecksumMode;
pub use command::Command;
pub use dump::hex_dump;
pub use error::{Error, Result};
pub use frame::{Control, Frame, corrupt_checksum, extract_frame, payload_data, verify_frame};

/// Default emulator port
pub const DEFAULT_PORT: u16 = 9000;
