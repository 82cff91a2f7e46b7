//! Protocol command definitions
//!
//! The command is the first DATA byte of a request. Only read-time has a
//! meaning of its own; every other byte gets a generic acknowledgement.

use std::fmt;

use crate::constants::commands;

/// Protocol command
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Read the device clock
    ReadTime,

    /// Any other command byte (answered with a generic ACK)
    Unknown(u8),
}

impl Command {
    /// Command carried by a frame's DATA, if any
    pub fn from_payload(data: &[u8]) -> Option<Self> {
        data.first().copied().map(Self::from)
    }

    /// Get command name
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadTime => "READ_TIME",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            commands::READ_TIME => Self::ReadTime,
            other => Self::Unknown(other),
        }
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> u8 {
        match cmd {
            Command::ReadTime => commands::READ_TIME,
            Command::Unknown(byte) => byte,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), u8::from(*self))
    }
}
