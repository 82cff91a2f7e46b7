//! Frame checksum algorithms
//!
//! Two per-deployment modes exist and the wire format does not say which
//! one a frame uses:
//! - `sum`: one byte, unsigned sum of the covered bytes mod 256
//! - `crc16`: two bytes, CRC-16/Modbus (poly 0xA001 reflected, init 0xFFFF),
//!   little-endian on the wire
//!
//! Both cover `[CONTROL, ADDRESS, DATA...]`, never the header.

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::error::Error;

const CRC16_POLY: u16 = 0xA001;
const CRC16_INIT: u16 = 0xFFFF;

/// Checksum mode of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChecksumMode {
    /// 1-byte mod-256 sum
    #[default]
    Sum,
    /// 2-byte CRC-16/Modbus
    Crc16,
}

impl ChecksumMode {
    /// Both modes, in the order a verifier tries them
    pub const ALL: [ChecksumMode; 2] = [ChecksumMode::Sum, ChecksumMode::Crc16];

    /// Width of the checksum field in bytes
    pub fn width(self) -> usize {
        match self {
            ChecksumMode::Sum => 1,
            ChecksumMode::Crc16 => 2,
        }
    }

    /// Checksum field bytes for `data`, in wire order
    pub fn compute(self, data: &[u8]) -> Vec<u8> {
        match self {
            ChecksumMode::Sum => vec![sum8(data)],
            ChecksumMode::Crc16 => {
                let mut out = vec![0u8; 2];
                LittleEndian::write_u16(&mut out, crc16(data));
                out
            }
        }
    }

    /// Check a checksum field (wire order) against `data`
    pub fn verify(self, data: &[u8], field: &[u8]) -> bool {
        match self {
            ChecksumMode::Sum => field.len() == 1 && field[0] == sum8(data),
            ChecksumMode::Crc16 => field.len() == 2 && LittleEndian::read_u16(field) == crc16(data),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumMode::Sum => "sum",
            ChecksumMode::Crc16 => "crc16",
        }
    }
}

impl fmt::Display for ChecksumMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(ChecksumMode::Sum),
            "crc16" => Ok(ChecksumMode::Crc16),
            other => Err(Error::UnknownChecksumMode(other.to_string())),
        }
    }
}

/// Unsigned sum of all bytes, mod 256
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16/Modbus
///
/// # Examples
///
/// ```
/// use ttp20_core::checksum;
///
/// assert_eq!(checksum::crc16(&[0x01, 0x02]), 0xE181);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    trace!(len = data.len(), crc = format!("0x{:04X}", crc), "Calculated CRC-16");

    crc
}
