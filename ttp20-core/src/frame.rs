//! Frame structure, encoding and stream extraction

use std::fmt;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::{
    checksum::ChecksumMode,
    command::Command,
    constants::{
        BODY_OFFSET, DATA_OFFSET, END, HEADER_SIZE, LEN_OVERHEAD, MAX_DATA_SIZE, MIN_FRAME_SIZE,
        START,
    },
    dump::hex_dump,
    error::{Error, Result},
};

bitflags! {
    /// CONTROL byte flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Control: u8 {
        /// Set on every reply
        const REPLY = 0x80;

        const _ = !0;
    }
}

/// Build the header and payload of a frame, without checksum and terminator
///
/// LEN is `2 + data.len()`.
pub fn build_skeleton(control: u8, address: u8, data: &[u8]) -> Result<BytesMut> {
    if data.len() > MAX_DATA_SIZE {
        return Err(Error::PayloadTooLarge {
            size: data.len(),
            max: MAX_DATA_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(DATA_OFFSET + data.len() + 3);
    buf.put_u8(START);
    buf.put_u8((LEN_OVERHEAD + data.len()) as u8);
    buf.put_u8(START);
    buf.put_u8(control);
    buf.put_u8(address);
    buf.put_slice(data);

    Ok(buf)
}

/// Append the checksum of `skeleton[3..]` and the 0x16 terminator
pub fn append_checksum(mut skeleton: BytesMut, mode: ChecksumMode) -> BytesMut {
    let covered = &skeleton[BODY_OFFSET.min(skeleton.len())..];
    let checksum = mode.compute(covered);

    skeleton.put_slice(&checksum);
    skeleton.put_u8(END);
    skeleton
}

/// Take the first complete frame off the front of a stream buffer
///
/// Returns `None` when more bytes are needed. Never blocks and may be
/// called again after every read.
///
/// - Bytes before the first 0x68 are dropped.
/// - A 0x68 not followed by a second 0x68 two bytes later (or with a LEN
///   below 2) is a false start: one byte is dropped and scanning resumes.
/// - The checksum width is not on the wire, so the 1-byte layout is tried
///   before the 2-byte one. When both terminators are buffered, the layout
///   whose checksum validates wins.
/// - When both layouts are fully buffered and neither ends in 0x16, the
///   candidate is a false start as well.
pub fn extract_frame(buf: &mut BytesMut) -> Option<Bytes> {
    loop {
        let Some(start) = buf.iter().position(|&b| b == START) else {
            if !buf.is_empty() {
                trace!("Discarding {} bytes without frame start", buf.len());
                buf.clear();
            }
            return None;
        };

        if start > 0 {
            trace!("Discarding {} bytes before frame start", start);
            buf.advance(start);
        }

        if buf.len() < HEADER_SIZE {
            return None;
        }

        let len = buf[1] as usize;
        if buf[2] != START || len < LEN_OVERHEAD {
            trace!("False frame start, resyncing");
            buf.advance(1);
            continue;
        }

        let body_end = BODY_OFFSET + len;
        let sum_end = body_end + 1;
        let crc_end = body_end + 2;

        let sum_terminated = buf.len() > sum_end && buf[sum_end] == END;
        let crc_buffered = buf.len() > crc_end;
        let crc_terminated = crc_buffered && buf[crc_end] == END;

        let frame_len = match (sum_terminated, crc_terminated) {
            (true, true) => {
                let body = &buf[BODY_OFFSET..body_end];
                let sum_valid = ChecksumMode::Sum.verify(body, &buf[body_end..sum_end]);
                let crc_valid = ChecksumMode::Crc16.verify(body, &buf[body_end..crc_end]);
                if crc_valid && !sum_valid { crc_end + 1 } else { sum_end + 1 }
            }
            (true, false) => sum_end + 1,
            (false, true) => crc_end + 1,
            (false, false) if crc_buffered => {
                trace!("No terminator after LEN={}, resyncing", len);
                buf.advance(1);
                continue;
            }
            (false, false) => return None,
        };

        let frame = buf.split_to(frame_len).freeze();
        trace!("Extracted frame: {}", hex_dump(&frame));
        return Some(frame);
    }
}

/// Check terminator and checksum of a complete frame
///
/// Both checksum modes are tried against the tail, so a verifier does not
/// need to know the sender's mode. Returns the mode that matched.
pub fn verify_frame(frame: &[u8]) -> Result<ChecksumMode> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(Error::FrameTooShort {
            expected: MIN_FRAME_SIZE,
            actual: frame.len(),
        });
    }

    let last = frame[frame.len() - 1];
    if last != END {
        return Err(Error::MissingEndByte(last));
    }

    let body_end = body_end(frame)?;
    let body = &frame[BODY_OFFSET..body_end];
    let tail = &frame[body_end..frame.len() - 1];

    ChecksumMode::ALL
        .into_iter()
        .find(|mode| mode.verify(body, tail))
        .ok_or(Error::ChecksumMismatch)
}

/// DATA region of a frame (CONTROL and ADDRESS excluded)
pub fn payload_data(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(Error::FrameTooShort {
            expected: MIN_FRAME_SIZE,
            actual: frame.len(),
        });
    }

    let body_end = body_end(frame)?;
    Ok(&frame[DATA_OFFSET..body_end])
}

/// Flip one bit of the checksum field, leaving the terminator intact
///
/// Returns `false` if the frame is too short to hold a checksum.
pub fn corrupt_checksum(frame: &mut [u8], mode: ChecksumMode) -> bool {
    match frame.len().checked_sub(1 + mode.width()) {
        Some(idx) if idx >= DATA_OFFSET => {
            frame[idx] ^= 0x01;
            true
        }
        _ => false,
    }
}

/// End of the checksummed span, i.e. where the checksum begins
fn body_end(frame: &[u8]) -> Result<usize> {
    let len = frame[1];
    if (len as usize) < LEN_OVERHEAD {
        return Err(Error::InvalidLength(len));
    }

    let body_end = BODY_OFFSET + len as usize;
    // at least a 1-byte checksum and the terminator
    if frame.len() < body_end + 2 {
        return Err(Error::FrameTooShort {
            expected: body_end + 2,
            actual: frame.len(),
        });
    }

    Ok(body_end)
}

/// Protocol frame
///
/// # Frame Structure
///
/// ```text
/// ┌──────┬─────┬──────┬─────────┬─────────┬──────────┬──────────┬──────┐
/// │ 0x68 │ LEN │ 0x68 │ CONTROL │ ADDRESS │   DATA   │ CHECKSUM │ 0x16 │
/// │  1   │  1  │  1   │    1    │    1    │ LEN - 2  │  1 or 2  │  1   │
/// └──────┴─────┴──────┴─────────┴─────────┴──────────┴──────────┴──────┘
/// ```
///
/// The checksum covers CONTROL, ADDRESS and DATA. A 2-byte CRC is
/// little-endian.
///
/// # Examples
///
/// ```
/// use ttp20_core::{ChecksumMode, Frame};
///
/// let request = Frame::request(0x01, vec![0x01]);
/// let encoded = request.encode(ChecksumMode::Crc16).unwrap();
/// assert_eq!(&encoded[..], &[0x68, 0x03, 0x68, 0x00, 0x01, 0x01, 0xB1, 0x90, 0x16]);
///
/// let decoded = Frame::decode(&encoded).unwrap();
/// assert_eq!(decoded, request);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Direction and meaning flags
    pub control: Control,

    /// Adapter address
    pub address: u8,

    /// Command-specific data
    pub data: Bytes,
}

impl Frame {
    /// Create a frame
    pub fn new(control: Control, address: u8, data: impl Into<Bytes>) -> Self {
        Self {
            control,
            address,
            data: data.into(),
        }
    }

    /// Create a request (CONTROL = 0x00)
    pub fn request(address: u8, data: impl Into<Bytes>) -> Self {
        Self::new(Control::empty(), address, data)
    }

    /// Create the reply to this frame: same address, reply bit set
    pub fn reply(&self, data: impl Into<Bytes>) -> Self {
        Self::new(self.control | Control::REPLY, self.address, data)
    }

    /// Check if the reply bit is set
    pub fn is_reply(&self) -> bool {
        self.control.contains(Control::REPLY)
    }

    /// Command carried in the first DATA byte
    pub fn command(&self) -> Option<Command> {
        Command::from_payload(&self.data)
    }

    /// Encode to wire bytes with the given checksum mode
    pub fn encode(&self, mode: ChecksumMode) -> Result<BytesMut> {
        let skeleton = build_skeleton(self.control.bits(), self.address, &self.data)?;
        Ok(append_checksum(skeleton, mode))
    }

    /// Decode a complete frame, verifying its checksum
    pub fn decode(raw: &[u8]) -> Result<Self> {
        verify_frame(raw)?;
        let data = payload_data(raw)?;

        Ok(Self {
            control: Control::from_bits_retain(raw[BODY_OFFSET]),
            address: raw[BODY_OFFSET + 1],
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Encoded size in bytes
    pub fn size(&self, mode: ChecksumMode) -> usize {
        DATA_OFFSET + self.data.len() + mode.width() + 1
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("control", &format!("0x{:02X}", self.control.bits()))
            .field("address", &format!("0x{:02X}", self.address))
            .field("data", &hex_dump(&self.data))
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(ctrl=0x{:02X}, addr=0x{:02X}, len={})",
            self.control.bits(),
            self.address,
            self.data.len()
        )
    }
}
