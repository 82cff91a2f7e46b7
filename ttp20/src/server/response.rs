//! Response payloads

use ttp20_core::constants::{ACK_TEXT, commands};
use ttp20_core::{Command, Frame};
use ttp20_types::DeviceTime;

/// Build the reply to a verified request
///
/// Read-time gets the clock; every other command, including an empty
/// DATA, gets a generic acknowledgement.
pub fn build_response(request: &Frame, now: DeviceTime) -> Frame {
    let payload = match request.command() {
        Some(Command::ReadTime) => read_time_payload(now),
        Some(Command::Unknown(cmd)) => ack_payload(cmd),
        None => ack_payload(commands::NO_COMMAND),
    };

    request.reply(payload)
}

/// `[0x01] + "YYYY-MM-DD HH:MM:SS"`
pub fn read_time_payload(now: DeviceTime) -> Vec<u8> {
    let text = now.to_wire();
    let mut payload = Vec::with_capacity(1 + text.len());
    payload.push(commands::READ_TIME);
    payload.extend_from_slice(text.as_bytes());
    payload
}

/// `[cmd] + "OK"`
pub fn ack_payload(cmd: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + ACK_TEXT.len());
    payload.push(cmd);
    payload.extend_from_slice(ACK_TEXT);
    payload
}
