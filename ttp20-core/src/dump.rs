//! Hex dumps for RX/TX logging

/// Render bytes as space-separated upper-case hex pairs
///
/// ```
/// assert_eq!(ttp20_core::hex_dump(&[0x68, 0x03, 0x16]), "68 03 16");
/// ```
pub fn hex_dump(data: &[u8]) -> String {
    data.chunks(1)
        .map(hex::encode_upper)
        .collect::<Vec<_>>()
        .join(" ")
}
