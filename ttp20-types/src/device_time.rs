//! Device clock value carried by read-time responses

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDateTime, Timelike};
use ttp20_core::constants::TIME_FORMAT;

use crate::error::{Error, Result};

/// Normalized rendering used in logs
const NORMALIZED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Device time
///
/// A naive wall-clock timestamp with one-second resolution. On the wire it
/// is ASCII `YYYY-MM-DD HH:MM:SS`.
///
/// # Examples
///
/// ```
/// use ttp20_types::DeviceTime;
///
/// let time = DeviceTime::parse("2024-01-02 03:04:05").unwrap();
/// assert_eq!(time.to_string(), "2024-01-02T03:04:05");
/// assert_eq!(time.to_wire(), "2024-01-02 03:04:05");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceTime(NaiveDateTime);

impl DeviceTime {
    /// Current local time, truncated to whole seconds
    pub fn now() -> Self {
        let now = Local::now().naive_local();
        Self(now.with_nanosecond(0).unwrap_or(now))
    }

    /// Parse the wire layout
    pub fn parse(raw: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
            .map(Self)
            .map_err(|e| Error::Parse(format!("{:?}: {}", raw, e)))
    }

    /// Wire layout (`YYYY-MM-DD HH:MM:SS`)
    pub fn to_wire(&self) -> String {
        self.0.format(TIME_FORMAT).to_string()
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }
}

impl From<NaiveDateTime> for DeviceTime {
    fn from(value: NaiveDateTime) -> Self {
        Self(value)
    }
}

impl FromStr for DeviceTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(NORMALIZED_FORMAT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_wire_layout() {
        let time = DeviceTime::parse("2023-12-31 23:59:58").unwrap();
        assert_eq!(time.to_wire(), "2023-12-31 23:59:58");
        assert_eq!(time.to_string(), "2023-12-31T23:59:58");
    }

    #[test]
    fn test_parse_rejects_other_layouts() {
        assert!(DeviceTime::parse("2023-12-31T23:59:58").is_err());
        assert!(DeviceTime::parse("31.12.2023 23:59:58").is_err());
        assert!(DeviceTime::parse("2023-13-01 00:00:00").is_err());
        assert!(DeviceTime::parse("").is_err());
    }

    #[test]
    fn test_now_round_trips_through_wire() {
        let now = DeviceTime::now();
        assert_eq!(now.to_wire().len(), 19);
        assert_eq!(DeviceTime::parse(&now.to_wire()).unwrap(), now);
    }
}
