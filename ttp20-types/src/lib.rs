//! Type definitions for ttp20

pub mod config;
pub mod device_time;
pub mod error;

pub use config::{ClientConfig, ServerConfig};
pub use device_time::DeviceTime;
pub use error::{Error, Result};
