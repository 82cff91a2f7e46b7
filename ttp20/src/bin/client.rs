//! ttp20-client - polls a TTP20 device for its clock every 5 seconds

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use ttp20::logging::{LogLevel, init_logging};
use ttp20::{ChecksumMode, Client, ClientConfig};

#[derive(Parser, Debug)]
#[command(name = "ttp20-client", version, about = "TTP20 time-poll client", long_about = None)]
struct Args {
    /// Device host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Device port
    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// Checksum mode: sum | crc16
    #[arg(long = "crc", default_value = "sum")]
    checksum: ChecksumMode,

    /// Adapter address
    #[arg(long, default_value_t = 1)]
    adapter: u8,

    /// Response timeout in milliseconds
    #[arg(long = "timeout", default_value_t = 1000)]
    timeout_ms: u64,

    /// Retries after the first attempt
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Scheduler tick in seconds
    #[arg(long = "pollstep", default_value_t = 1)]
    poll_step: u64,

    /// Log to this file instead of stdout
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_level, args.log.as_deref())?;

    let config = ClientConfig::new(args.host, args.port)
        .with_checksum_mode(args.checksum)
        .with_adapter_address(args.adapter)
        .with_response_timeout(Duration::from_millis(args.timeout_ms))
        .with_retry_count(args.retries)
        .with_poll_interval(Duration::from_secs(args.poll_step));
    config.validate()?;

    let client = Client::new(config);
    client.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Signal received, stopping...");

    client.stop().await;

    Ok(())
}
