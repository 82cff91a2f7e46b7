//! ttp20-server - TTP20 device emulator with fault injection

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use ttp20::logging::{LogLevel, init_logging};
use ttp20::{ChecksumMode, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "ttp20-server", version, about = "TTP20 device emulator", long_about = None)]
struct Args {
    /// Listen host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Listen port
    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// Checksum mode: sum | crc16
    #[arg(long = "crc", default_value = "sum")]
    checksum: ChecksumMode,

    /// Delay before each response, in milliseconds
    #[arg(long = "delay", default_value_t = 0)]
    delay_ms: u64,

    /// Probability [0..1] of sending a corrupted checksum
    #[arg(long = "badcrc", default_value_t = 0.0)]
    bad_checksum: f64,

    /// Probability [0..1] of splitting a response into two writes
    #[arg(long, default_value_t = 0.0)]
    fragment: f64,

    /// Emulated adapter address
    #[arg(long, default_value_t = 1)]
    adapter: u8,

    /// Idle read timeout per connection, in seconds
    #[arg(long = "readtimeout", default_value_t = 300)]
    read_timeout_secs: u64,

    /// Seed the fault injector for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

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

    let mut config = ServerConfig::new(args.host, args.port)
        .with_checksum_mode(args.checksum)
        .with_response_delay(Duration::from_millis(args.delay_ms))
        .with_bad_checksum_probability(args.bad_checksum)
        .with_fragment_probability(args.fragment)
        .with_adapter_address(args.adapter)
        .with_idle_read_timeout(Duration::from_secs(args.read_timeout_secs));
    if let Some(seed) = args.seed {
        config = config.with_fault_seed(seed);
    }

    let server = Arc::new(Server::bind(config).await.context("cannot start listener")?);

    let runner = Arc::clone(&server);
    let mut accept = tokio::spawn(async move { runner.start().await });

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Signal received, shutting down...");
            server.stop().await;
            accept.await??;
        }
        res = &mut accept => {
            server.stop().await;
            res??;
        }
    }

    Ok(())
}
