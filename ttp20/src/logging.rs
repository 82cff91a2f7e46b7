//! Log sink setup for the binaries
//!
//! Library code only emits `tracing` events; where they end up is decided
//! here, once, by whichever binary is running.

use std::path::Path;

use anyhow::{Context, anyhow};
use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Install the global subscriber
///
/// Logs go to stdout, or to `log_file` (appended, no colors) when given.
/// `RUST_LOG` overrides `level`. Keep the returned guard alive for the
/// life of the process so buffered file output is flushed on exit.
pub fn init_logging(
    level: LogLevel,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stdout)
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow!("failed to install logger: {}", e))?;
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .with_context(|| format!("log path {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log directory {}", dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {}", e))?;

    Ok(Some(guard))
}
