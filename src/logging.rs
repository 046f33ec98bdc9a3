//! Logging setup
//!
//! Logs go to a daily rolling file so the terminal stays reserved for the
//! conversation. `RUST_LOG` overrides the default filter.

use std::path::PathBuf;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "chat_roundtrip=info";

/// Where and how to write logs
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for the rolling log files
    pub dir: PathBuf,
    /// File name prefix; the date is appended
    pub file_prefix: String,
    /// Emit one JSON object per line instead of plain text
    pub json: bool,
    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_prefix: "chat-roundtrip.log".to_string(),
            json: false,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the program; dropping it
/// flushes and stops the background writer.
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.dir)?;

    let appender = tracing_appender::rolling::daily(&config.dir, &config.file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let registry = tracing_subscriber::registry().with(env_filter(&config.default_filter));

    if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(writer),
            )
            .try_init()?;
    }

    tracing::info!("Logging initialized in {:?}", config.dir);
    Ok(guard)
}
