//! Structured logging setup.
//!
//! Tracing with component targets for filtering, optional daily-rotated
//! file output via tracing-appender, and a choice of stdout formats.
//!
//! | Target | Description |
//! |--------|-------------|
//! | `orderflow::ingest` | Feed connections, reconnects, parse drops |
//! | `orderflow::engine` | Engine worker lifecycle |
//! | `orderflow::broadcast` | Observer connections and drops |
//! | `orderflow::sink` | CSV sink |
//! | `orderflow::history` | Ring buffer recovery |
//!
//! ```bash
//! # Debug only the ingest workers
//! RUST_LOG=warn,orderflow::ingest=debug orderflow
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::prelude::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// JSON format (best for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Base filter when RUST_LOG is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Format for stdout logging
    #[serde(default)]
    pub format: LogFormat,

    /// Also write JSON logs to a daily-rotated file in this directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            file_dir: None,
        }
    }
}

/// Initialize the global subscriber.
///
/// Returns worker guards that must stay alive for the program's lifetime
/// so buffered file output is flushed.
pub fn init_logging(config: &LogConfig, filter_override: Option<&str>) -> Result<Vec<WorkerGuard>> {
    let mut guards = Vec::new();

    let base_filter = if let Some(filter) = filter_override {
        EnvFilter::new(filter)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(&config.level)
                .add_directive("hyper=warn".parse().expect("static directive"))
                .add_directive("reqwest=warn".parse().expect("static directive"))
                .add_directive("tungstenite=warn".parse().expect("static directive"))
        })
    };

    if let Some(dir) = &config.file_dir {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(&e))?;

        let appender = RollingFileAppender::new(Rotation::DAILY, dir, "orderflow.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);

        let file_layer = fmt::layer().with_writer(writer).with_ansi(false).json();

        match config.format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(base_filter)
                .with(file_layer)
                .with(fmt::layer().json())
                .init(),
            LogFormat::Compact => tracing_subscriber::registry()
                .with(base_filter)
                .with(file_layer)
                .with(fmt::layer().compact())
                .init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(base_filter)
                .with(file_layer)
                .with(fmt::layer().with_target(false))
                .init(),
        }
    } else {
        match config.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .with_env_filter(base_filter)
                .json()
                .init(),
            LogFormat::Compact => tracing_subscriber::fmt()
                .with_env_filter(base_filter)
                .compact()
                .init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .with_env_filter(base_filter)
                .with_target(false)
                .init(),
        }
    }

    Ok(guards)
}
