//! Log output setup
//!
//! Logs go to the systemd journal when it is available and to stderr
//! otherwise. stdout belongs to the status stream.

use std::path::Path;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use dv_core::constants::paths;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "DECKVOLT_LOG";

/// Where log lines end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    Journald,
    Stderr,
}

impl LogSink {
    pub fn describe(&self) -> &'static str {
        match self {
            LogSink::Journald => "systemd journal",
            LogSink::Stderr => "stderr",
        }
    }
}

/// Filter directive from the environment, falling back to the verbosity flag
pub fn filter_directive(env_value: Option<String>, verbose: bool) -> String {
    match env_value {
        Some(value) if !value.trim().is_empty() => value,
        _ if verbose => "debug".to_string(),
        _ => "info".to_string(),
    }
}

/// Install the global subscriber
pub fn init(verbose: bool) -> LogSink {
    let directive = filter_directive(std::env::var(LOG_ENV).ok(), verbose);

    if Path::new(paths::JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(EnvFilter::new(&directive))
                    .init();
                return LogSink::Journald;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stderr", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_env_filter(EnvFilter::new(&directive))
        .init();
    LogSink::Stderr
}
