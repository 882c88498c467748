//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to both console and
//! files. Each process (supervisor, consumer, worker subprocess) writes its
//! own log file tagged with environment, PID, and start timestamp so that a
//! fleet of consumer processes can be debugged after the fact.

use std::fs;
use std::path::Path;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let log_dir: &Path = &config.directory;
        if !log_dir.exists() {
            fs::create_dir_all(log_dir).expect("Failed to create log directory");
        }

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");

        let file_appender = tracing_appender::rolling::never(log_dir, &log_filename);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true)
                    .with_filter(EnvFilter::new(log_level.clone())),
            )
            .with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(log_level)),
            );

        // Use try_init to avoid a panic if a subscriber is already set
        // (library embedders often install their own).
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized, keeping existing one");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_filename,
            "🔧 structured logging initialized"
        );

        // The guard flushes the non-blocking writer on drop; this process
        // logs until exit, so leak it deliberately.
        std::mem::forget(guard);
    });
}

/// Get the current environment from environment variables.
fn get_environment() -> String {
    std::env::var("CONVEYOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment.
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("unknown"), "debug");
    }
}
