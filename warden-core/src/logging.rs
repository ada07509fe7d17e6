//! Unified logging system
//!
//! Structured logging through `tracing` with configurable output

use serde::{Deserialize, Serialize};
use std::io;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty, compact)
    pub format: LogFormat,
    /// Whether to include file and line information
    pub include_location: bool,
    /// Whether to include thread information
    pub include_thread: bool,
    /// Whether to log to file
    pub log_to_file: bool,
    /// Log file path (if log_to_file is true)
    pub log_file_path: Option<String>,
    /// Whether to emit span close events with timings
    pub enable_performance_monitoring: bool,
    /// Custom filter directives
    pub filter_directives: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_location: false,
            include_thread: false,
            log_to_file: false,
            log_file_path: None,
            enable_performance_monitoring: false,
            filter_directives: vec![
                "sqlx=warn".to_string(),
                "hyper=warn".to_string(),
                "reqwest=warn".to_string(),
            ],
        }
    }
}

/// Initialize the logging system.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    for directive in &config.filter_directives {
        filter = filter.add_directive(directive.parse()?);
    }

    let span_events = if config.enable_performance_monitoring {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let file = if config.log_to_file {
        let Some(log_path) = &config.log_file_path else {
            return Err("log_file_path must be specified when log_to_file is true".into());
        };
        Some(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        )
    } else {
        None
    };

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread)
                .with_thread_names(config.include_thread);

            match file {
                Some(file) => registry.with(layer.with_writer(file)).try_init()?,
                None => registry.with(layer.with_writer(io::stderr)).try_init()?,
            }
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread)
                .with_thread_names(config.include_thread);

            match file {
                Some(file) => registry.with(layer.with_writer(file)).try_init()?,
                None => registry.with(layer.with_writer(io::stderr)).try_init()?,
            }
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread)
                .with_thread_names(config.include_thread);

            match file {
                Some(file) => registry.with(layer.with_writer(file)).try_init()?,
                None => registry.with(layer.with_writer(io::stderr)).try_init()?,
            }
        }
    }

    Ok(())
}

/// Logging macros for common patterns
#[macro_export]
macro_rules! log_operation_start {
    ($operation:expr) => {
        tracing::debug!(
            operation = $operation,
            "Starting operation"
        );
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::debug!(
            operation = $operation,
            $($field)*,
            "Starting operation"
        );
    };
}

#[macro_export]
macro_rules! log_operation_success {
    ($operation:expr) => {
        tracing::info!(
            operation = $operation,
            "Operation completed successfully"
        );
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info!(
            operation = $operation,
            $($field)*,
            "Operation completed successfully"
        );
    };
}

#[macro_export]
macro_rules! log_operation_error {
    ($operation:expr, $error:expr) => {
        tracing::warn!(
            operation = $operation,
            error = %$error,
            "Operation failed"
        );
    };
    ($operation:expr, $error:expr, $($field:tt)*) => {
        tracing::warn!(
            operation = $operation,
            error = %$error,
            $($field)*,
            "Operation failed"
        );
    };
}
