//! Logging system initialization
//!
//! Uses the tracing ecosystem for structured logging with support for:
//! - Environment variable override (MANIFOLD_LOG)
//! - File output with daily rotation
//! - Console output on stderr (stdout is the MCP wire in stdio mode)
//! - Module-level log filtering

use crate::config::LoggingConfig;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Initialize the logging system.
///
/// # Environment Variables
/// - `MANIFOLD_LOG`: Override log filter (e.g., "manifold=debug,manifold::session=trace")
pub fn init_logging(config: &LoggingConfig) {
    let level = parse_level(&config.level);
    let env_filter = EnvFilter::try_from_env("MANIFOLD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("manifold={}", level.as_str().to_lowercase())));

    // Console output goes to stderr; stdout carries the protocol in stdio mode.
    let console_layer = if config.format.eq_ignore_ascii_case("json") {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_ansi(true)
            .boxed()
    };

    let file_layer = if config.file_output {
        let log_dir = config
            .dir
            .clone()
            .or_else(crate::config::GatewayConfig::default_log_dir)
            .unwrap_or_else(|| std::path::PathBuf::from("."));

        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!("Warning: failed to create log directory {:?}: {}", log_dir, e);
            None
        } else {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "manifold.log");

            let file_layer = fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE);

            Some(file_layer.boxed())
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!("Logging initialized");
    tracing::debug!(
        level = %config.level,
        format = %config.format,
        file_output = config.file_output,
        "Logging configuration"
    );
}

/// Parse log level from string
pub fn parse_level(s: &str) -> Level {
    match s.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
