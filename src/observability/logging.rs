//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber
//! - Validate configured log levels
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - JSON output for machines, the default `fmt` output for terminals
//! - Logs go to stderr so stdout stays free for data (CLI echo)
//! - Initialization is idempotent; a second call leaves the first subscriber

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Levels accepted in configuration.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

pub fn is_valid_level(level: &str) -> bool {
    LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str())
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(level: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.is_ok()
}

fn default_directive(level: &str) -> String {
    let level = level.to_ascii_lowercase();
    if is_valid_level(&level) {
        format!("netcore={}", level)
    } else {
        "netcore=info".to_string()
    }
}
