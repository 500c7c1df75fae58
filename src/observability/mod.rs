//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Transport subsystems produce:
//!     → logging.rs (structured log events, TLS error log lines)
//!     → metrics.rs (connection and byte counters)
//!
//! Consumers:
//!     → stderr (text or JSON)
//!     → whatever metrics recorder the application installs
//! ```
//!
//! # Design Decisions
//! - Structured fields (`connection_id`, `peer`, `mode`, `step`) on every event
//! - Metrics are cheap facade calls and free when no recorder is installed

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
