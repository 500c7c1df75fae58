//! Transport metrics.
//!
//! # Responsibilities
//! - Define the transport metric names and their labels
//! - Provide thin helpers so call sites stay one line
//!
//! # Metrics
//! - `netcore_connections_opened_total` (counter): by `role`, `mode`
//! - `netcore_connections_closed_total` (counter)
//! - `netcore_accept_timeouts_total` (counter): accepts that hit their deadline
//! - `netcore_tls_handshake_failures_total` (counter): by `mode`
//! - `netcore_bytes_read_total` (counter): application bytes read
//! - `netcore_bytes_written_total` (counter): application bytes written
//!
//! # Design Decisions
//! - Emission goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Installing a recorder/exporter is left to the application

use metrics::{counter, describe_counter, Unit};

pub const CONNECTIONS_OPENED: &str = "netcore_connections_opened_total";
pub const CONNECTIONS_CLOSED: &str = "netcore_connections_closed_total";
pub const ACCEPT_TIMEOUTS: &str = "netcore_accept_timeouts_total";
pub const HANDSHAKE_FAILURES: &str = "netcore_tls_handshake_failures_total";
pub const BYTES_READ: &str = "netcore_bytes_read_total";
pub const BYTES_WRITTEN: &str = "netcore_bytes_written_total";

/// Register descriptions with the installed recorder.
pub fn describe() {
    describe_counter!(CONNECTIONS_OPENED, "Connections established, by role and mode");
    describe_counter!(CONNECTIONS_CLOSED, "Connections closed or dropped");
    describe_counter!(ACCEPT_TIMEOUTS, "Accept calls that timed out");
    describe_counter!(HANDSHAKE_FAILURES, "TLS handshakes that failed");
    describe_counter!(BYTES_READ, Unit::Bytes, "Application bytes read");
    describe_counter!(BYTES_WRITTEN, Unit::Bytes, "Application bytes written");
}

pub fn connection_opened(role: &'static str, mode: &'static str) {
    counter!(CONNECTIONS_OPENED, "role" => role, "mode" => mode).increment(1);
}

pub fn connection_closed() {
    counter!(CONNECTIONS_CLOSED).increment(1);
}

pub fn accept_timed_out() {
    counter!(ACCEPT_TIMEOUTS).increment(1);
}

pub fn handshake_failed(mode: &'static str) {
    counter!(HANDSHAKE_FAILURES, "mode" => mode).increment(1);
}

pub fn bytes_read(bytes: usize) {
    counter!(BYTES_READ).increment(bytes as u64);
}

pub fn bytes_written(bytes: usize) {
    counter!(BYTES_WRITTEN).increment(bytes as u64);
}
