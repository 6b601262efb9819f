//! Tracing and logging setup shared by every stockline process.

pub mod subscriber;

pub use subscriber::{LogFormat, init_with};

/// Initialize process-wide observability (tracing/logging).
///
/// JSON lines, filtered by `RUST_LOG` (default `info`). Safe to call
/// multiple times; subsequent calls are no-ops.
pub fn init() {
    subscriber::init_with(LogFormat::Json, "info");
}

/// Human-readable logs for tests. Output is captured by the test harness.
pub fn init_for_tests() {
    subscriber::init_with(LogFormat::Test, "debug");
}
