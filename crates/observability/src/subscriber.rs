//! Tracing subscriber initialization.

use tracing_subscriber::EnvFilter;

/// Output shape of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    Json,
    /// Compact text routed through the test writer.
    Test,
}

/// Install a global subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Returns whether this call
/// installed the subscriber (`false` if one was already in place).
pub fn init_with(format: LogFormat, default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let installed = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_current_span(true)
            .with_target(false)
            .try_init(),
        LogFormat::Test => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_test_writer()
            .try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(?format, "tracing subscriber installed");
    }
    installed.is_ok()
}
