//! Logging setup for the command-line front end
//!
//! The library only emits `tracing` events; this installs the subscriber that
//! prints them. With the `profiling` feature, `profiling` scopes are emitted as
//! tracing spans and show up in the same output.

use tracing_subscriber::prelude::*;

/// Initialize logging with sensible defaults
///
/// If `RUST_LOG` is not set, debug builds log at debug level and release
/// builds at info, keeping the HTTP stack quieter in both.
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "debug,hyper_util=info,reqwest::connect=info");
            } else {
                std::env::set_var("RUST_LOG", "info,hyper_util=warn");
            }
        }
    }

    // Logs go to stderr so that command output on stdout stays parseable
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();

    tracing::debug!(
        "Logging initialized (RUST_LOG={})",
        std::env::var("RUST_LOG").unwrap_or_default()
    );
}
