//! Logging initialization
//!
//! Console logging via tracing-subscriber with an environment filter.
//! `RUST_LOG` overrides the default level.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subsystem for a binary
///
/// Safe to call once per process; returns quietly if a global subscriber is
/// already installed (integration tests initialize repeatedly).
pub fn init_logging(service_name: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kiln=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        tracing::info!(service = service_name, "logging initialized");
    }
}
