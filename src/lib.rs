//! Camcorder - camera capture sessions with crossfade editing.
//!
//! This is the library crate behind the `camcorder` CLI. It provides the
//! capture session state machine, camera and encoder backends, and export.

pub mod capture;
pub mod config;
pub mod export;
pub mod recorder;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "camcorder=debug,camcorder_lib=debug";

/// Initialize tracing/logging. Logs go to stderr so stdout stays machine-readable.
pub fn init_logging(default_filter: &str) {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    if result.is_ok() {
        tracing::info!("Starting camcorder v{}", env!("CARGO_PKG_VERSION"));
    }
}
