//! Logging initialization.

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `level` when set. With `json` every event is
/// written as one JSON object per line, otherwise in the compact text
/// format. Calling this twice is harmless; the second call is ignored.
pub fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().finish().try_init()
    } else {
        builder.compact().finish().try_init()
    };
    if installed.is_err() {
        tracing::debug!("Logging already initialized");
    }
}
