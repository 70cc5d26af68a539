//! Configuration, paths and logging for the sync proxy.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    SyncProxyConfig, DEFAULT_BRUTEFORCE_MAX_FAILURES, DEFAULT_BRUTEFORCE_WINDOW_MS,
    DEFAULT_CONTROL_HOST, DEFAULT_CONTROL_PORT, DEFAULT_LOG_LEVEL, MIN_SECRET_LEN,
};
pub use error::{ConfigError, ConfigResult};
pub use logging::init_logging;
pub use paths::Paths;
