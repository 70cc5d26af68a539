//! Proxy configuration.

use crate::{ConfigError, ConfigResult, Paths};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_CONTROL_HOST: &str = "127.0.0.1";
pub const DEFAULT_CONTROL_PORT: u16 = 31338;
pub const DEFAULT_BRUTEFORCE_MAX_FAILURES: u32 = 3;
pub const DEFAULT_BRUTEFORCE_WINDOW_MS: u64 = 3000;

/// Shortest accepted control secret.
pub const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncProxyConfig {
    /// Backend endpoint. Without one, actions are not proxied.
    pub backend_url: Option<String>,
    /// Shared secret for backend requests and the control plane.
    pub control_secret: Option<String>,
    pub control_host: String,
    pub control_port: u16,
    /// Per-request backend timeout. No timeout when absent.
    pub backend_timeout_secs: Option<u64>,
    pub bruteforce_max_failures: u32,
    pub bruteforce_window_ms: u64,
    /// Ordering lanes. Must include `main`.
    pub lanes: Vec<String>,
    pub log_level: String,
    pub log_json: bool,
    /// Attach error details to undo records.
    pub development: bool,
}

impl Default for SyncProxyConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            control_secret: None,
            control_host: DEFAULT_CONTROL_HOST.to_string(),
            control_port: DEFAULT_CONTROL_PORT,
            backend_timeout_secs: None,
            bruteforce_max_failures: DEFAULT_BRUTEFORCE_MAX_FAILURES,
            bruteforce_window_ms: DEFAULT_BRUTEFORCE_WINDOW_MS,
            lanes: vec!["main".to_string()],
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            development: false,
        }
    }
}

impl SyncProxyConfig {
    /// Defaults, then the config file if it exists, then the environment.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let config_path = paths.config_file();
        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };
        config.load_from_env()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Override fields from `SYNC_*` environment variables.
    pub fn load_from_env(&mut self) -> ConfigResult<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Override fields from variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = var("SYNC_BACKEND_URL") {
            self.backend_url = Some(url);
        }
        if let Some(secret) = var("SYNC_CONTROL_SECRET") {
            self.control_secret = Some(secret);
        }
        if let Some(host) = var("SYNC_CONTROL_HOST") {
            self.control_host = host;
        }
        if let Some(port) = var("SYNC_CONTROL_PORT") {
            self.control_port = parse("SYNC_CONTROL_PORT", &port)?;
        }
        if let Some(secs) = var("SYNC_BACKEND_TIMEOUT_SECS") {
            self.backend_timeout_secs = Some(parse("SYNC_BACKEND_TIMEOUT_SECS", &secs)?);
        }
        if let Some(max) = var("SYNC_BRUTEFORCE_MAX_FAILURES") {
            self.bruteforce_max_failures = parse("SYNC_BRUTEFORCE_MAX_FAILURES", &max)?;
        }
        if let Some(window) = var("SYNC_BRUTEFORCE_WINDOW_MS") {
            self.bruteforce_window_ms = parse("SYNC_BRUTEFORCE_WINDOW_MS", &window)?;
        }
        if let Some(level) = var("SYNC_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(json) = var("SYNC_LOG_JSON") {
            self.log_json = parse_flag("SYNC_LOG_JSON", &json)?;
        }
        if let Some(development) = var("SYNC_DEVELOPMENT") {
            self.development = parse_flag("SYNC_DEVELOPMENT", &development)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(url) = self.backend_url()? {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "backend_url must be http or https, got {}",
                    url.scheme()
                )));
            }
        }
        if let Some(secret) = &self.control_secret {
            if secret.chars().count() < MIN_SECRET_LEN {
                return Err(ConfigError::Invalid(format!(
                    "control_secret must be at least {} characters",
                    MIN_SECRET_LEN
                )));
            }
        }
        if self.bruteforce_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "bruteforce_window_ms must be positive".to_string(),
            ));
        }
        if !self.lanes.iter().any(|lane| lane == "main") {
            return Err(ConfigError::Invalid(
                "lanes must include \"main\"".to_string(),
            ));
        }
        self.control_addr()?;
        Ok(())
    }

    pub fn backend_url(&self) -> ConfigResult<Option<Url>> {
        self.backend_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(ConfigError::from)
    }

    pub fn control_addr(&self) -> ConfigResult<SocketAddr> {
        let ip: IpAddr = self.control_host.parse().map_err(|_| {
            ConfigError::Invalid(format!("control_host is not an IP address: {}", self.control_host))
        })?;
        Ok(SocketAddr::new(ip, self.control_port))
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout_secs.map(Duration::from_secs)
    }

    pub fn bruteforce_window(&self) -> Duration {
        Duration::from_millis(self.bruteforce_window_ms)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} has an invalid value: {}", key, value)))
}

fn parse_flag(key: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!(
            "{} must be a boolean, got {}",
            key, value
        ))),
    }
}
