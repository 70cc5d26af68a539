//! Sync proxy: authorizes client actions against an HTTP backend and
//! commits them to the action log in lane order.

mod app;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use sync_config_and_utils::{init_logging, Paths, SyncProxyConfig};

#[derive(Parser)]
#[command(name = "sync-proxy")]
#[command(about = "Backend action proxy with an HTTP control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory holding config.json. Defaults to ~/.sync-proxy
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Config file to read instead of <base-dir>/config.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend URL. Overrides the config.
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Control plane port. Overrides the config.
    #[arg(long, global = true)]
    control_port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy in the foreground
    Start,
    /// Validate the resolved configuration and print it
    CheckConfig {
        /// Also write the resolved configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

impl Cli {
    fn paths(&self) -> anyhow::Result<Paths> {
        Ok(match &self.base_dir {
            Some(base) => Paths::with_base_dir(base.clone()),
            None => Paths::new()?,
        })
    }

    /// The file `--config` names, or `config.json` under the base dir.
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(self.paths()?.config_file()),
        }
    }

    fn config(&self) -> anyhow::Result<SyncProxyConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = SyncProxyConfig::load_from_file(path)?;
                config.load_from_env()?;
                config
            }
            None => SyncProxyConfig::load(&self.paths()?)?,
        };

        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(url) = &self.backend_url {
            config.backend_url = Some(url.clone());
        }
        if let Some(port) = self.control_port {
            config.control_port = port;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;

    init_logging(&config.log_level, config.log_json);

    match &cli.command {
        Some(Commands::Start) | None => app::run_proxy(config).await?,
        Some(Commands::CheckConfig { write }) => {
            let target = if *write { Some(cli.config_path()?) } else { None };
            println!("{}", check_config(config, target.as_deref())?);
        }
    }

    Ok(())
}

/// Optionally persist `config`, then render it with the secret redacted.
fn check_config(config: SyncProxyConfig, write_to: Option<&Path>) -> anyhow::Result<String> {
    if let Some(path) = write_to {
        config.save(path)?;
        tracing::info!(path = %path.display(), "Wrote configuration");
    }
    let mut shown = config;
    if shown.control_secret.is_some() {
        shown.control_secret = Some("<redacted>".to_string());
    }
    Ok(serde_json::to_string_pretty(&shown)?)
}
