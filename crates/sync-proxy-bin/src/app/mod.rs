//! Wiring and lifecycle of the running proxy.

mod routes;

use routes::ActionCommandRoute;

use anyhow::Context;
use backend_client::{BackendClient, BackendConfig};
use backend_proxy::BackendProxy;
use bruteforce_guard::{BruteforceConfig, BruteforceGuard};
use control_server::{ControlRoute, ControlServer, MetricsRoute};
use ordering_queue::{OrderingQueue, QueueConfig};
use std::sync::Arc;
use sync_config_and_utils::SyncProxyConfig;
use sync_core::{ActionLog, HookRegistry, MemoryLog, MetricsReporter, Reporter, TracingReporter};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

const SERVER_NODE_ID: &str = "server";

/// Run until Ctrl-C, then stop the control listener and drain the queue.
pub async fn run_proxy(config: SyncProxyConfig) -> anyhow::Result<()> {
    let metrics = Arc::new(MetricsReporter::new(Arc::new(TracingReporter)));
    let reporter: Arc<dyn Reporter> = metrics.clone();
    let guard = Arc::new(BruteforceGuard::new(BruteforceConfig {
        max_failures: config.bruteforce_max_failures,
        window: config.bruteforce_window(),
    }));
    let log: Arc<dyn ActionLog> = Arc::new(MemoryLog::new(SERVER_NODE_ID));

    let mut hooks = HookRegistry::new();
    match &config.backend_url {
        Some(url) => {
            let mut backend = BackendConfig::new(
                url.clone(),
                config.control_secret.clone().unwrap_or_default(),
            );
            if let Some(timeout) = config.backend_timeout() {
                backend = backend.with_timeout(timeout);
            }
            let client = BackendClient::new(backend).context("Failed to create backend client")?;
            let proxy = Arc::new(BackendProxy::new(client, reporter.clone()).with_guard(guard.clone()));
            proxy.register(&mut hooks);
            info!(backend_url = %url, "Proxying actions to backend");
        }
        None => warn!("No backend URL configured, every action will be undone as unknown"),
    }

    let queue = OrderingQueue::new(
        QueueConfig {
            lanes: config.lanes.clone(),
            development: config.development,
            ..Default::default()
        },
        hooks,
        log.clone(),
        reporter,
    )?;

    if config.control_secret.is_none() {
        warn!("No control secret configured, secret-gated control routes refuse every request");
    }
    let server = ControlServer::new(config.control_secret.as_deref(), guard)
        .route(
            "/",
            ControlRoute::Command(Arc::new(ActionCommandRoute::new(queue.clone(), log))),
        )
        .route(
            "/metrics",
            ControlRoute::Request(Arc::new(MetricsRoute::new(metrics))),
        );

    let addr = config.control_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind control server to {}", addr))?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server_task = tokio::spawn(server.serve(listener, async move {
        let _ = stop_rx.await;
    }));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => warn!("Control server stopped"),
                Ok(Err(e)) => error!(error = %e, "Control server failed"),
                Err(e) => error!(error = %e, "Control server task failed"),
            }
        }
    }

    let _ = stop_tx.send(());
    if !server_task.is_finished() {
        if let Err(e) = server_task.await {
            error!(error = %e, "Control server task failed");
        }
    }

    info!(pending = queue.pending(), "Draining ordering queue");
    queue.drain().await;
    info!("Sync proxy stopped");
    Ok(())
}
