use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use infrapanel_config::{LogType, PanelConfig};
use infrapanel_server_manager::{
    HttpArtifactProvider, ManagerSettings, ProcessTable, ServerManager, ServerRegistry,
    StartupReconciler, StatsPoller,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::api::{self, AppState};
use crate::cli::ShutdownController;

pub struct Infrapanel {
    config: PanelConfig,
    manager: ServerManager,
}

impl Infrapanel {
    pub fn new(config: PanelConfig) -> anyhow::Result<Self> {
        let registry = ServerRegistry::new(config.storage.registry_path.clone());
        let table = Arc::new(ProcessTable::new());
        let artifacts =
            HttpArtifactProvider::new().context("Failed to build the artifact download client")?;

        let manager = ServerManager::new(registry, table, ManagerSettings::from_config(&config))
            .with_artifact_provider(Arc::new(artifacts));

        Ok(Self { config, manager })
    }

    pub fn manager(&self) -> &ServerManager {
        &self.manager
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.config.http.bind
    }

    /// Reconciles the registry, then serves until `shutdown` fires.
    pub async fn run(&self, shutdown: Arc<ShutdownController>) -> anyhow::Result<()> {
        let report = StartupReconciler::new(self.manager.clone())
            .run()
            .await
            .context("Startup reconciliation failed")?;

        if report.is_clean() {
            info!(
                log_type = LogType::Reconcile.as_str(),
                "Registry is consistent with running processes"
            );
        } else {
            info!(
                log_type = LogType::Reconcile.as_str(),
                "Reconciled registry: {} recovered, {} reset, {} cleared",
                report.recovered.len(),
                report.reset.len(),
                report.cleared.len()
            );
        }

        let poller = StatsPoller::new(
            self.manager.registry().clone(),
            self.manager.table().clone(),
            self.config.monitor.stats_interval,
        );
        let poller_task = tokio::spawn(poller.run(shutdown.token()));

        let listener = TcpListener::bind(self.bind_addr())
            .await
            .with_context(|| format!("Failed to bind {}", self.bind_addr()))?;
        info!(
            log_type = LogType::Http.as_str(),
            "Listening on http://{}",
            self.bind_addr()
        );

        let app = api::router(AppState::new(self.manager.clone()));
        let token = shutdown.token();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;

        if let Err(e) = &served {
            error!(log_type = LogType::Http.as_str(), "HTTP server error: {}", e);
            shutdown.trigger_shutdown("HTTP server failed");
        }

        if let Err(e) = poller_task.await {
            warn!(
                log_type = LogType::Stats.as_str(),
                "Stats poller ended abnormally: {}", e
            );
        }

        let running = self.manager.table().len();
        if running > 0 {
            info!(
                log_type = LogType::Supervisor.as_str(),
                "Leaving {} game server(s) running; they are re-attached on next start",
                running
            );
        }

        served.context("HTTP server error")
    }
}
