use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use infrapanel_config::LogType;
use tokio::fs;
use tracing::{error, info};

use crate::error::{Result, ServerManagerError};
use crate::model::{ServerRecord, ServerStatus};
use crate::server_manager::{OperationOutcome, ServerManager};

/// Prepares a server directory: modpack installers, jar downloads, loader setup.
#[async_trait]
pub trait Installer: Send + Sync + Debug {
    async fn install(&self, record: &ServerRecord, working_dir: &Path) -> Result<()>;
}

impl ServerManager {
    /// Runs `installer` in the background. The record shows `Starting` without
    /// a pid while the job runs and ends `Offline` or `Error`.
    pub async fn provision(
        &self,
        id: &str,
        installer: Arc<dyn Installer>,
    ) -> Result<OperationOutcome> {
        let _guard = self.lock_server(id).await;
        let record = self.registry().find_by_id(id).await?;

        if self.table().contains(id) {
            return Err(ServerManagerError::AlreadyRunning(record.name));
        }
        if !matches!(record.status, ServerStatus::Offline | ServerStatus::Error) {
            return Err(ServerManagerError::invalid_state(format!(
                "server {} is {}, provisioning needs it Offline",
                record.name, record.status
            )));
        }

        let server = self
            .registry()
            .update_server(id, |s| {
                s.mark_inactive(ServerStatus::Starting);
                s.error = None;
                s.clone()
            })
            .await?;

        let manager = self.clone();
        let job_record = server.clone();
        tokio::spawn(async move { manager.run_installer(job_record, installer).await });

        info!(
            log_type = LogType::ServerManager.as_str(),
            "Provisioning server {}", server.name
        );
        Ok(OperationOutcome::new(
            format!("Server {} is being provisioned", server.name),
            Some(server),
        ))
    }

    async fn run_installer(self, record: ServerRecord, installer: Arc<dyn Installer>) {
        let working_dir = record.working_dir(&self.settings().servers_dir);

        let outcome = match fs::create_dir_all(&working_dir).await {
            Ok(()) => installer.install(&record, &working_dir).await,
            Err(e) => Err(e.into()),
        };

        let failure = outcome.as_ref().err().map(ToString::to_string);
        let result = self
            .registry()
            .update_server(&record.id, |s| {
                // Stopped or started by someone else meanwhile.
                if s.status != ServerStatus::Starting || s.pid.is_some() {
                    return false;
                }
                match failure {
                    None => s.mark_inactive(ServerStatus::Offline),
                    Some(message) => {
                        s.mark_inactive(ServerStatus::Error);
                        s.error = Some(message);
                    }
                }
                true
            })
            .await;

        match (outcome, result) {
            (_, Err(e)) => error!(
                log_type = LogType::ServerManager.as_str(),
                "Failed to record provisioning result for {}: {}", record.name, e
            ),
            (Ok(()), Ok(_)) => info!(
                log_type = LogType::ServerManager.as_str(),
                "Provisioned server {}", record.name
            ),
            (Err(e), Ok(_)) => error!(
                log_type = LogType::ServerManager.as_str(),
                "Provisioning server {} failed: {}", record.name, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::Notify;

    use super::*;
    use crate::model::SoftwareType;
    use crate::process::ProcessTable;
    use crate::registry::ServerRegistry;
    use crate::server_manager::ManagerSettings;

    #[derive(Debug)]
    struct GatedInstaller {
        gate: Arc<Notify>,
        fail: bool,
    }

    #[async_trait]
    impl Installer for GatedInstaller {
        async fn install(&self, _record: &ServerRecord, working_dir: &Path) -> Result<()> {
            self.gate.notified().await;
            if self.fail {
                return Err(ServerManagerError::ArtifactMissing(
                    "modpack server pack".to_string(),
                ));
            }
            fs::write(working_dir.join("server.jar"), b"jar").await?;
            Ok(())
        }
    }

    async fn manager_with(dir: &TempDir, record: ServerRecord) -> ServerManager {
        let registry = ServerRegistry::new(dir.path().join("servers.json"));
        registry.insert(record).await.unwrap();
        let settings = ManagerSettings {
            servers_dir: dir.path().join("servers"),
            ..ManagerSettings::default()
        };
        ServerManager::new(registry, Arc::new(ProcessTable::new()), settings)
    }

    async fn wait_for_status(manager: &ServerManager, id: &str, status: ServerStatus) -> ServerRecord {
        for _ in 0..200 {
            let record = manager.registry().find_by_id(id).await.unwrap();
            if record.status == status {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_successful_job_ends_offline() {
        let dir = TempDir::new().unwrap();
        let record = ServerRecord::new("modpack", SoftwareType::Forge);
        let id = record.id.clone();
        let manager = manager_with(&dir, record).await;
        let gate = Arc::new(Notify::new());

        let outcome = manager
            .provision(
                &id,
                Arc::new(GatedInstaller {
                    gate: gate.clone(),
                    fail: false,
                }),
            )
            .await
            .unwrap();
        let server = outcome.server.unwrap();
        assert_eq!(server.status, ServerStatus::Starting);
        assert_eq!(server.pid, None);

        // A second job cannot run concurrently
        assert!(matches!(
            manager
                .provision(
                    &id,
                    Arc::new(GatedInstaller {
                        gate: gate.clone(),
                        fail: false
                    })
                )
                .await,
            Err(ServerManagerError::InvalidState(_))
        ));

        gate.notify_one();
        let settled = wait_for_status(&manager, &id, ServerStatus::Offline).await;
        assert_eq!(settled.error, None);
        assert!(dir.path().join("servers").join(&id).join("server.jar").exists());
    }

    #[tokio::test]
    async fn test_failed_job_ends_in_error() {
        let dir = TempDir::new().unwrap();
        let record = ServerRecord::new("modpack", SoftwareType::NeoForge);
        let id = record.id.clone();
        let manager = manager_with(&dir, record).await;
        let gate = Arc::new(Notify::new());

        manager
            .provision(
                &id,
                Arc::new(GatedInstaller {
                    gate: gate.clone(),
                    fail: true,
                }),
            )
            .await
            .unwrap();
        gate.notify_one();

        let settled = wait_for_status(&manager, &id, ServerStatus::Error).await;
        assert!(settled.error.unwrap().contains("modpack server pack"));
    }

    #[tokio::test]
    async fn test_start_is_refused_while_provisioning() {
        let dir = TempDir::new().unwrap();
        let record = ServerRecord::new("modpack", SoftwareType::Fabric);
        let id = record.id.clone();
        let manager = manager_with(&dir, record).await;
        let gate = Arc::new(Notify::new());

        manager
            .provision(
                &id,
                Arc::new(GatedInstaller {
                    gate: gate.clone(),
                    fail: false,
                }),
            )
            .await
            .unwrap();

        assert!(matches!(
            manager.start_server("modpack").await,
            Err(ServerManagerError::InvalidState(_))
        ));
        gate.notify_one();
        wait_for_status(&manager, &id, ServerStatus::Offline).await;
    }
}
