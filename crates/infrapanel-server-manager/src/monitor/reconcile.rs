use infrapanel_config::LogType;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::ServerStatus;
use crate::server_manager::ServerManager;

/// What the boot-time repair did, by server id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Still alive and adopted without stdin.
    pub recovered: Vec<String>,
    /// Claimed to be running but were not; now `Offline`.
    pub reset: Vec<String>,
    /// Inactive records that only carried a stale pid.
    pub cleared: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.recovered.is_empty() && self.reset.is_empty() && self.cleared.is_empty()
    }
}

enum Adoption {
    Running,
    Stopping,
}

/// Repairs the registry against live OS processes once at panel boot, before
/// any lifecycle operation runs. The process table is empty at that point.
#[derive(Debug, Clone)]
pub struct StartupReconciler {
    manager: ServerManager,
}

impl StartupReconciler {
    pub fn new(manager: ServerManager) -> Self {
        Self { manager }
    }

    pub async fn run(&self) -> Result<ReconcileReport> {
        let probe = self.manager.probe().clone();

        let (mut report, adoptions) = self
            .manager
            .registry()
            .update(|servers| {
                let mut report = ReconcileReport::default();
                let mut adoptions = Vec::new();

                for server in servers.iter_mut() {
                    match (server.status, server.pid) {
                        (status, Some(pid)) if status.is_active() || status == ServerStatus::Stopping => {
                            if probe.is_alive(pid) {
                                let kind = if status == ServerStatus::Stopping {
                                    Adoption::Stopping
                                } else {
                                    Adoption::Running
                                };
                                adoptions.push((server.id.clone(), pid, server.software_type, kind));
                            } else {
                                server.mark_inactive(ServerStatus::Offline);
                                report.reset.push(server.id.clone());
                            }
                        }
                        (ServerStatus::Offline | ServerStatus::Error, Some(_)) => {
                            server.pid = None;
                            report.cleared.push(server.id.clone());
                        }
                        (status, None) if status.is_active() || status == ServerStatus::Stopping => {
                            server.mark_inactive(ServerStatus::Offline);
                            report.reset.push(server.id.clone());
                        }
                        _ => {}
                    }
                }

                (report, adoptions)
            })
            .await?;

        for (id, pid, software, kind) in adoptions {
            let handle = match self.manager.adopt_recovered(&id, pid) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(
                        log_type = LogType::Reconcile.as_str(),
                        "Could not adopt pid {} for server {}: {}", pid, id, e
                    );
                    continue;
                }
            };

            info!(
                log_type = LogType::Reconcile.as_str(),
                "Re-attached to running server {} (pid {}) without console input", id, pid
            );

            if let Adoption::Stopping = kind {
                // The previous panel died mid-stop; finish the job.
                handle.request_stop();
                self.manager.begin_shutdown(id.clone(), handle, software);
            }
            report.recovered.push(id);
        }

        for id in &report.reset {
            debug!(
                log_type = LogType::Reconcile.as_str(),
                "Server {} was not running, reset to Offline", id
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fmt;
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::error::ServerManagerError;
    use crate::model::{ServerRecord, SoftwareType};
    use crate::process::{PidProbe, ProcessTable};
    use crate::registry::ServerRegistry;
    use crate::server_manager::ManagerSettings;

    struct FakeProbe(HashSet<u32>);

    impl fmt::Debug for FakeProbe {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "FakeProbe({} alive)", self.0.len())
        }
    }

    impl PidProbe for FakeProbe {
        fn is_alive(&self, pid: u32) -> bool {
            self.0.contains(&pid)
        }
    }

    fn record(name: &str, status: ServerStatus, pid: Option<u32>) -> ServerRecord {
        let mut record = ServerRecord::new(name, SoftwareType::Paper);
        record.status = status;
        record.pid = pid;
        record
    }

    fn manager(dir: &TempDir, alive: &[u32]) -> ServerManager {
        let registry = ServerRegistry::new(dir.path().join("servers.json"));
        let settings = ManagerSettings {
            servers_dir: dir.path().join("servers"),
            ..ManagerSettings::default()
        };
        ServerManager::new(registry, Arc::new(ProcessTable::new()), settings)
            .with_pid_probe(Arc::new(FakeProbe(alive.iter().copied().collect())))
    }

    #[tokio::test]
    async fn test_dead_pid_is_reset_to_offline() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, &[]);
        let mut online = record("lobby", ServerStatus::Online, Some(999_999));
        online.add_player("Steve");
        online.current_ram = 1024;
        let id = online.id.clone();
        manager.registry().save(&[online]).await.unwrap();

        let report = StartupReconciler::new(manager.clone()).run().await.unwrap();
        assert_eq!(report.reset, vec![id.clone()]);
        assert!(report.recovered.is_empty());

        let stored = manager.registry().find_by_id(&id).await.unwrap();
        assert_eq!(stored.status, ServerStatus::Offline);
        assert_eq!(stored.pid, None);
        assert!(stored.connected_players.is_empty());
        assert!(!stored.has_metrics());
        assert!(manager.table().is_empty());
    }

    #[tokio::test]
    async fn test_live_pid_is_recovered_without_stdin() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, &[4242]);
        let online = record("lobby", ServerStatus::Online, Some(4242));
        let id = online.id.clone();
        manager.registry().save(&[online]).await.unwrap();

        let report = StartupReconciler::new(manager.clone()).run().await.unwrap();
        assert_eq!(report.recovered, vec![id.clone()]);

        let stored = manager.registry().find_by_id(&id).await.unwrap();
        assert_eq!(stored.status, ServerStatus::Online);
        assert_eq!(stored.pid, Some(4242));

        let handle = manager.table().get(&id).unwrap();
        assert!(handle.is_recovered());
        assert_eq!(handle.pid(), 4242);

        assert!(matches!(
            manager.send_command(&id, "say hi").await,
            Err(ServerManagerError::StdinUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_pids_and_untrackable_states() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, &[10]);
        let offline_with_pid = record("old", ServerStatus::Offline, Some(10));
        let restarting_without_pid = record("limbo", ServerStatus::Restarting, None);
        let untouched = record("idle", ServerStatus::Offline, None);
        let ids = [
            offline_with_pid.id.clone(),
            restarting_without_pid.id.clone(),
            untouched.id.clone(),
        ];
        manager
            .registry()
            .save(&[offline_with_pid, restarting_without_pid, untouched])
            .await
            .unwrap();

        let report = StartupReconciler::new(manager.clone()).run().await.unwrap();
        assert_eq!(report.cleared, vec![ids[0].clone()]);
        assert_eq!(report.reset, vec![ids[1].clone()]);
        assert!(report.recovered.is_empty());

        let old = manager.registry().find_by_id(&ids[0]).await.unwrap();
        assert_eq!((old.status, old.pid), (ServerStatus::Offline, None));
        let limbo = manager.registry().find_by_id(&ids[1]).await.unwrap();
        assert_eq!(limbo.status, ServerStatus::Offline);
    }

    #[tokio::test]
    async fn test_second_run_is_clean() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, &[]);
        manager
            .registry()
            .save(&[record("lobby", ServerStatus::Starting, Some(77))])
            .await
            .unwrap();

        let reconciler = StartupReconciler::new(manager);
        assert!(!reconciler.run().await.unwrap().is_clean());
        assert!(reconciler.run().await.unwrap().is_clean());
    }
}
