use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use infrapanel_config::LogType;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::memory::{bytes_to_mb, parse_memory_bytes};
use crate::model::{ServerRecord, ServerStatus};
use crate::process::ProcessTable;
use crate::registry::ServerRegistry;

/// Resource usage of one process at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    /// Share of the whole machine, 0-100.
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

pub trait ProcessSampler: Send + Debug {
    /// Samples the given pids. A pid missing from the result is gone.
    fn sample(&mut self, pids: &[u32]) -> HashMap<u32, ProcessSample>;
}

#[derive(Debug)]
pub struct SysinfoSampler {
    system: System,
    cpus: f64,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            system: System::new(),
            cpus: cpus as f64,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler for SysinfoSampler {
    fn sample(&mut self, pids: &[u32]) -> HashMap<u32, ProcessSample> {
        let targets: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&targets), true);

        pids.iter()
            .filter_map(|pid| {
                let process = self.system.process(Pid::from_u32(*pid))?;
                if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
                    return None;
                }
                Some((
                    *pid,
                    ProcessSample {
                        cpu_percent: f64::from(process.cpu_usage()) / self.cpus,
                        memory_bytes: process.memory(),
                    },
                ))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Metrics {
    cpu_usage: f64,
    ram_usage: f64,
    current_ram: u64,
}

impl Metrics {
    fn from_sample(sample: &ProcessSample, max_ram: &str) -> Self {
        let ram_usage = match parse_memory_bytes(max_ram) {
            Ok(max) if max > 0 => sample.memory_bytes as f64 / max as f64 * 100.0,
            _ => 0.0,
        };
        Self {
            cpu_usage: round1(sample.cpu_percent.clamp(0.0, 100.0)),
            ram_usage: round1(ram_usage.clamp(0.0, 100.0)),
            current_ram: bytes_to_mb(sample.memory_bytes),
        }
    }

    fn of(record: &ServerRecord) -> Self {
        Self {
            cpu_usage: record.cpu_usage,
            ram_usage: record.ram_usage,
            current_ram: record.current_ram,
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Change {
    Sampled { pid: u32, metrics: Metrics },
    Died { pid: u32 },
    Zeroed,
}

/// Counts from one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub sampled: usize,
    pub updated: usize,
    pub died: usize,
    pub zeroed: usize,
}

/// Periodic CPU/RAM sampling of every `Online` server.
#[derive(Debug)]
pub struct StatsPoller {
    registry: ServerRegistry,
    table: Arc<ProcessTable>,
    sampler: Box<dyn ProcessSampler>,
    interval: Duration,
}

impl StatsPoller {
    pub fn new(registry: ServerRegistry, table: Arc<ProcessTable>, interval: Duration) -> Self {
        Self {
            registry,
            table,
            sampler: Box::new(SysinfoSampler::new()),
            interval,
        }
    }

    pub fn with_sampler(mut self, sampler: Box<dyn ProcessSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            log_type = LogType::Stats.as_str(),
            "Stats poller running every {:?}", self.interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(
                            log_type = LogType::Stats.as_str(),
                            "Stats poll failed: {}", e
                        );
                    }
                }
            }
        }

        debug!(log_type = LogType::Stats.as_str(), "Stats poller stopped");
    }

    pub async fn poll_once(&mut self) -> Result<PollSummary> {
        let servers = self.registry.load().await?;
        let mut summary = PollSummary::default();

        let pids: Vec<u32> = servers
            .iter()
            .filter(|s| s.status == ServerStatus::Online)
            .filter_map(|s| s.pid)
            .collect();
        let samples = if pids.is_empty() {
            HashMap::new()
        } else {
            self.sampler.sample(&pids)
        };
        summary.sampled = samples.len();

        let mut changes: Vec<(String, Change)> = Vec::new();
        for server in &servers {
            match (server.status, server.pid) {
                (ServerStatus::Online, Some(pid)) => match samples.get(&pid) {
                    Some(sample) => {
                        let metrics = Metrics::from_sample(sample, &server.max_ram);
                        if metrics != Metrics::of(server) {
                            changes.push((server.id.clone(), Change::Sampled { pid, metrics }));
                        }
                    }
                    None => changes.push((server.id.clone(), Change::Died { pid })),
                },
                (ServerStatus::Online, None) => {}
                _ if server.has_metrics() => changes.push((server.id.clone(), Change::Zeroed)),
                _ => {}
            }
        }

        if changes.is_empty() {
            return Ok(summary);
        }

        for (id, change) in &changes {
            if let Change::Died { pid } = change
                && let Some(handle) = self.table.get(id)
                && handle.pid() == *pid
            {
                self.table.remove_instance(id, handle.instance());
            }
        }

        // Changes are re-applied onto the freshly read list so concurrent
        // lifecycle writes to other fields survive.
        let applied = self
            .registry
            .update(|servers| {
                let mut applied = PollSummary::default();
                for (id, change) in &changes {
                    let Some(server) = servers.iter_mut().find(|s| &s.id == id) else {
                        continue;
                    };
                    if apply_change(server, change) {
                        match change {
                            Change::Sampled { .. } => applied.updated += 1,
                            Change::Died { .. } => applied.died += 1,
                            Change::Zeroed => applied.zeroed += 1,
                        }
                    }
                }
                applied
            })
            .await?;

        for (id, change) in &changes {
            if let Change::Died { pid } = change {
                warn!(
                    log_type = LogType::Stats.as_str(),
                    "Process {} of server {} disappeared, marking it Error", pid, id
                );
            }
        }

        summary.updated = applied.updated;
        summary.died = applied.died;
        summary.zeroed = applied.zeroed;
        Ok(summary)
    }
}

fn still_sampled(server: &ServerRecord, pid: u32) -> bool {
    server.status == ServerStatus::Online && server.pid == Some(pid)
}

fn apply_change(server: &mut ServerRecord, change: &Change) -> bool {
    match *change {
        Change::Sampled { pid, metrics } => {
            if !still_sampled(server, pid) {
                return false;
            }
            server.cpu_usage = metrics.cpu_usage;
            server.ram_usage = metrics.ram_usage;
            server.current_ram = metrics.current_ram;
            true
        }
        Change::Died { pid } => {
            if !still_sampled(server, pid) {
                return false;
            }
            server.mark_inactive(ServerStatus::Error);
            server.error = Some(format!("Process {} is no longer running", pid));
            true
        }
        Change::Zeroed => server.status != ServerStatus::Online && server.reset_metrics(),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::model::SoftwareType;

    #[derive(Debug, Default)]
    struct FixedSampler {
        samples: HashMap<u32, ProcessSample>,
    }

    impl ProcessSampler for FixedSampler {
        fn sample(&mut self, pids: &[u32]) -> HashMap<u32, ProcessSample> {
            pids.iter()
                .filter_map(|pid| self.samples.get(pid).map(|s| (*pid, *s)))
                .collect()
        }
    }

    fn record(name: &str, status: ServerStatus, pid: Option<u32>) -> ServerRecord {
        let mut record = ServerRecord::new(name, SoftwareType::Paper);
        record.status = status;
        record.pid = pid;
        record.max_ram = "2G".to_string();
        record
    }

    fn poller(dir: &TempDir, samples: HashMap<u32, ProcessSample>) -> StatsPoller {
        let registry = ServerRegistry::new(dir.path().join("servers.json"));
        StatsPoller::new(
            registry,
            Arc::new(ProcessTable::new()),
            Duration::from_millis(2500),
        )
        .with_sampler(Box::new(FixedSampler { samples }))
    }

    #[tokio::test]
    async fn test_online_server_gets_rounded_metrics() {
        let dir = TempDir::new().unwrap();
        let samples = HashMap::from([(
            100,
            ProcessSample {
                cpu_percent: 12.345,
                memory_bytes: 512 * 1024 * 1024,
            },
        )]);
        let mut poller = poller(&dir, samples);
        let online = record("lobby", ServerStatus::Online, Some(100));
        let id = online.id.clone();
        poller.registry.save(&[online]).await.unwrap();

        let summary = poller.poll_once().await.unwrap();
        assert_eq!(summary.updated, 1);

        let stored = poller.registry.find_by_id(&id).await.unwrap();
        assert_eq!(stored.cpu_usage, 12.3);
        assert_eq!(stored.ram_usage, 25.0);
        assert_eq!(stored.current_ram, 512);

        // Same numbers again: nothing to write
        let summary = poller.poll_once().await.unwrap();
        assert_eq!(summary.updated, 0);
    }

    #[tokio::test]
    async fn test_usage_is_clamped() {
        let dir = TempDir::new().unwrap();
        let samples = HashMap::from([(
            7,
            ProcessSample {
                cpu_percent: 180.0,
                memory_bytes: 3 * 1024 * 1024 * 1024,
            },
        )]);
        let mut poller = poller(&dir, samples);
        let online = record("heavy", ServerStatus::Online, Some(7));
        let id = online.id.clone();
        poller.registry.save(&[online]).await.unwrap();

        poller.poll_once().await.unwrap();
        let stored = poller.registry.find_by_id(&id).await.unwrap();
        assert_eq!(stored.cpu_usage, 100.0);
        assert_eq!(stored.ram_usage, 100.0);
        assert_eq!(stored.current_ram, 3072);
    }

    #[tokio::test]
    async fn test_vanished_process_becomes_error() {
        let dir = TempDir::new().unwrap();
        let mut poller = poller(&dir, HashMap::new());
        let mut online = record("crashy", ServerStatus::Online, Some(4242));
        online.add_player("Steve");
        online.cpu_usage = 40.0;
        let id = online.id.clone();
        poller.registry.save(&[online]).await.unwrap();

        let summary = poller.poll_once().await.unwrap();
        assert_eq!(summary.died, 1);

        let stored = poller.registry.find_by_id(&id).await.unwrap();
        assert_eq!(stored.status, ServerStatus::Error);
        assert_eq!(stored.pid, None);
        assert!(stored.connected_players.is_empty());
        assert!(!stored.has_metrics());
        assert!(stored.error.is_some());
    }

    #[tokio::test]
    async fn test_inactive_servers_are_zeroed() {
        let dir = TempDir::new().unwrap();
        let mut poller = poller(&dir, HashMap::new());

        let mut offline = record("old", ServerStatus::Offline, None);
        offline.cpu_usage = 3.5;
        offline.ram_usage = 20.0;
        offline.current_ram = 400;
        let mut starting = record("booting", ServerStatus::Starting, Some(55));
        starting.current_ram = 100;
        let clean = record("clean", ServerStatus::Offline, None);
        let ids = [offline.id.clone(), starting.id.clone(), clean.id.clone()];
        poller
            .registry
            .save(&[offline, starting, clean])
            .await
            .unwrap();

        let summary = poller.poll_once().await.unwrap();
        assert_eq!(summary.zeroed, 2);
        assert_eq!(summary.sampled, 0);

        for id in &ids {
            let stored = poller.registry.find_by_id(id).await.unwrap();
            assert!(!stored.has_metrics());
        }
        // Starting servers are not sampled and keep their pid
        let booting = poller.registry.find_by_id(&ids[1]).await.unwrap();
        assert_eq!(booting.pid, Some(55));
        assert_eq!(booting.status, ServerStatus::Starting);
    }

    #[test]
    fn test_stale_change_is_not_applied() {
        let mut server = record("lobby", ServerStatus::Online, Some(200));
        // Server was restarted with a new pid between sampling and writing
        assert!(!apply_change(&mut server, &Change::Died { pid: 100 }));
        assert_eq!(server.status, ServerStatus::Online);

        server.status = ServerStatus::Stopping;
        let metrics = Metrics {
            cpu_usage: 1.0,
            ram_usage: 1.0,
            current_ram: 1,
        };
        assert!(!apply_change(
            &mut server,
            &Change::Sampled { pid: 200, metrics }
        ));
    }
}
