use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use infrapanel_config::{LogType, PanelConfig};
use serde::Serialize;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactProvider, NoArtifactProvider};
use crate::console::{self, ConsoleStream, ConsoleTail, LineBuffer};
use crate::error::{Result, ServerManagerError};
use crate::matcher::{LogMatcher, MatcherRegistry, PlayerEvent};
use crate::model::{ServerRecord, ServerStatus, SoftwareType};
use crate::process::launch::{self, LaunchPlan};
use crate::process::signal::{self, OsPidProbe, PidProbe, StopSignal};
use crate::process::table::{ProcessHandle, ProcessTable};
use crate::registry::ServerRegistry;

const STDIN_QUEUE: usize = 32;
const READ_BUFFER: usize = 8192;
const VELOCITY_STOP_COMMAND: &str = "end";

/// Runtime knobs for the orchestrator, usually taken from [`PanelConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    pub servers_dir: PathBuf,
    pub java_path: String,
    pub stop_command: String,
    pub grace_period: Duration,
    pub restart_delay: Duration,
    pub recovered_watch_interval: Duration,
    /// How long output readers may keep draining pipes after the process exited.
    pub output_drain_timeout: Duration,
}

impl ManagerSettings {
    pub fn from_config(config: &PanelConfig) -> Self {
        Self {
            servers_dir: config.storage.servers_dir.clone(),
            java_path: config.lifecycle.java_path.clone(),
            stop_command: config.lifecycle.stop_command.clone(),
            grace_period: config.lifecycle.grace_period,
            restart_delay: config.lifecycle.restart_delay,
            recovered_watch_interval: config.monitor.recovered_watch_interval,
            output_drain_timeout: Duration::from_secs(2),
        }
    }

    fn stop_command_for(&self, software: SoftwareType) -> &str {
        match software {
            SoftwareType::Velocity => VELOCITY_STOP_COMMAND,
            _ => &self.stop_command,
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&PanelConfig::default())
    }
}

/// Immediate answer to a lifecycle call. Completion of stop and restart is
/// observed afterwards through the registry.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerRecord>,
}

impl OperationOutcome {
    pub fn new(message: impl Into<String>, server: Option<ServerRecord>) -> Self {
        Self {
            message: message.into(),
            server,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartMode {
    Fresh,
    Restart,
}

impl StartMode {
    fn status(self) -> ServerStatus {
        match self {
            StartMode::Fresh => ServerStatus::Starting,
            StartMode::Restart => ServerStatus::Restarting,
        }
    }
}

/// Everything the supervising task owns for one spawn.
struct SupervisedRun {
    id: String,
    name: String,
    pid: u32,
    instance: u64,
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    console: ConsoleStream,
    exit_tx: watch::Sender<bool>,
    matcher: Arc<dyn LogMatcher>,
}

/// Drives start, stop, restart and console input for every managed server.
///
/// Cheap to clone; all clones share the same registry, process table and
/// per-server operation locks.
#[derive(Debug, Clone)]
pub struct ServerManager {
    registry: ServerRegistry,
    table: Arc<ProcessTable>,
    matchers: Arc<MatcherRegistry>,
    artifacts: Arc<dyn ArtifactProvider>,
    probe: Arc<dyn PidProbe>,
    settings: Arc<ManagerSettings>,
    op_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ServerManager {
    pub fn new(registry: ServerRegistry, table: Arc<ProcessTable>, settings: ManagerSettings) -> Self {
        Self {
            registry,
            table,
            matchers: Arc::new(MatcherRegistry::default()),
            artifacts: Arc::new(NoArtifactProvider),
            probe: Arc::new(OsPidProbe),
            settings: Arc::new(settings),
            op_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn with_artifact_provider(mut self, provider: Arc<dyn ArtifactProvider>) -> Self {
        self.artifacts = provider;
        self
    }

    pub fn with_matchers(mut self, matchers: MatcherRegistry) -> Self {
        self.matchers = Arc::new(matchers);
        self
    }

    pub fn with_pid_probe(mut self, probe: Arc<dyn PidProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn table(&self) -> &Arc<ProcessTable> {
        &self.table
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn probe(&self) -> &Arc<dyn PidProbe> {
        &self.probe
    }

    pub async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        self.registry.load().await
    }

    pub async fn start_server(&self, name: &str) -> Result<OperationOutcome> {
        let id = self.registry.find_by_name(name).await?.id;
        let _guard = self.lock_server(&id).await;
        self.start_locked(&id, StartMode::Fresh).await
    }

    pub async fn stop_server(&self, name: &str) -> Result<OperationOutcome> {
        let id = self.registry.find_by_name(name).await?.id;
        let _guard = self.lock_server(&id).await;
        let record = self.registry.find_by_id(&id).await?;

        let handle = match self.table.get(&id) {
            Some(handle) if record.status != ServerStatus::Offline => handle,
            tracked => {
                if let Some(handle) = tracked {
                    warn!(
                        log_type = LogType::ServerManager.as_str(),
                        "Server {} is recorded Offline but pid {} is still tracked",
                        record.name,
                        handle.pid()
                    );
                }
                return self.settle_offline(record).await;
            }
        };

        if record.status == ServerStatus::Stopping {
            return Ok(OperationOutcome::new(
                format!("Server {} is already stopping", record.name),
                Some(record),
            ));
        }

        let pid = handle.pid();
        let marked = self
            .registry
            .update_server(&id, |s| {
                if !owns_live_pid(s, pid) {
                    return None;
                }
                s.status = ServerStatus::Stopping;
                Some(s.clone())
            })
            .await?;

        // The exit handler already settled this spawn and is about to drop it.
        let Some(server) = marked else {
            let record = self.registry.find_by_id(&id).await?;
            return self.settle_offline(record).await;
        };

        handle.request_stop();
        self.begin_shutdown(id, handle, server.software_type);

        info!(
            log_type = LogType::ServerManager.as_str(),
            "Stopping server {}", server.name
        );
        Ok(OperationOutcome::new(
            format!("Server {} is stopping", server.name),
            Some(server),
        ))
    }

    pub async fn restart_server(&self, name: &str) -> Result<OperationOutcome> {
        let id = self.registry.find_by_name(name).await?.id;
        let guard = self.lock_server(&id).await;

        let Some(handle) = self.table.get(&id) else {
            return self.start_locked(&id, StartMode::Fresh).await;
        };

        let pid = handle.pid();
        let (server, live) = self
            .registry
            .update_server(&id, |s| {
                let live = owns_live_pid(s, pid);
                if live {
                    s.status = ServerStatus::Restarting;
                }
                (s.clone(), live)
            })
            .await?;

        let already_stopping = handle.stop_requested();
        handle.request_stop();

        // The continuation inherits the operation lock, so nothing else can
        // start or stop this server until the new process is up.
        self.spawn_restart(guard, id.clone(), handle.clone());
        // A settled spawn is already on its way out; only wait for it.
        if live && !already_stopping {
            self.begin_shutdown(id, handle, server.software_type);
        }

        info!(
            log_type = LogType::ServerManager.as_str(),
            "Restarting server {}", server.name
        );
        Ok(OperationOutcome::new(
            format!("Server {} is restarting", server.name),
            Some(server),
        ))
    }

    pub async fn send_command(&self, id: &str, command: &str) -> Result<OperationOutcome> {
        let record = self.registry.find_by_id(id).await?;

        let command = command.trim();
        if command.is_empty() {
            return Err(ServerManagerError::InvalidCommand(
                "command must not be empty".to_string(),
            ));
        }

        if !record.status.accepts_commands() {
            return Err(ServerManagerError::invalid_state(format!(
                "server {} is {}, commands need a running server",
                record.name, record.status
            )));
        }

        let handle = self
            .table
            .get(id)
            .filter(ProcessHandle::has_stdin)
            .ok_or_else(|| ServerManagerError::StdinUnavailable(record.name.clone()))?;

        handle.write_line(format!("{}\n", command)).await?;

        debug!(
            log_type = LogType::ServerManager.as_str(),
            "Sent command to {}: {}", record.name, command
        );
        Ok(OperationOutcome::new(
            format!("Command sent to {}", record.name),
            None,
        ))
    }

    pub async fn tail_console(&self, id: &str, offset: u64) -> Result<ConsoleTail> {
        let record = self.registry.find_by_id(id).await?;
        let path = record.console_log_path(&self.settings.servers_dir);
        console::tail(&path, record.status, offset).await
    }

    pub async fn full_log(&self, id: &str) -> Result<String> {
        let record = self.registry.find_by_id(id).await?;
        let path = record.console_log_path(&self.settings.servers_dir);
        console::full_log(&path, id).await
    }

    pub(crate) async fn lock_server(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self.op_locks.entry(id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    async fn start_locked(&self, id: &str, mode: StartMode) -> Result<OperationOutcome> {
        let record = self.registry.find_by_id(id).await?;

        if self.table.contains(id) {
            return Err(ServerManagerError::AlreadyRunning(record.name));
        }
        if record.status == ServerStatus::Starting && record.pid.is_none() {
            return Err(ServerManagerError::invalid_state(format!(
                "server {} is still being provisioned",
                record.name
            )));
        }

        let working_dir = record.working_dir(&self.settings.servers_dir);
        fs::create_dir_all(&working_dir).await?;

        if let Some(missing) = launch::missing_artifact(&record, &working_dir) {
            info!(
                log_type = LogType::ServerManager.as_str(),
                "Launch artifact {} for server {} is missing, fetching it",
                missing.display(),
                record.name
            );
            self.artifacts.ensure_artifact(&record, &missing).await?;
        }

        if launch::ensure_eula(record.software_type, &working_dir).await? {
            debug!(
                log_type = LogType::ServerManager.as_str(),
                "Accepted EULA for server {}", record.name
            );
        }

        let plan = LaunchPlan::for_server(&record, &working_dir, &self.settings.java_path)?;
        let log_path = record.console_log_path(&self.settings.servers_dir);
        let closed = CancellationToken::new();
        let console = ConsoleStream::open(&log_path, closed.clone()).await?;
        console
            .write_line(&console::panel_marker(&format!(
                "Starting server {}: {}",
                record.name,
                plan.display()
            )))
            .await;

        debug!(
            log_type = LogType::Process.as_str(),
            "Spawning '{}' in {}",
            plan.display(),
            working_dir.display()
        );

        let mut child = match plan.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                return Err(self
                    .fail_spawn(&record, &log_path, console, e.to_string())
                    .await);
            }
        };

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(pid), (Some(stdin), Some(stdout), Some(stderr))) = (child.id(), pipes) else {
            let _ = child.start_kill();
            return Err(self
                .fail_spawn(
                    &record,
                    &log_path,
                    console,
                    "process exited before its pipes were attached".to_string(),
                )
                .await);
        };

        let instance = self.table.next_instance();
        let (stdin_tx, stdin_rx) = mpsc::channel(STDIN_QUEUE);
        let (exit_tx, exit_rx) = watch::channel(false);
        let handle = ProcessHandle::spawned(pid, instance, stdin_tx, closed.clone(), exit_rx);

        let status = mode.status();
        let persisted = self
            .registry
            .update_server(id, |s| {
                s.mark_running(status, pid);
                s.console_log_file = Some(log_path.clone());
                s.clone()
            })
            .await;

        let server = match persisted.and_then(|server| {
            self.table.register(id, handle)?;
            Ok(server)
        }) {
            Ok(server) => server,
            Err(e) => {
                error!(
                    log_type = LogType::ServerManager.as_str(),
                    "Could not track server {} (pid {}), killing it: {}", record.name, pid, e
                );
                abort_spawn(child, pid, console).await;
                self.discard_untracked_spawn(id, pid, &e).await;
                return Err(e);
            }
        };

        tokio::spawn(forward_stdin(stdin, stdin_rx, closed, record.name.clone()));
        tokio::spawn(self.clone().supervise(SupervisedRun {
            id: id.to_string(),
            name: record.name.clone(),
            pid,
            instance,
            child,
            stdout,
            stderr,
            console,
            exit_tx,
            matcher: self.matchers.get(record.software_type),
        }));

        info!(
            log_type = LogType::ServerManager.as_str(),
            "Started server {} with pid {}", record.name, pid
        );

        let message = match mode {
            StartMode::Fresh => format!("Server {} is starting", record.name),
            StartMode::Restart => format!("Server {} is coming back up", record.name),
        };
        Ok(OperationOutcome::new(message, Some(server)))
    }

    async fn fail_spawn(
        &self,
        record: &ServerRecord,
        log_path: &Path,
        console: ConsoleStream,
        reason: String,
    ) -> ServerManagerError {
        error!(
            log_type = LogType::ServerManager.as_str(),
            "Failed to spawn server {}: {}", record.name, reason
        );

        console
            .write_line(&console::panel_marker(&format!(
                "Failed to start server {}: {}",
                record.name, reason
            )))
            .await;
        console.finish().await;

        let message = format!("Failed to start: {}", reason);
        if let Err(e) = self
            .registry
            .update_server(&record.id, |s| {
                s.mark_inactive(ServerStatus::Error);
                s.error = Some(message);
                s.console_log_file = Some(log_path.to_path_buf());
            })
            .await
        {
            error!(
                log_type = LogType::ServerManager.as_str(),
                "Failed to record spawn failure for {}: {}", record.name, e
            );
        }

        ServerManagerError::SpawnFailed(reason)
    }

    /// Marks a spawn the table refused as failed, unless the record already
    /// moved on to another pid.
    async fn discard_untracked_spawn(&self, id: &str, pid: u32, failure: &ServerManagerError) {
        let message = format!("Failed to start: {}", failure);
        let result = self
            .registry
            .update_server(id, |s| {
                if s.pid != Some(pid) {
                    return false;
                }
                s.mark_inactive(ServerStatus::Error);
                s.error = Some(message);
                true
            })
            .await;

        if let Err(e) = result {
            error!(
                log_type = LogType::ServerManager.as_str(),
                "Failed to record aborted spawn of pid {} for {}: {}", pid, id, e
            );
        }
    }

    async fn settle_offline(&self, record: ServerRecord) -> Result<OperationOutcome> {
        let disagrees = record.status != ServerStatus::Offline
            || record.pid.is_some()
            || !record.connected_players.is_empty();

        let server = if disagrees {
            debug!(
                log_type = LogType::ServerManager.as_str(),
                "Server {} is not running but recorded {}, resetting to Offline",
                record.name,
                record.status
            );
            self.registry
                .update_server(&record.id, |s| {
                    s.mark_inactive(ServerStatus::Offline);
                    s.clone()
                })
                .await?
        } else {
            record
        };

        Ok(OperationOutcome::new(
            format!("Server {} is already offline", server.name),
            Some(server),
        ))
    }

    /// Graceful stop followed by a kill once the grace period runs out. The
    /// kill only fires while the table still holds this exact spawn.
    pub(crate) fn begin_shutdown(&self, id: String, handle: ProcessHandle, software: SoftwareType) {
        let manager = self.clone();
        tokio::spawn(async move { manager.shutdown(id, handle, software).await });
    }

    async fn shutdown(self, id: String, handle: ProcessHandle, software: SoftwareType) {
        let pid = handle.pid();

        let mut graceful = false;
        if handle.has_stdin() {
            let command = format!("{}\n", self.settings.stop_command_for(software));
            match handle.write_line(command).await {
                Ok(()) => graceful = true,
                Err(e) => warn!(
                    log_type = LogType::ServerManager.as_str(),
                    "Could not write stop command to pid {}: {}", pid, e
                ),
            }
        }

        if !graceful
            && let Err(e) = signal::send_signal(pid, handle.signals_group(), StopSignal::Terminate)
        {
            warn!(
                log_type = LogType::ServerManager.as_str(),
                "Failed to terminate pid {}: {}", pid, e
            );
        }

        tokio::select! {
            _ = handle.wait_exit() => {
                debug!(
                    log_type = LogType::ServerManager.as_str(),
                    "Pid {} exited within the grace period", pid
                );
                return;
            }
            _ = time::sleep(self.settings.grace_period) => {}
        }

        if !self.table.is_current(&id, handle.instance()) {
            return;
        }

        warn!(
            log_type = LogType::ServerManager.as_str(),
            "Server {} (pid {}) did not stop within {:?}, killing it",
            id,
            pid,
            self.settings.grace_period
        );
        if let Err(e) = signal::send_signal(pid, handle.signals_group(), StopSignal::Kill) {
            error!(
                log_type = LogType::ServerManager.as_str(),
                "Failed to kill pid {}: {}", pid, e
            );
        }
    }

    fn spawn_restart(&self, guard: OwnedMutexGuard<()>, id: String, handle: ProcessHandle) {
        let manager = self.clone();
        // Bounded so a process that ignores even SIGKILL cannot hold the lock forever.
        let exit_deadline = self.settings.grace_period + Duration::from_secs(30);

        tokio::spawn(async move {
            let _guard = guard;

            if time::timeout(exit_deadline, handle.wait_exit()).await.is_err() {
                error!(
                    log_type = LogType::ServerManager.as_str(),
                    "Pid {} of server {} never exited, abandoning restart",
                    handle.pid(),
                    id
                );
                return;
            }

            time::sleep(manager.settings.restart_delay).await;

            match manager.start_locked(&id, StartMode::Restart).await {
                Ok(outcome) => info!(
                    log_type = LogType::ServerManager.as_str(),
                    "{}", outcome.message
                ),
                Err(ServerManagerError::AlreadyRunning(name)) => debug!(
                    log_type = LogType::ServerManager.as_str(),
                    "Server {} was started by someone else during restart", name
                ),
                Err(e) => {
                    error!(
                        log_type = LogType::ServerManager.as_str(),
                        "Restart of server {} failed: {}", id, e
                    );
                    if !matches!(e, ServerManagerError::SpawnFailed(_)) {
                        manager.record_failure(&id, &e).await;
                    }
                }
            }
        });
    }

    async fn record_failure(&self, id: &str, failure: &ServerManagerError) {
        if self.table.contains(id) {
            return;
        }
        let message = failure.to_string();
        if let Err(e) = self
            .registry
            .update_server(id, |s| {
                s.mark_inactive(ServerStatus::Error);
                s.error = Some(message);
            })
            .await
        {
            error!(
                log_type = LogType::ServerManager.as_str(),
                "Failed to record failure for server {}: {}", id, e
            );
        }
    }

    async fn supervise(self, run: SupervisedRun) {
        let SupervisedRun {
            id,
            name,
            pid,
            instance,
            mut child,
            stdout,
            stderr,
            console,
            exit_tx,
            matcher,
        } = run;

        let readers = [
            tokio::spawn(self.clone().pump_output(
                id.clone(),
                pid,
                instance,
                stdout,
                console.sender(),
                matcher.clone(),
            )),
            tokio::spawn(self.clone().pump_output(
                id.clone(),
                pid,
                instance,
                stderr,
                console.sender(),
                matcher,
            )),
        ];

        let description = match child.wait().await {
            Ok(status) => describe_exit(status),
            Err(e) => format!("could not be waited on: {}", e),
        };

        // Grandchildren may keep the pipes open after the direct child is gone.
        for reader in readers {
            let abort = reader.abort_handle();
            if time::timeout(self.settings.output_drain_timeout, reader)
                .await
                .is_err()
            {
                abort.abort();
            }
        }

        console
            .write_line(&console::panel_marker(&format!(
                "Server process {} {}",
                pid, description
            )))
            .await;
        console.finish().await;

        debug!(
            log_type = LogType::Process.as_str(),
            "Server {} (pid {}) {}", name, pid, description
        );

        self.handle_exit(&id, pid, instance, &description).await;
        exit_tx.send_replace(true);
    }

    /// Settles the registry after a process went away and drops its table
    /// entry. Exits the panel asked for end `Offline`, anything else `Error`.
    pub(crate) async fn handle_exit(&self, id: &str, pid: u32, instance: u64, description: &str) {
        let current = self.table.get(id).filter(|h| h.instance() == instance);
        let owned = current.is_some();
        let stop_requested = current.as_ref().is_some_and(ProcessHandle::stop_requested);

        let result = self
            .registry
            .update_server(id, |s| {
                // Someone else (the stats poller) already settled this spawn.
                if !owned && s.pid != Some(pid) {
                    return None;
                }

                let previous = s.status;
                if stop_requested || s.status == ServerStatus::Stopping {
                    s.mark_inactive(ServerStatus::Offline);
                } else {
                    s.mark_inactive(ServerStatus::Error);
                    s.error = Some(format!("Process {} {}", pid, description));
                }
                Some((s.name.clone(), previous, s.status))
            })
            .await;

        match result {
            Ok(Some((name, previous, ServerStatus::Offline))) => info!(
                log_type = LogType::ServerManager.as_str(),
                "Server {} stopped ({} -> Offline)", name, previous
            ),
            Ok(Some((name, previous, status))) => warn!(
                log_type = LogType::ServerManager.as_str(),
                "Server {} exited unexpectedly ({} -> {}): pid {} {}",
                name,
                previous,
                status,
                pid,
                description
            ),
            Ok(None) => debug!(
                log_type = LogType::ServerManager.as_str(),
                "Exit of pid {} for {} was already handled", pid, id
            ),
            Err(e) => error!(
                log_type = LogType::ServerManager.as_str(),
                "Failed to record exit of pid {} for {}: {}", pid, id, e
            ),
        }

        self.table.remove_instance(id, instance);
    }

    async fn pump_output<R>(
        self,
        id: String,
        pid: u32,
        instance: u64,
        mut reader: R,
        console: mpsc::Sender<Vec<u8>>,
        matcher: Arc<dyn LogMatcher>,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut buffer = vec![0u8; READ_BUFFER];
        let mut lines = LineBuffer::default();

        loop {
            let read = match reader.read(&mut buffer).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => {
                    debug!(
                        log_type = LogType::Console.as_str(),
                        "Output pipe of pid {} failed: {}", pid, e
                    );
                    break;
                }
            };

            let chunk = &buffer[..read];
            let _ = console.send(chunk.to_vec()).await;
            for line in lines.push(chunk) {
                self.observe_line(&id, pid, instance, matcher.as_ref(), &line)
                    .await;
            }
        }

        if let Some(line) = lines.finish() {
            self.observe_line(&id, pid, instance, matcher.as_ref(), &line)
                .await;
        }
    }

    async fn observe_line(
        &self,
        id: &str,
        pid: u32,
        instance: u64,
        matcher: &dyn LogMatcher,
        line: &str,
    ) {
        let ready = matcher.is_ready(line);
        let event = if ready { None } else { matcher.player_event(line) };
        if !ready && event.is_none() {
            return;
        }

        let Some(handle) = self.table.get(id).filter(|h| h.instance() == instance) else {
            return;
        };
        // A server printing its ready line while being stopped stays stopping.
        if ready && handle.stop_requested() {
            return;
        }

        let result = self
            .registry
            .update_server(id, |s| {
                if s.pid != Some(pid) {
                    return false;
                }
                match &event {
                    None if matches!(s.status, ServerStatus::Starting | ServerStatus::Restarting) => {
                        s.status = ServerStatus::Online;
                        true
                    }
                    None => false,
                    Some(PlayerEvent::Joined(player)) => s.add_player(player),
                    Some(PlayerEvent::Left(player)) => s.remove_player(player),
                }
            })
            .await;

        match result {
            Ok(true) if ready => info!(
                log_type = LogType::ServerManager.as_str(),
                "Server {} is online", id
            ),
            Ok(true) => debug!(
                log_type = LogType::ServerManager.as_str(),
                "Player list of {} changed: {:?}", id, event
            ),
            Ok(false) => {}
            Err(e) => warn!(
                log_type = LogType::ServerManager.as_str(),
                "Failed to apply console event for {}: {}", id, e
            ),
        }
    }

    /// Tracks a process left behind by a previous panel run. It has no stdin;
    /// a watcher polls its pid and runs the usual exit handling once it is gone.
    pub(crate) fn adopt_recovered(&self, id: &str, pid: u32) -> Result<ProcessHandle> {
        let (exit_tx, exit_rx) = watch::channel(false);
        let handle = ProcessHandle::recovered(pid, self.table.next_instance(), exit_rx);
        self.table.register(id, handle.clone())?;

        let manager = self.clone();
        let watched = handle.clone();
        let id = id.to_string();
        tokio::spawn(async move { manager.watch_recovered(id, watched, exit_tx).await });

        Ok(handle)
    }

    async fn watch_recovered(self, id: String, handle: ProcessHandle, exit_tx: watch::Sender<bool>) {
        let pid = handle.pid();
        let mut ticker = time::interval(self.settings.recovered_watch_interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if !self.table.is_current(&id, handle.instance()) {
                break;
            }
            if !self.probe.is_alive(pid) {
                self.handle_exit(&id, pid, handle.instance(), "is no longer running")
                    .await;
                break;
            }
        }

        exit_tx.send_replace(true);
    }
}

/// Whether `server` is still recorded as running `pid`. False once the exit
/// handler has settled the spawn.
fn owns_live_pid(server: &ServerRecord, pid: u32) -> bool {
    server.pid == Some(pid) && !matches!(server.status, ServerStatus::Offline | ServerStatus::Error)
}

async fn forward_stdin(
    mut stdin: ChildStdin,
    mut lines: mpsc::Receiver<String>,
    closed: CancellationToken,
    name: String,
) {
    loop {
        let line = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        if let Err(e) = write_stdin(&mut stdin, &line).await {
            warn!(
                log_type = LogType::Process.as_str(),
                "Failed to write to stdin of {}: {}", name, e
            );
            break;
        }
    }
}

async fn write_stdin(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

async fn abort_spawn(mut child: Child, pid: u32, console: ConsoleStream) {
    if let Err(e) = signal::send_signal(pid, cfg!(unix), StopSignal::Kill) {
        warn!(
            log_type = LogType::Process.as_str(),
            "Failed to kill untracked pid {}: {}", pid, e
        );
    }
    let _ = child.wait().await;
    console.finish().await;
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("was terminated by signal {}", signal);
        }
    }

    "exited".to_string()
}
