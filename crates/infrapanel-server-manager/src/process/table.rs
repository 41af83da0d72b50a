use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use infrapanel_config::LogType;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, ServerManagerError};

/// Live process tracked for one server.
///
/// Clones share the same stop flag, close token and exit signal; the handle
/// that sits in the [`ProcessTable`] is the authoritative one.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    instance: u64,
    recovered: bool,
    process_group: bool,
    stdin: Option<mpsc::Sender<String>>,
    closed: CancellationToken,
    stop_requested: Arc<AtomicBool>,
    exited: watch::Receiver<bool>,
}

impl ProcessHandle {
    /// Handle for a child spawned by this panel, owning its stdin and console stream.
    pub fn spawned(
        pid: u32,
        instance: u64,
        stdin: mpsc::Sender<String>,
        closed: CancellationToken,
        exited: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pid,
            instance,
            recovered: false,
            process_group: cfg!(unix),
            stdin: Some(stdin),
            closed,
            stop_requested: Arc::new(AtomicBool::new(false)),
            exited,
        }
    }

    /// Handle for a process that outlived a previous panel instance. Its pipes
    /// are gone, so there is no stdin and no console stream to attach.
    pub fn recovered(pid: u32, instance: u64, exited: watch::Receiver<bool>) -> Self {
        Self {
            pid,
            instance,
            recovered: true,
            process_group: false,
            stdin: None,
            closed: CancellationToken::new(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            exited,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// Whether signals should target the whole process group led by `pid`.
    pub fn signals_group(&self) -> bool {
        self.process_group
    }

    pub fn has_stdin(&self) -> bool {
        self.stdin.is_some() && !self.closed.is_cancelled()
    }

    pub async fn write_line(&self, line: String) -> Result<()> {
        let Some(stdin) = self.stdin.as_ref().filter(|_| !self.closed.is_cancelled()) else {
            return Err(ServerManagerError::StdinUnavailable(self.pid.to_string()));
        };

        stdin.send(line).await.map_err(|_| {
            ServerManagerError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "process stdin is closed",
            ))
        })
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Resolves once the process exited and its table entry was cleaned up.
    pub async fn wait_exit(&self) {
        let mut exited = self.exited.clone();
        // A dropped sender means the supervising task is gone; treat as exited.
        let _ = exited.wait_for(|exited| *exited).await;
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Exactly one live [`ProcessHandle`] per server id.
#[derive(Debug, Default)]
pub struct ProcessTable {
    entries: DashMap<String, ProcessHandle>,
    next_instance: AtomicU64,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_instance(&self) -> u64 {
        self.next_instance.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn register(&self, server_id: &str, handle: ProcessHandle) -> Result<()> {
        match self.entries.entry(server_id.to_string()) {
            Entry::Occupied(_) => Err(ServerManagerError::AlreadyRunning(server_id.to_string())),
            Entry::Vacant(entry) => {
                debug!(
                    log_type = LogType::Process.as_str(),
                    "Tracking pid {} for server {} (instance {}, recovered: {})",
                    handle.pid,
                    server_id,
                    handle.instance,
                    handle.recovered
                );
                entry.insert(handle);
                Ok(())
            }
        }
    }

    pub fn get(&self, server_id: &str) -> Option<ProcessHandle> {
        self.entries.get(server_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, server_id: &str) -> bool {
        self.entries.contains_key(server_id)
    }

    /// True while the entry for `server_id` still belongs to that spawn.
    pub fn is_current(&self, server_id: &str, instance: u64) -> bool {
        self.entries
            .get(server_id)
            .is_some_and(|entry| entry.instance == instance)
    }

    /// Drops the entry, closing its console stream and stdin first.
    pub fn remove(&self, server_id: &str) -> Option<ProcessHandle> {
        let (_, handle) = self.entries.remove(server_id)?;
        handle.close();
        debug!(
            log_type = LogType::Process.as_str(),
            "Released pid {} for server {}", handle.pid, server_id
        );
        Some(handle)
    }

    /// Like [`remove`](Self::remove) but only if the entry belongs to `instance`.
    pub fn remove_instance(&self, server_id: &str, instance: u64) -> Option<ProcessHandle> {
        let (_, handle) = self
            .entries
            .remove_if(server_id, |_, handle| handle.instance == instance)?;
        handle.close();
        debug!(
            log_type = LogType::Process.as_str(),
            "Released pid {} for server {} (instance {})", handle.pid, server_id, instance
        );
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawned_handle(table: &ProcessTable, pid: u32) -> (ProcessHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(4);
        let (_exit_tx, exit_rx) = watch::channel(false);
        let handle = ProcessHandle::spawned(
            pid,
            table.next_instance(),
            tx,
            CancellationToken::new(),
            exit_rx,
        );
        (handle, rx)
    }

    #[test]
    fn test_register_rejects_second_entry() {
        let table = ProcessTable::new();
        let (first, _rx1) = spawned_handle(&table, 10);
        let (second, _rx2) = spawned_handle(&table, 11);

        table.register("srv", first).unwrap();
        assert!(matches!(
            table.register("srv", second),
            Err(ServerManagerError::AlreadyRunning(_))
        ));
        assert_eq!(table.get("srv").unwrap().pid(), 10);
    }

    #[test]
    fn test_remove_closes_streams() {
        let table = ProcessTable::new();
        let (handle, _rx) = spawned_handle(&table, 10);
        let token = handle.close_token();
        table.register("srv", handle).unwrap();

        let removed = table.remove("srv").unwrap();
        assert!(token.is_cancelled());
        assert!(!removed.has_stdin());
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_instance_ignores_newer_spawn() {
        let table = ProcessTable::new();
        let (old, _rx1) = spawned_handle(&table, 10);
        let old_instance = old.instance();
        table.register("srv", old).unwrap();
        table.remove("srv");

        let (new, _rx2) = spawned_handle(&table, 11);
        let new_instance = new.instance();
        table.register("srv", new).unwrap();

        assert!(table.remove_instance("srv", old_instance).is_none());
        assert!(table.is_current("srv", new_instance));
        assert!(table.remove_instance("srv", new_instance).is_some());
        assert!(!table.contains("srv"));
    }

    #[tokio::test]
    async fn test_recovered_handle_has_no_stdin() {
        let table = ProcessTable::new();
        let (_exit_tx, exit_rx) = watch::channel(false);
        let handle = ProcessHandle::recovered(4242, table.next_instance(), exit_rx);

        assert!(handle.is_recovered());
        assert!(!handle.has_stdin());
        assert!(matches!(
            handle.write_line("say hi\n".to_string()).await,
            Err(ServerManagerError::StdinUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_write_line_reaches_stdin_channel() {
        let table = ProcessTable::new();
        let (handle, mut rx) = spawned_handle(&table, 10);
        handle.write_line("list\n".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "list\n");
    }

    #[tokio::test]
    async fn test_wait_exit_resolves_after_signal() {
        let (exit_tx, exit_rx) = watch::channel(false);
        let handle = ProcessHandle::recovered(1, 1, exit_rx);
        assert!(!handle.has_exited());

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_exit().await })
        };
        exit_tx.send(true).unwrap();
        waiter.await.unwrap();
        assert!(handle.has_exited());
    }
}
