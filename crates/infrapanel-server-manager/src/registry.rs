//! Durable JSON registry of every managed server.
//!
//! There is no cache: every read goes to disk and every mutation rewrites the
//! whole collection. Writers inside one panel process are serialized by an
//! async file lock, so concurrent read-modify-write cycles here cannot lose
//! each other's changes. Separate processes writing the same file still race.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use infrapanel_config::LogType;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::{Result, ServerManagerError};
use crate::model::ServerRecord;

#[derive(Debug, Clone)]
pub struct ServerRegistry {
    path: PathBuf,
    file_lock: Arc<Mutex<()>>,
}

impl ServerRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current list from disk. A missing file is an empty registry.
    pub async fn load(&self) -> Result<Vec<ServerRecord>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                error!(
                    log_type = LogType::Registry.as_str(),
                    "Failed to read registry {}: {}",
                    self.path.display(),
                    e
                );
                return Err(e.into());
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            error!(
                log_type = LogType::Registry.as_str(),
                "Failed to parse registry {}: {}",
                self.path.display(),
                e
            );
            ServerManagerError::Serialization(e)
        })
    }

    pub async fn save(&self, servers: &[ServerRecord]) -> Result<()> {
        let _guard = self.file_lock.lock().await;
        self.write_unlocked(servers).await
    }

    /// Read-modify-write of the whole collection. The file is only rewritten
    /// when the closure actually changed something.
    pub async fn update<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<ServerRecord>) -> T,
    {
        let _guard = self.file_lock.lock().await;
        let mut servers = self.load().await?;
        let before = servers.clone();

        let output = f(&mut servers);

        if servers != before {
            self.write_unlocked(&servers).await?;
        }
        Ok(output)
    }

    pub async fn update_server<F, T>(&self, id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut ServerRecord) -> T,
    {
        self.update(|servers| servers.iter_mut().find(|s| s.id == id).map(f))
            .await?
            .ok_or_else(|| ServerManagerError::NotFound(id.to_string()))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<ServerRecord> {
        self.load()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ServerManagerError::NotFound(id.to_string()))
    }

    /// Resolves a server name, which must match exactly one record.
    pub async fn find_by_name(&self, name: &str) -> Result<ServerRecord> {
        let mut matches: Vec<ServerRecord> = self
            .load()
            .await?
            .into_iter()
            .filter(|s| s.name == name)
            .collect();

        match matches.len() {
            0 => Err(ServerManagerError::NotFound(name.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(ServerManagerError::Ambiguous(name.to_string())),
        }
    }

    pub async fn insert(&self, record: ServerRecord) -> Result<()> {
        let id = record.id.clone();
        let inserted = self
            .update(|servers| {
                if servers.iter().any(|s| s.id == record.id) {
                    return false;
                }
                servers.push(record);
                true
            })
            .await?;

        if !inserted {
            return Err(ServerManagerError::invalid_state(format!(
                "a server with id {} already exists",
                id
            )));
        }
        Ok(())
    }

    async fn write_unlocked(&self, servers: &[ServerRecord]) -> Result<()> {
        let content = serde_json::to_string_pretty(servers)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content).await.map_err(|e| {
            error!(
                log_type = LogType::Registry.as_str(),
                "Failed to write temporary registry file {}: {}",
                temp_path.display(),
                e
            );
            e
        })?;
        fs::rename(&temp_path, &self.path).await?;

        debug!(
            log_type = LogType::Registry.as_str(),
            "Persisted {} server records", servers.len()
        );
        Ok(())
    }
}
