use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use infrapanel_config::LogType;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{Result, ServerManagerError};
use crate::model::ServerRecord;

/// Re-materializes a missing launch artifact before a start.
#[async_trait]
pub trait ArtifactProvider: Send + Sync + Debug {
    async fn ensure_artifact(&self, record: &ServerRecord, target: &Path) -> Result<()>;
}

/// Refuses every request; starts with a missing jar fail loudly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArtifactProvider;

#[async_trait]
impl ArtifactProvider for NoArtifactProvider {
    async fn ensure_artifact(&self, _record: &ServerRecord, target: &Path) -> Result<()> {
        Err(ServerManagerError::ArtifactMissing(
            target.display().to_string(),
        ))
    }
}

/// Downloads the record's `artifactUrl`.
#[derive(Debug, Clone)]
pub struct HttpArtifactProvider {
    client: reqwest::Client,
}

impl HttpArtifactProvider {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("infrapanel/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &str, partial: &Path) -> Result<u64> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = fs::File::create(partial).await?;
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl ArtifactProvider for HttpArtifactProvider {
    async fn ensure_artifact(&self, record: &ServerRecord, target: &Path) -> Result<()> {
        let Some(url) = record.artifact_url.as_deref() else {
            return Err(ServerManagerError::ArtifactMissing(format!(
                "{} (no download URL configured for server {})",
                target.display(),
                record.name
            )));
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut partial = target.as_os_str().to_owned();
        partial.push(".part");
        let partial = std::path::PathBuf::from(partial);

        info!(
            log_type = LogType::ServerManager.as_str(),
            "Downloading {} for server {} from {}",
            target.display(),
            record.name,
            url
        );

        match self.download(url, &partial).await {
            Ok(bytes) => {
                fs::rename(&partial, target).await?;
                info!(
                    log_type = LogType::ServerManager.as_str(),
                    "Downloaded {} bytes to {}",
                    bytes,
                    target.display()
                );
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(
                        log_type = LogType::ServerManager.as_str(),
                        "Failed to remove partial download {}: {}",
                        partial.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }
}
