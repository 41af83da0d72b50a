//! Per-server console log and the byte-offset tail protocol.
//!
//! Clients keep their own cursor: each poll passes back the last `newOffset`
//! and receives exactly the bytes appended since then.

mod writer;

use std::io::SeekFrom;
use std::path::Path;

use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub use writer::{ConsoleStream, LineBuffer};

use crate::error::{Result, ServerManagerError};
use crate::model::ServerStatus;

pub const INACTIVE_NOTICE: &str = "[Infrapanel] Server is not running. Start it to see console output.\n";
pub const NOT_CREATED_NOTICE: &str = "[Infrapanel] Console log has not been created yet.\n";
pub const STALE_NOTICE: &str =
    "[Infrapanel] Server is not active. Console output above may be stale.\n";

/// One increment of console output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleTail {
    pub logs: String,
    pub new_offset: u64,
    pub status: ServerStatus,
}

/// Reads everything appended to `path` after `offset`.
pub async fn tail(path: &Path, status: ServerStatus, offset: u64) -> Result<ConsoleTail> {
    if matches!(status, ServerStatus::Offline | ServerStatus::Stopping) {
        return Ok(ConsoleTail {
            logs: INACTIVE_NOTICE.to_string(),
            new_offset: offset,
            status,
        });
    }

    let size = match fs::metadata(path).await {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ConsoleTail {
                logs: NOT_CREATED_NOTICE.to_string(),
                new_offset: 0,
                status,
            });
        }
        Err(e) => return Err(e.into()),
    };

    if offset >= size {
        let logs = if status.is_active() {
            String::new()
        } else {
            STALE_NOTICE.to_string()
        };
        return Ok(ConsoleTail {
            logs,
            new_offset: size,
            status,
        });
    }

    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut buffer = Vec::with_capacity((size - offset) as usize);
    // The file may grow while we read; only hand out what was stat'ed.
    file.take(size - offset).read_to_end(&mut buffer).await?;

    Ok(ConsoleTail {
        logs: String::from_utf8_lossy(&buffer).into_owned(),
        new_offset: offset + buffer.len() as u64,
        status,
    })
}

pub async fn full_log(path: &Path, server_id: &str) -> Result<String> {
    match fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ServerManagerError::LogNotFound(server_id.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// A line the panel writes into the console itself, distinguishable from
/// server output.
pub fn panel_marker(message: &str) -> String {
    format!(
        "[Infrapanel] [{}] {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    )
}
