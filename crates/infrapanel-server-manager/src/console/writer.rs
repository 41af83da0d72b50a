use std::path::{Path, PathBuf};

use infrapanel_config::LogType;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

const CHANNEL_CAPACITY: usize = 256;

/// Append-mode console file fed by a single writer task.
///
/// Every output pipe of a process gets a clone of [`sender`](Self::sender).
/// The writer stops when `closed` fires or every sender is gone, writing out
/// whatever was already queued before it flushes.
#[derive(Debug)]
pub struct ConsoleStream {
    path: PathBuf,
    sender: mpsc::Sender<Vec<u8>>,
    closed: CancellationToken,
    task: JoinHandle<()>,
}

impl ConsoleStream {
    pub async fn open(path: &Path, closed: CancellationToken) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(write_loop(
            file,
            receiver,
            closed.clone(),
            path.to_path_buf(),
        ));

        Ok(Self {
            path: path.to_path_buf(),
            sender,
            closed,
            task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.sender.clone()
    }

    pub async fn write_line(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        if !line.ends_with('\n') {
            bytes.push(b'\n');
        }
        let _ = self.sender.send(bytes).await;
    }

    /// Closes the stream and waits until the file is flushed.
    pub async fn finish(self) {
        let Self {
            sender,
            closed,
            task,
            path,
        } = self;
        drop(sender);
        closed.cancel();
        if let Err(e) = task.await {
            warn!(
                log_type = LogType::Console.as_str(),
                "Console writer for {} ended abnormally: {}",
                path.display(),
                e
            );
        }
    }
}

async fn write_loop(
    mut file: File,
    mut receiver: mpsc::Receiver<Vec<u8>>,
    closed: CancellationToken,
    path: PathBuf,
) {
    loop {
        tokio::select! {
            biased;
            chunk = receiver.recv() => match chunk {
                Some(chunk) => {
                    if !append(&mut file, &chunk, &path).await {
                        break;
                    }
                }
                None => break,
            },
            _ = closed.cancelled() => {
                receiver.close();
                while let Some(chunk) = receiver.recv().await {
                    if !append(&mut file, &chunk, &path).await {
                        break;
                    }
                }
                break;
            }
        }
    }

    if let Err(e) = file.flush().await {
        warn!(
            log_type = LogType::Console.as_str(),
            "Failed to flush console log {}: {}",
            path.display(),
            e
        );
    }
    debug!(
        log_type = LogType::Console.as_str(),
        "Closed console log {}",
        path.display()
    );
}

async fn append(file: &mut File, chunk: &[u8], path: &Path) -> bool {
    match file.write_all(chunk).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                log_type = LogType::Console.as_str(),
                "Failed to append to console log {}: {}",
                path.display(),
                e
            );
            false
        }
    }
}

/// Splits a raw byte stream into lines for pattern matching.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line));
        }
        lines
    }

    /// Whatever trails the last newline, if anything.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(decode_line(&line))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}
