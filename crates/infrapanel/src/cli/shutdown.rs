//! Shutdown coordination for graceful termination

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use infrapanel_config::LogType;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fans a single shutdown request out to the HTTP server and the monitors.
/// Game server processes are not touched; they keep running and are
/// re-attached by the reconciler on the next boot.
#[derive(Debug, Default)]
pub struct ShutdownController {
    token: CancellationToken,
    shutdown_triggered: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger_shutdown(&self, reason: &str) {
        if self.shutdown_triggered.swap(true, Ordering::SeqCst) {
            debug!(
                log_type = LogType::Supervisor.as_str(),
                "Shutdown already in progress, ignoring additional request"
            );
            return;
        }

        info!(
            log_type = LogType::Supervisor.as_str(),
            "Initiating shutdown: {}", reason
        );
        self.token.cancel();
    }

    pub fn is_shutdown_triggered(&self) -> bool {
        self.shutdown_triggered.load(Ordering::SeqCst)
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "received Ctrl+C",
        _ = terminate => "received SIGTERM",
    }
}
