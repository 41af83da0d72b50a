//! Infrapanel - Minecraft server control panel
//!
//! Command-line entry point for the panel daemon.

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use infrapanel::Infrapanel;
use infrapanel::cli::{Args, ShutdownController, shutdown};
use infrapanel::telemetry;
use infrapanel_config::{LogType, PanelConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_exists = args.config.exists();
    let mut config = if config_exists {
        PanelConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else {
        PanelConfig::default()
    };
    if let Some(bind) = args.bind {
        config.http.bind = bind;
    }
    config.logging.debug |= args.debug;

    telemetry::init_subscriber(&config.logging);
    if !config_exists {
        info!(
            log_type = LogType::Config.as_str(),
            "{} not found, using default configuration",
            args.config.display()
        );
    }

    info!(
        log_type = LogType::Supervisor.as_str(),
        "Starting Infrapanel {}",
        env!("CARGO_PKG_VERSION")
    );

    let panel = Infrapanel::new(config)?;
    let controller = ShutdownController::new();

    let signal_controller = controller.clone();
    tokio::spawn(async move {
        let reason = shutdown::wait_for_signal().await;
        signal_controller.trigger_shutdown(reason);
    });

    if let Err(e) = panel.run(controller).await {
        error!(log_type = LogType::Supervisor.as_str(), "Panel error: {:#}", e);
        return Err(e);
    }

    info!(log_type = LogType::Supervisor.as_str(), "Infrapanel stopped");
    Ok(())
}
