use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Java executable used for direct jar launches.
    pub java_path: String,

    /// How long a graceful stop may take before the process is killed.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,

    /// Pause between the old process exiting and the new one spawning on restart.
    #[serde(with = "humantime_serde")]
    pub restart_delay: Duration,

    /// Console command written to stdin for a graceful shutdown.
    pub stop_command: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            java_path: "java".to_string(),
            grace_period: Duration::from_secs(10),
            restart_delay: Duration::from_secs(3),
            stop_command: "stop".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,

    /// Liveness polling period for processes adopted after a panel restart.
    #[serde(with = "humantime_serde")]
    pub recovered_watch_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stats_interval: Duration::from_millis(2500),
            recovered_watch_interval: Duration::from_secs(2),
        }
    }
}
