use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub debug: bool,
    pub use_color: bool,
    pub show_timestamp: bool,
    pub show_target: bool,

    /// Extra `EnvFilter` directives, e.g. `"infrapanel_server_manager=trace"`.
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            show_timestamp: true,
            show_target: false,
            filter: None,
        }
    }
}

/// Value of the `log_type` field attached to every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    ServerManager,
    Process,
    Console,
    Stats,
    Reconcile,
    Registry,
    Http,
    Supervisor,
    Config,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::ServerManager => "server_manager",
            LogType::Process => "process",
            LogType::Console => "console",
            LogType::Stats => "stats",
            LogType::Reconcile => "reconcile",
            LogType::Registry => "registry",
            LogType::Http => "http",
            LogType::Supervisor => "supervisor",
            LogType::Config => "config",
        }
    }
}
