use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const CONSOLE_LOG_FILE: &str = "console.log";

/// Lifecycle state of a managed server as persisted in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ServerStatus {
    #[default]
    Offline,
    Starting,
    Online,
    #[serde(rename = "restarting")]
    Restarting,
    #[serde(rename = "stopping")]
    Stopping,
    Error,
}

impl ServerStatus {
    /// States in which a process is expected to exist and own a pid.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ServerStatus::Starting | ServerStatus::Online | ServerStatus::Restarting
        )
    }

    pub fn accepts_commands(&self) -> bool {
        self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Offline => "Offline",
            ServerStatus::Starting => "Starting",
            ServerStatus::Online => "Online",
            ServerStatus::Restarting => "restarting",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Error => "Error",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoftwareType {
    #[serde(rename = "PaperMC", alias = "Paper", alias = "paper", alias = "papermc")]
    Paper,
    #[serde(alias = "velocity")]
    Velocity,
    #[serde(alias = "forge")]
    Forge,
    #[serde(alias = "fabric")]
    Fabric,
    #[serde(alias = "neoforge")]
    NeoForge,
}

impl SoftwareType {
    /// Modded loader families ship a generated run script instead of a plain jar.
    pub fn is_modded(&self) -> bool {
        matches!(
            self,
            SoftwareType::Forge | SoftwareType::Fabric | SoftwareType::NeoForge
        )
    }

    pub fn requires_eula(&self) -> bool {
        !matches!(self, SoftwareType::Velocity)
    }

    pub fn accepts_nogui(&self) -> bool {
        !matches!(self, SoftwareType::Velocity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub port: u16,
    pub software_type: SoftwareType,
    #[serde(default)]
    pub server_version: String,
    #[serde(default = "default_min_ram")]
    pub min_ram: String,
    #[serde(default = "default_max_ram")]
    pub max_ram: String,
    #[serde(default, deserialize_with = "deserialize_launch_args")]
    pub launch_args: Vec<String>,

    /// Working directory override; defaults to `<servers_dir>/<id>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_jar_file")]
    pub jar_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,

    #[serde(default)]
    pub status: ServerStatus,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub console_log_file: Option<PathBuf>,
    #[serde(default)]
    pub connected_players: Vec<String>,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub ram_usage: f64,
    #[serde(default)]
    pub current_ram: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Fields owned by other collaborators, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_min_ram() -> String {
    "1G".to_string()
}

fn default_max_ram() -> String {
    "2G".to_string()
}

fn default_jar_file() -> String {
    "server.jar".to_string()
}

fn deserialize_launch_args<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LaunchArgs {
        Line(String),
        List(Vec<String>),
        Missing(Option<()>),
    }

    Ok(match LaunchArgs::deserialize(deserializer)? {
        LaunchArgs::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        LaunchArgs::List(list) => list,
        LaunchArgs::Missing(_) => Vec::new(),
    })
}

impl ServerRecord {
    pub fn new(name: impl Into<String>, software_type: SoftwareType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            port: 25565,
            software_type,
            server_version: String::new(),
            min_ram: default_min_ram(),
            max_ram: default_max_ram(),
            launch_args: Vec::new(),
            directory: None,
            jar_file: default_jar_file(),
            artifact_url: None,
            status: ServerStatus::Offline,
            pid: None,
            console_log_file: None,
            connected_players: Vec::new(),
            cpu_usage: 0.0,
            ram_usage: 0.0,
            current_ram: 0,
            error: None,
            extra: Map::new(),
        }
    }

    pub fn working_dir(&self, servers_dir: &Path) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| servers_dir.join(&self.id))
    }

    pub fn console_log_path(&self, servers_dir: &Path) -> PathBuf {
        self.console_log_file
            .clone()
            .unwrap_or_else(|| self.working_dir(servers_dir).join(CONSOLE_LOG_FILE))
    }

    pub fn mark_running(&mut self, status: ServerStatus, pid: u32) {
        self.status = status;
        self.pid = Some(pid);
        self.error = None;
    }

    /// Leaves the active set: drops the pid, the player list and the metrics.
    pub fn mark_inactive(&mut self, status: ServerStatus) {
        self.status = status;
        self.pid = None;
        self.connected_players.clear();
        self.reset_metrics();
    }

    pub fn has_metrics(&self) -> bool {
        self.cpu_usage != 0.0 || self.ram_usage != 0.0 || self.current_ram != 0
    }

    pub fn reset_metrics(&mut self) -> bool {
        let changed = self.has_metrics();
        self.cpu_usage = 0.0;
        self.ram_usage = 0.0;
        self.current_ram = 0;
        changed
    }

    pub fn add_player(&mut self, player: &str) -> bool {
        if self.connected_players.iter().any(|p| p == player) {
            return false;
        }
        self.connected_players.push(player.to_string());
        true
    }

    pub fn remove_player(&mut self, player: &str) -> bool {
        let before = self.connected_players.len();
        self.connected_players.retain(|p| p != player);
        before != self.connected_players.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization_matches_panel_spelling() {
        let json = serde_json::to_string(&[
            ServerStatus::Offline,
            ServerStatus::Restarting,
            ServerStatus::Stopping,
            ServerStatus::Error,
        ])
        .unwrap();
        assert_eq!(json, r#"["Offline","restarting","stopping","Error"]"#);
    }

    #[test]
    fn test_record_keeps_unknown_fields() {
        let json = r#"{
            "id": "a1",
            "name": "lobby",
            "port": 25566,
            "softwareType": "PaperMC",
            "serverVersion": "1.21.4",
            "minRam": "1G",
            "maxRam": "4G",
            "launchArgs": "-XX:+UseG1GC -Dfile.encoding=UTF-8",
            "status": "Online",
            "pid": 4242,
            "backups": ["2024-01-01.zip"],
            "owner": "admin"
        }"#;

        let record: ServerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.software_type, SoftwareType::Paper);
        assert_eq!(
            record.launch_args,
            vec!["-XX:+UseG1GC", "-Dfile.encoding=UTF-8"]
        );
        assert_eq!(record.jar_file, "server.jar");
        assert_eq!(record.extra.len(), 2);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["owner"], "admin");
        assert_eq!(value["backups"][0], "2024-01-01.zip");
        assert_eq!(value["softwareType"], "PaperMC");
        assert_eq!(value["status"], "Online");
    }

    #[test]
    fn test_null_launch_args_and_pid() {
        let json = r#"{"id":"b","name":"proxy","softwareType":"Velocity","launchArgs":null,"pid":null}"#;
        let record: ServerRecord = serde_json::from_str(json).unwrap();
        assert!(record.launch_args.is_empty());
        assert_eq!(record.pid, None);
        assert_eq!(record.status, ServerStatus::Offline);
    }

    #[test]
    fn test_mark_inactive_clears_runtime_state() {
        let mut record = ServerRecord::new("survival", SoftwareType::Fabric);
        record.mark_running(ServerStatus::Online, 100);
        record.add_player("Steve");
        record.cpu_usage = 12.5;
        record.current_ram = 900;

        record.mark_inactive(ServerStatus::Offline);

        assert_eq!(record.status, ServerStatus::Offline);
        assert_eq!(record.pid, None);
        assert!(record.connected_players.is_empty());
        assert!(!record.has_metrics());
    }

    #[test]
    fn test_players_are_an_ordered_set() {
        let mut record = ServerRecord::new("survival", SoftwareType::Paper);
        assert!(record.add_player("Steve"));
        assert!(record.add_player("Alex"));
        assert!(!record.add_player("Steve"));
        assert_eq!(record.connected_players, vec!["Steve", "Alex"]);
        assert!(record.remove_player("Steve"));
        assert!(!record.remove_player("Herobrine"));
        assert_eq!(record.connected_players, vec!["Alex"]);
    }

    #[test]
    fn test_working_dir_defaults_to_id() {
        let mut record = ServerRecord::new("survival", SoftwareType::Paper);
        let root = Path::new("/srv/servers");
        assert_eq!(record.working_dir(root), root.join(&record.id));
        assert_eq!(
            record.console_log_path(root),
            root.join(&record.id).join(CONSOLE_LOG_FILE)
        );

        record.directory = Some(PathBuf::from("/opt/mc/survival"));
        assert_eq!(record.working_dir(root), PathBuf::from("/opt/mc/survival"));
    }
}
