use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::fs;
use tokio::process::Command;

use crate::error::Result;
use crate::memory::parse_memory_mb;
use crate::model::{ServerRecord, SoftwareType};

pub const EULA_FILE: &str = "eula.txt";

#[cfg(windows)]
const RUN_SCRIPT: &str = "run.bat";
#[cfg(not(windows))]
const RUN_SCRIPT: &str = "run.sh";

/// How a server process gets started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchPlan {
    /// Modded loaders with a generated run script are started through a shell;
    /// everything else is a direct `java -jar` with heap flags.
    pub fn for_server(record: &ServerRecord, working_dir: &Path, java_path: &str) -> Result<Self> {
        if let Some(script) = run_script(record, working_dir) {
            return Ok(Self::script(script, working_dir));
        }

        let min_mb = parse_memory_mb(&record.min_ram)?;
        let max_mb = parse_memory_mb(&record.max_ram)?;

        let mut args = vec![
            format!("-Xms{}M", min_mb.min(max_mb)),
            format!("-Xmx{}M", max_mb),
        ];
        args.extend(record.launch_args.iter().cloned());
        args.push("-jar".to_string());
        args.push(record.jar_file.clone());
        if record.software_type.accepts_nogui() {
            args.push("nogui".to_string());
        }

        Ok(Self {
            program: java_path.to_string(),
            args,
            working_dir: working_dir.to_path_buf(),
        })
    }

    #[cfg(windows)]
    fn script(script: PathBuf, working_dir: &Path) -> Self {
        Self {
            program: "cmd".to_string(),
            args: vec!["/C".to_string(), script.to_string_lossy().into_owned()],
            working_dir: working_dir.to_path_buf(),
        }
    }

    #[cfg(not(windows))]
    fn script(script: PathBuf, working_dir: &Path) -> Self {
        Self {
            program: "sh".to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            working_dir: working_dir.to_path_buf(),
        }
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Command with every standard stream piped. On unix the child leads its
    /// own process group so signals reach wrapper scripts and the JVM alike,
    /// and a Ctrl-C aimed at the panel does not take the servers down.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        #[cfg(unix)]
        command.process_group(0);

        command
    }
}

fn run_script(record: &ServerRecord, working_dir: &Path) -> Option<PathBuf> {
    if !record.software_type.is_modded() {
        return None;
    }
    let script = working_dir.join(RUN_SCRIPT);
    script.is_file().then_some(script)
}

/// Path of the launch artifact that has to be materialized before starting,
/// if any is missing.
pub fn missing_artifact(record: &ServerRecord, working_dir: &Path) -> Option<PathBuf> {
    if run_script(record, working_dir).is_some() {
        return None;
    }
    let jar = working_dir.join(&record.jar_file);
    (!jar.is_file()).then_some(jar)
}

/// Writes an accepted `eula.txt` for software that refuses to boot without one.
/// Returns whether a file was created.
pub async fn ensure_eula(software: SoftwareType, working_dir: &Path) -> Result<bool> {
    if !software.requires_eula() {
        return Ok(false);
    }

    let eula = working_dir.join(EULA_FILE);
    if fs::try_exists(&eula).await? {
        return Ok(false);
    }

    fs::write(&eula, "eula=true\n").await?;
    Ok(true)
}
