//! Process lifecycle core of Infrapanel: spawning game servers, capturing
//! their consoles and keeping the persisted registry in line with the OS.

pub mod artifact;
pub mod console;
pub mod error;
pub mod matcher;
pub mod memory;
pub mod model;
pub mod monitor;
pub mod process;
pub mod provision;
pub mod registry;
pub mod server_manager;

pub use artifact::{ArtifactProvider, HttpArtifactProvider, NoArtifactProvider};
pub use console::ConsoleTail;
pub use error::{Result, ServerManagerError};
pub use matcher::{LogMatcher, MatcherRegistry, PlayerEvent};
pub use model::{ServerRecord, ServerStatus, SoftwareType};
pub use monitor::{ReconcileReport, StartupReconciler, StatsPoller};
pub use process::{ProcessHandle, ProcessTable};
pub use provision::Installer;
pub use registry::ServerRegistry;
pub use server_manager::{ManagerSettings, OperationOutcome, ServerManager};
