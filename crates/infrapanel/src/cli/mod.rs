pub mod shutdown;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

pub use shutdown::ShutdownController;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Panel configuration file; defaults are used when it does not exist
    #[arg(long, default_value = "infrapanel.toml")]
    pub config: PathBuf,

    /// Overrides `[http].bind`
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    #[arg(long, default_value = "false")]
    pub debug: bool,
}
