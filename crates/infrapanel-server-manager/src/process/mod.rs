pub mod launch;
pub mod signal;
pub mod table;

pub use launch::LaunchPlan;
pub use signal::{OsPidProbe, PidProbe, StopSignal, send_signal};
pub use table::{ProcessHandle, ProcessTable};
