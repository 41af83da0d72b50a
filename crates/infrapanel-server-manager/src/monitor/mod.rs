pub mod reconcile;
pub mod stats;

pub use reconcile::{ReconcileReport, StartupReconciler};
pub use stats::{PollSummary, ProcessSample, ProcessSampler, StatsPoller, SysinfoSampler};
