use std::fmt::Debug;

use crate::error::{Result, ServerManagerError};

/// Liveness check for a bare pid, used for processes the panel did not spawn.
pub trait PidProbe: Send + Sync + Debug {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Zero-signal probe against the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsPidProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;

    use super::*;

    fn to_pid(pid: u32) -> Option<Pid> {
        // pid 0 and anything past i32::MAX would address process groups
        i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
    }

    impl PidProbe for OsPidProbe {
        fn is_alive(&self, pid: u32) -> bool {
            let Some(pid) = to_pid(pid) else {
                return false;
            };
            match kill(pid, None) {
                Ok(()) => true,
                // Exists but owned by someone else
                Err(Errno::EPERM) => true,
                Err(_) => false,
            }
        }
    }

    pub fn send_signal(pid: u32, group: bool, signal: StopSignal) -> Result<()> {
        let target = to_pid(pid)
            .ok_or_else(|| ServerManagerError::signal(format!("invalid pid {}", pid)))?;
        let signal = match signal {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };

        let result = if group {
            killpg(target, signal)
        } else {
            kill(target, signal)
        };

        match result {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ServerManagerError::signal(format!(
                "failed to send {} to {}: {}",
                signal, pid, e
            ))),
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    use super::*;

    fn refreshed(pid: u32) -> System {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        system
    }

    impl PidProbe for OsPidProbe {
        fn is_alive(&self, pid: u32) -> bool {
            refreshed(pid).process(Pid::from_u32(pid)).is_some()
        }
    }

    pub fn send_signal(pid: u32, _group: bool, signal: StopSignal) -> Result<()> {
        let system = refreshed(pid);
        let Some(process) = system.process(Pid::from_u32(pid)) else {
            return Ok(());
        };

        let delivered = match signal {
            StopSignal::Terminate => process
                .kill_with(sysinfo::Signal::Term)
                .unwrap_or_else(|| process.kill()),
            StopSignal::Kill => process.kill(),
        };

        if delivered {
            Ok(())
        } else {
            Err(ServerManagerError::signal(format!(
                "failed to signal process {}",
                pid
            )))
        }
    }
}

/// Sends `signal` to `pid`, or to the process group it leads when `group` is
/// set. A process that is already gone is not an error.
pub fn send_signal(pid: u32, group: bool, signal: StopSignal) -> Result<()> {
    imp::send_signal(pid, group, signal)
}
