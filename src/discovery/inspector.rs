//! [`ProcessInspector`] backed by `sysinfo` and the OS socket table.

use std::sync::{Mutex, MutexGuard, PoisonError};

use regex::Regex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

use crate::discovery::{sockets, ProcessInspector};

/// Live process-table inspector.
///
/// Holds one `sysinfo::System` so repeated refreshes reuse allocations.
pub struct SystemInspector {
    system: Mutex<System>,
}

impl SystemInspector {
    /// Create an inspector with an empty process table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SystemInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInspector for SystemInspector {
    fn list_processes(&self, pattern: &Regex) -> Vec<u32> {
        let mut system = self.system();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );

        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let cmdline = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                pattern.is_match(&cmdline).then(|| pid.as_u32())
            })
            .collect();
        pids.sort_unstable();

        debug!(count = pids.len(), pattern = %pattern, "matched candidate processes");
        pids
    }

    fn listening_ports(&self, pid: u32) -> Vec<u16> {
        sockets::listening_ports(pid)
    }

    fn parent_pid(&self, pid: u32) -> Option<u32> {
        let target = Pid::from_u32(pid);
        let mut system = self.system();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system
            .process(target)
            .and_then(sysinfo::Process::parent)
            .map(Pid::as_u32)
    }
}
