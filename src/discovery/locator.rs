//! Process locator: candidate companion processes and their listening ports.

use regex::Regex;
use tracing::debug;

use crate::discovery::{CandidateProcess, ProcessInspector};

/// Enumerate candidate processes matching `pattern`.
///
/// One [`CandidateProcess`] is produced per listening port, ordered by pid
/// then port, so repeated passes over the same process table enumerate in
/// the same order. Processes without a listening socket (including ones that
/// exited between enumeration and the socket lookup) are skipped.
#[must_use]
pub fn locate(inspector: &dyn ProcessInspector, pattern: &Regex) -> Vec<CandidateProcess> {
    let mut candidates = Vec::new();

    for pid in inspector.list_processes(pattern) {
        let ports = inspector.listening_ports(pid);
        if ports.is_empty() {
            debug!(pid, "matched process has no listening port, skipping");
            continue;
        }
        candidates.extend(ports.into_iter().map(|port| CandidateProcess { pid, port }));
    }

    candidates.sort_unstable();
    candidates.dedup();
    candidates
}
