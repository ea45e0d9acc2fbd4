//! Companion server discovery.
//!
//! Discovery runs leaf-first: the [`locator`] enumerates candidate
//! processes and their listening ports, the [`validator`] probes each
//! candidate's identity endpoint, and the [`selector`] picks the server whose
//! working directory covers the caller's. The [`resolver`] orchestrates the
//! pipeline, honours a fixed-port override, and falls back to the
//! [`launcher`] when nothing is running.

pub mod inspector;
pub mod launcher;
pub mod locator;
pub mod resolver;
pub mod selector;
pub mod sockets;
pub mod validator;

use std::path::PathBuf;

use regex::Regex;
use serde::Serialize;

/// A process suspected of being a companion server, not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CandidateProcess {
    /// OS process id.
    pub pid: u32,
    /// TCP port the process is listening on.
    pub port: u16,
}

/// A candidate that answered the identity probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedServer {
    /// OS process id.
    pub pid: u32,
    /// TCP port the server is listening on.
    pub port: u16,
    /// Working directory the server reported.
    pub working_directory: PathBuf,
}

/// OS capability needed by discovery.
///
/// All methods are blocking and read-only; callers run them on the blocking
/// pool. Implementations must tolerate processes that exit mid-call by
/// returning empty/`None` results rather than failing.
pub trait ProcessInspector: Send + Sync {
    /// Pids whose command line matches `pattern`, in ascending order.
    fn list_processes(&self, pattern: &Regex) -> Vec<u32>;

    /// TCP ports in LISTEN state owned by `pid`, ascending and de-duplicated.
    fn listening_ports(&self, pid: u32) -> Vec<u16>;

    /// Parent of `pid`, or `None` if the process is gone or has no parent.
    fn parent_pid(&self, pid: u32) -> Option<u32>;
}
