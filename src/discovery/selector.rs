//! Server selector: pick the validated server responsible for the caller.
//!
//! A server is eligible when its working directory is the caller's working
//! directory or lies beneath it. Containment is decided per path component,
//! so `/a/bc` is *not* inside `/a/b`. Among eligible servers, one whose
//! process descends from the caller wins outright; otherwise the first
//! eligible server in enumeration order is used.

use std::path::Path;

use tracing::debug;

use crate::discovery::{ProcessInspector, ValidatedServer};
use crate::{AppError, Result};

/// Default bound on parent-process hops during the ancestry walk.
pub const DEFAULT_ANCESTRY_DEPTH: u32 = 10;

/// Whether `dir` equals `root` or is a path-component descendant of it.
#[must_use]
pub fn is_within(dir: &Path, root: &Path) -> bool {
    dir.starts_with(root)
}

/// Whether `ancestor` appears in the parent chain of `pid` within
/// `max_depth` hops. `pid` itself does not count.
#[must_use]
pub fn is_descendant_of(
    inspector: &dyn ProcessInspector,
    pid: u32,
    ancestor: u32,
    max_depth: u32,
) -> bool {
    let mut current = pid;
    for _ in 0..max_depth {
        match inspector.parent_pid(current) {
            Some(parent) if parent == ancestor => return true,
            // pid 0 and self-parenting mark the top of the tree.
            Some(parent) if parent != 0 && parent != current => current = parent,
            _ => return false,
        }
    }
    false
}

/// Select the server for a caller running in `caller_cwd` as `caller_pid`.
///
/// # Errors
///
/// Returns `AppError::NoneInScope` if no server's working directory is
/// within `caller_cwd`.
pub fn select(
    servers: &[ValidatedServer],
    caller_cwd: &Path,
    caller_pid: u32,
    inspector: &dyn ProcessInspector,
    max_depth: u32,
) -> Result<ValidatedServer> {
    let mut first_eligible: Option<&ValidatedServer> = None;

    for server in servers {
        if !is_within(&server.working_directory, caller_cwd) {
            debug!(
                pid = server.pid,
                dir = %server.working_directory.display(),
                "server out of scope"
            );
            continue;
        }

        if is_descendant_of(inspector, server.pid, caller_pid, max_depth) {
            debug!(pid = server.pid, port = server.port, "selected descendant server");
            return Ok(server.clone());
        }

        first_eligible.get_or_insert(server);
    }

    first_eligible.cloned().ok_or_else(|| {
        AppError::NoneInScope(format!(
            "no companion server among {} running in or below {}",
            servers.len(),
            caller_cwd.display()
        ))
    })
}
