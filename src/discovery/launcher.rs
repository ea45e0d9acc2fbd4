//! Fire-and-forget launch of the companion server.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::{AppError, Result};

/// Starts a companion server without waiting for it to come up.
pub trait Launcher: Send + Sync {
    /// Start `command`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LaunchFailed` if the process cannot be spawned.
    fn launch(&self, command: &str) -> Result<()>;
}

/// [`Launcher`] that runs the command through the platform shell in a fixed
/// working directory, detached from the bridge's stdio.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    working_dir: PathBuf,
}

impl CommandLauncher {
    /// Launch companions in `working_dir` so they come up in scope.
    #[must_use]
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, command: &str) -> Result<()> {
        let mut cmd = shell_command(command);
        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        // Dropping the handle leaves the companion running.
        let child = cmd
            .spawn()
            .map_err(|err| AppError::LaunchFailed(format!("`{command}`: {err}")))?;

        info!(
            command,
            pid = child.id(),
            dir = %self.working_dir.display(),
            "launched companion"
        );
        Ok(())
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
