//! Port resolver: the entry point collaborators call to find a companion.
//!
//! Two modes:
//!
//! - **Fixed port**: a configured port is only validated; the process
//!   table is never inspected.
//! - **Auto-discovery**: locate → validate → select. When that fails and
//!   launching is allowed, the companion is started and the full pipeline is
//!   polled on a fixed [`RetryPolicy`].
//!
//! Every call is independent; the resolver holds no mutable discovery state.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::discovery::inspector::SystemInspector;
use crate::discovery::launcher::{CommandLauncher, Launcher};
use crate::discovery::validator::{self, HttpProbe, ServerProbe};
use crate::discovery::{locator, selector, ProcessInspector, ValidatedServer};
use crate::retry::{retry_until, RetryPolicy};
use crate::{AppError, Result};

/// Resolves the port of the companion responsible for the caller.
pub trait ResolvePort: Send + Sync {
    /// Resolve a port, launching the companion first if `allow_launch` is
    /// set and nothing suitable is running.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` when every attempt failed.
    /// - `AppError::LaunchFailed` when the launch collaborator failed.
    fn resolve_port(
        &self,
        allow_launch: bool,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + '_>>;
}

/// Inputs that shape resolution.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Fixed port override; disables discovery.
    pub fixed_port: Option<u16>,
    /// Command-line pattern identifying companion processes.
    pub process_pattern: Regex,
    /// Command run when nothing is found and launching is allowed.
    pub launch_command: String,
    /// Caller's working directory; servers must run in or below it.
    pub caller_cwd: PathBuf,
    /// Caller's pid, used to prefer servers it spawned.
    pub caller_pid: u32,
    /// Poll schedule after a launch.
    pub launch_poll: RetryPolicy,
    /// Maximum parent hops in the ancestry check.
    pub ancestry_max_depth: u32,
}

impl ResolverSettings {
    /// Derive settings from configuration for a caller in `caller_cwd`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `process_pattern` is not a valid regex.
    pub fn from_config(config: &BridgeConfig, caller_cwd: PathBuf) -> Result<Self> {
        let process_pattern = Regex::new(&config.process_pattern)
            .map_err(|err| AppError::Config(format!("process_pattern invalid: {err}")))?;
        Ok(Self {
            fixed_port: config.port,
            process_pattern,
            launch_command: config.launch_command.clone(),
            caller_cwd,
            caller_pid: std::process::id(),
            launch_poll: config.launch_poll_policy(),
            ancestry_max_depth: config.ancestry_max_depth,
        })
    }
}

/// Locate → validate → select orchestrator.
pub struct PortResolver {
    inspector: Arc<dyn ProcessInspector>,
    probe: Arc<dyn ServerProbe>,
    launcher: Arc<dyn Launcher>,
    settings: ResolverSettings,
    cancel: CancellationToken,
}

impl PortResolver {
    /// Assemble a resolver from its collaborators.
    #[must_use]
    pub fn new(
        inspector: Arc<dyn ProcessInspector>,
        probe: Arc<dyn ServerProbe>,
        launcher: Arc<dyn Launcher>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            inspector,
            probe,
            launcher,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Build a resolver wired to the live process table, HTTP probe, and
    /// shell launcher.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid pattern or HTTP client.
    pub fn from_config(config: &BridgeConfig, caller_cwd: PathBuf) -> Result<Self> {
        let settings = ResolverSettings::from_config(config, caller_cwd.clone())?;
        let probe = HttpProbe::new(config.host.clone(), config.request_timeout())?;
        Ok(Self::new(
            Arc::new(SystemInspector::new()),
            Arc::new(probe),
            Arc::new(CommandLauncher::new(caller_cwd)),
            settings,
        ))
    }

    /// Abort launch polling when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one locate + validate pass and return every validated server,
    /// in enumeration order, without selecting.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the blocking inspection task panicked.
    pub async fn discover(&self) -> Result<Vec<ValidatedServer>> {
        let inspector = Arc::clone(&self.inspector);
        let pattern = self.settings.process_pattern.clone();
        let candidates = tokio::task::spawn_blocking(move || locator::locate(&*inspector, &pattern))
            .await
            .map_err(|err| AppError::Io(format!("process inspection task failed: {err}")))?;

        debug!(count = candidates.len(), "located candidates");
        Ok(validator::validate_all(&*self.probe, &candidates).await)
    }

    /// Resolve a port.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` when nothing suitable was found.
    /// - `AppError::LaunchFailed` when the launch could not be started.
    pub async fn resolve(&self, allow_launch: bool) -> Result<u16> {
        let first = match self.resolve_once().await {
            Ok(port) => return Ok(port),
            Err(err) => err,
        };

        if let Some(port) = self.settings.fixed_port {
            return Err(AppError::NotFound(format!(
                "configured port {port} is not a companion server: {first}"
            )));
        }

        if !allow_launch {
            return Err(AppError::NotFound(first.to_string()));
        }

        info!(
            reason = %first,
            command = %self.settings.launch_command,
            "no companion found, launching"
        );
        self.launcher.launch(&self.settings.launch_command)?;

        retry_until(self.settings.launch_poll, &self.cancel, |attempt| {
            debug!(attempt, "polling for launched companion");
            self.resolve_once()
        })
        .await
        .map_err(|err| {
            warn!(%err, "launched companion never became reachable");
            AppError::NotFound(format!("companion did not come up after launch: {err}"))
        })
    }

    /// Pick the server responsible for the caller among `servers`.
    ///
    /// # Errors
    ///
    /// - `AppError::NoneInScope` if no server runs in or below the caller's
    ///   working directory.
    /// - `AppError::Io` if the blocking selection task panicked.
    pub async fn select(&self, servers: Vec<ValidatedServer>) -> Result<ValidatedServer> {
        let inspector = Arc::clone(&self.inspector);
        let cwd = self.settings.caller_cwd.clone();
        let caller_pid = self.settings.caller_pid;
        let depth = self.settings.ancestry_max_depth;
        tokio::task::spawn_blocking(move || {
            selector::select(&servers, &cwd, caller_pid, &*inspector, depth)
        })
        .await
        .map_err(|err| AppError::Io(format!("server selection task failed: {err}")))?
    }

    async fn resolve_once(&self) -> Result<u16> {
        if let Some(port) = self.settings.fixed_port {
            self.probe.probe(port).await?;
            debug!(port, "fixed port validated");
            return Ok(port);
        }

        let servers = self.discover().await?;
        if servers.is_empty() {
            return Err(AppError::NotFound(
                "no running companion answered the identity probe".into(),
            ));
        }

        let chosen = self.select(servers).await?;
        info!(
            pid = chosen.pid,
            port = chosen.port,
            dir = %chosen.working_directory.display(),
            "resolved companion"
        );
        Ok(chosen.port)
    }
}

impl ResolvePort for PortResolver {
    fn resolve_port(
        &self,
        allow_launch: bool,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + '_>> {
        Box::pin(self.resolve(allow_launch))
    }
}
