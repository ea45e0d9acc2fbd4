//! Shared fakes for the discovery pipeline and the event client.
//!
//! Every fake records how it was called so tests can assert on collaborator
//! traffic as well as on results.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use regex::Regex;
use tokio::sync::mpsc;

use companion_bridge::discovery::launcher::Launcher;
use companion_bridge::discovery::resolver::{ResolvePort, ResolverSettings};
use companion_bridge::discovery::validator::ServerProbe;
use companion_bridge::discovery::ProcessInspector;
use companion_bridge::events::bus::Notification;
use companion_bridge::events::source::{ByteStream, EventSource};
use companion_bridge::retry::RetryPolicy;
use companion_bridge::{AppError, Result};

/// Pid the fakes treat as the calling process.
pub const CALLER_PID: u32 = 100;

/// Upper bound on how long a test waits for an expected notification.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolver settings for a caller in `cwd` with a fast launch poll.
pub fn test_settings(cwd: &str, fixed_port: Option<u16>) -> ResolverSettings {
    ResolverSettings {
        fixed_port,
        process_pattern: Regex::new("opencode.*--port").expect("valid regex"),
        launch_command: "opencode --port".into(),
        caller_cwd: PathBuf::from(cwd),
        caller_pid: CALLER_PID,
        launch_poll: RetryPolicy::new(Duration::from_millis(5), 3),
        ancestry_max_depth: 10,
    }
}

// ── Discovery fakes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FakeProcess {
    command: String,
    ports: Vec<u16>,
    parent: Option<u32>,
}

/// In-memory process table.
#[derive(Default)]
pub struct FakeInspector {
    processes: Mutex<HashMap<u32, FakeProcess>>,
    list_calls: AtomicUsize,
}

impl FakeInspector {
    /// Register a process.
    pub fn add(&self, pid: u32, command: &str, ports: &[u16], parent: Option<u32>) {
        self.processes.lock().unwrap().insert(
            pid,
            FakeProcess {
                command: command.to_owned(),
                ports: ports.to_vec(),
                parent,
            },
        );
    }

    /// Number of `list_processes` calls so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl ProcessInspector for FakeInspector {
    fn list_processes(&self, pattern: &Regex) -> Vec<u32> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut pids: Vec<u32> = self
            .processes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, process)| pattern.is_match(&process.command))
            .map(|(pid, _)| *pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    fn listening_ports(&self, pid: u32) -> Vec<u16> {
        self.processes
            .lock()
            .unwrap()
            .get(&pid)
            .map(|process| process.ports.clone())
            .unwrap_or_default()
    }

    fn parent_pid(&self, pid: u32) -> Option<u32> {
        self.processes.lock().unwrap().get(&pid)?.parent
    }
}

/// Identity probe answering from a port → directory table.
#[derive(Default)]
pub struct FakeProbe {
    servers: Mutex<HashMap<u16, PathBuf>>,
    probed: Mutex<Vec<u16>>,
}

impl FakeProbe {
    /// Make `port` answer with `dir`.
    pub fn serve(&self, port: u16, dir: impl AsRef<Path>) {
        self.servers
            .lock()
            .unwrap()
            .insert(port, dir.as_ref().to_path_buf());
    }

    /// Ports probed so far, in order.
    pub fn probed(&self) -> Vec<u16> {
        self.probed.lock().unwrap().clone()
    }
}

impl ServerProbe for FakeProbe {
    fn probe(&self, port: u16) -> Pin<Box<dyn Future<Output = Result<PathBuf>> + Send + '_>> {
        self.probed.lock().unwrap().push(port);
        let answer = self
            .servers
            .lock()
            .unwrap()
            .get(&port)
            .cloned()
            .ok_or_else(|| AppError::Unreachable(format!("nothing on port {port}")));
        Box::pin(async move { answer })
    }
}

/// What the launch fake should do when called.
pub enum LaunchBehavior {
    /// Spawn nothing.
    Nothing,
    /// Fail with `LaunchFailed`.
    Fail,
    /// Register a companion `(pid, port, dir)` in the inspector and probe.
    Start {
        inspector: Arc<FakeInspector>,
        probe: Arc<FakeProbe>,
        pid: u32,
        port: u16,
        dir: PathBuf,
    },
}

/// Launch collaborator fake.
pub struct FakeLauncher {
    behavior: LaunchBehavior,
    commands: Mutex<Vec<String>>,
}

impl FakeLauncher {
    /// Launcher that behaves as `behavior` on every call.
    pub fn new(behavior: LaunchBehavior) -> Self {
        Self {
            behavior,
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Commands launched so far.
    pub fn launches(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, command: &str) -> Result<()> {
        self.commands.lock().unwrap().push(command.to_owned());
        match &self.behavior {
            LaunchBehavior::Nothing => Ok(()),
            LaunchBehavior::Fail => Err(AppError::LaunchFailed(format!("`{command}`: denied"))),
            LaunchBehavior::Start {
                inspector,
                probe,
                pid,
                port,
                dir,
            } => {
                inspector.add(*pid, "opencode --port 0", &[*port], Some(CALLER_PID));
                probe.serve(*port, dir);
                Ok(())
            }
        }
    }
}

// ── Event client fakes ───────────────────────────────────────────────────────

/// Sending half of a stream handed out by [`FakeEventSource`].
#[derive(Debug)]
pub struct OpenedStream {
    /// Port the stream was opened for.
    pub port: u16,
    /// Feeds raw bytes into the stream; drop to end it.
    pub tx: mpsc::UnboundedSender<io::Result<Bytes>>,
}

impl OpenedStream {
    /// Push one complete SSE frame carrying `payload`.
    pub fn send_frame(&self, payload: &str) -> bool {
        self.tx
            .send(Ok(Bytes::from(format!("data: {payload}\n\n"))))
            .is_ok()
    }

    /// Push one event record of type `event_type`.
    pub fn send_event(&self, event_type: &str) -> bool {
        self.send_frame(&format!(
            r#"{{"type":"{event_type}","properties":{{"n":1}}}}"#
        ))
    }
}

/// Event source whose streams are fed by the test.
pub struct FakeEventSource {
    opened: mpsc::UnboundedSender<OpenedStream>,
    refused: Mutex<Vec<u16>>,
    opens: AtomicUsize,
}

impl FakeEventSource {
    /// Create a source plus the receiver of every stream it opens.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OpenedStream>) {
        let (opened, rx) = mpsc::unbounded_channel();
        let source = Arc::new(Self {
            opened,
            refused: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
        });
        (source, rx)
    }

    /// Make opening `port` fail with `Unreachable`.
    pub fn refuse(&self, port: u16) {
        self.refused.lock().unwrap().push(port);
    }

    /// Number of `open` calls so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl EventSource for FakeEventSource {
    fn open(&self, port: u16) -> Pin<Box<dyn Future<Output = Result<ByteStream>> + Send + '_>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.refused.lock().unwrap().contains(&port) {
            return Box::pin(async move {
                Err(AppError::Unreachable(format!("connection refused on {port}")))
            });
        }

        let (tx, rx) = mpsc::unbounded_channel::<io::Result<Bytes>>();
        let _ = self.opened.send(OpenedStream { port, tx });
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });
        Box::pin(async move { Ok(Box::pin(stream) as ByteStream) })
    }
}

/// Resolver that replays scripted results and counts calls.
#[derive(Default)]
pub struct ScriptedResolver {
    results: Mutex<VecDeque<Result<u16>>>,
    calls: Mutex<Vec<bool>>,
}

impl ScriptedResolver {
    /// Queue the result of the next call.
    pub fn push(&self, result: Result<u16>) {
        self.results.lock().unwrap().push_back(result);
    }

    /// `allow_launch` flag of every call so far.
    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }
}

impl ResolvePort for ScriptedResolver {
    fn resolve_port(
        &self,
        allow_launch: bool,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + '_>> {
        self.calls.lock().unwrap().push(allow_launch);
        let result = self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::NotFound("script exhausted".into())));
        Box::pin(async move { result })
    }
}

// ── Receive helpers ──────────────────────────────────────────────────────────

/// Next stream opened by the client.
pub async fn next_open(rx: &mut mpsc::UnboundedReceiver<OpenedStream>) -> OpenedStream {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("stream opened in time")
        .expect("source alive")
}

/// Next notification.
pub async fn next_notification(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("notification in time")
        .expect("bus alive")
}

/// Assert that nothing arrives on `rx` within `window`.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>, window: Duration) {
    if let Ok(Some(item)) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected item: {item:?}");
    }
}
