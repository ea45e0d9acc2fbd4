//! Port resolution end to end over fake OS and HTTP collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use companion_bridge::discovery::launcher::Launcher;
use companion_bridge::discovery::resolver::PortResolver;
use companion_bridge::discovery::validator::ServerProbe;
use companion_bridge::discovery::ProcessInspector;
use companion_bridge::AppError;

use super::test_helpers::{
    test_settings, FakeInspector, FakeLauncher, FakeProbe, LaunchBehavior, CALLER_PID,
};

struct Harness {
    inspector: Arc<FakeInspector>,
    probe: Arc<FakeProbe>,
}

impl Harness {
    fn new() -> Self {
        Self {
            inspector: Arc::new(FakeInspector::default()),
            probe: Arc::new(FakeProbe::default()),
        }
    }

    fn companion(&self, pid: u32, port: u16, dir: &str) {
        self.inspector
            .add(pid, &format!("opencode --port {port}"), &[port], Some(1));
        self.probe.serve(port, dir);
    }

    fn resolver(
        &self,
        cwd: &str,
        fixed_port: Option<u16>,
        launcher: &Arc<FakeLauncher>,
    ) -> PortResolver {
        let inspector: Arc<dyn ProcessInspector> = self.inspector.clone();
        let probe: Arc<dyn ServerProbe> = self.probe.clone();
        let launcher: Arc<dyn Launcher> = launcher.clone();
        PortResolver::new(inspector, probe, launcher, test_settings(cwd, fixed_port))
    }
}

fn idle_launcher() -> Arc<FakeLauncher> {
    Arc::new(FakeLauncher::new(LaunchBehavior::Nothing))
}

// ── Fixed port ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn fixed_port_is_validated_without_inspecting_processes() {
    let harness = Harness::new();
    harness.companion(10, 4000, "/work");
    harness.probe.serve(4096, "/anywhere");
    let launcher = idle_launcher();

    let port = harness
        .resolver("/work", Some(4096), &launcher)
        .resolve(false)
        .await
        .expect("fixed port resolves");

    assert_eq!(port, 4096);
    assert_eq!(harness.inspector.list_calls(), 0);
    assert_eq!(harness.probe.probed(), vec![4096]);
}

#[tokio::test]
async fn dead_fixed_port_is_not_found_and_never_launches() {
    let harness = Harness::new();
    let launcher = idle_launcher();

    let result = harness
        .resolver("/work", Some(4096), &launcher)
        .resolve(true)
        .await;

    assert!(matches!(result, Err(AppError::NotFound(msg)) if msg.contains("4096")));
    assert!(launcher.launches().is_empty());
    assert_eq!(harness.inspector.list_calls(), 0);
}

// ── Auto-discovery ───────────────────────────────────────────────────────────

#[tokio::test]
async fn resolves_server_in_scope() {
    let harness = Harness::new();
    harness.companion(10, 4000, "/other/project");
    harness.companion(11, 4001, "/work/project");
    let launcher = idle_launcher();

    let port = harness
        .resolver("/work", None, &launcher)
        .resolve(false)
        .await
        .expect("in-scope server resolves");

    assert_eq!(port, 4001);
}

#[tokio::test]
async fn unreachable_candidates_are_skipped() {
    let harness = Harness::new();
    harness
        .inspector
        .add(5, "opencode --port 3999", &[3999], Some(1));
    harness.companion(6, 4000, "/work");
    let launcher = idle_launcher();

    let resolver = harness.resolver("/work", None, &launcher);
    let servers = resolver.discover().await.expect("discover succeeds");

    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].port, 4000);
    assert_eq!(servers[0].working_directory, PathBuf::from("/work"));
    assert_eq!(harness.probe.probed(), vec![3999, 4000]);
}

#[tokio::test]
async fn descendant_of_caller_is_preferred() {
    let harness = Harness::new();
    harness.companion(10, 4000, "/work");
    harness
        .inspector
        .add(11, "opencode --port 4001", &[4001], Some(CALLER_PID));
    harness.probe.serve(4001, "/work/sub");
    let launcher = idle_launcher();

    let port = harness
        .resolver("/work", None, &launcher)
        .resolve(false)
        .await
        .expect("resolves");

    assert_eq!(port, 4001);
}

#[tokio::test]
async fn nothing_running_without_launch_is_not_found() {
    let harness = Harness::new();
    let launcher = idle_launcher();

    let result = harness.resolver("/work", None, &launcher).resolve(false).await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn out_of_scope_servers_without_launch_is_not_found() {
    let harness = Harness::new();
    harness.companion(10, 4000, "/elsewhere");
    let launcher = idle_launcher();

    let result = harness.resolver("/work", None, &launcher).resolve(false).await;

    assert!(matches!(result, Err(AppError::NotFound(msg)) if msg.contains("none in scope")));
}

// ── Launch and poll ──────────────────────────────────────────────────────────

#[tokio::test]
async fn launches_and_polls_until_companion_answers() {
    let harness = Harness::new();
    let launcher = Arc::new(FakeLauncher::new(LaunchBehavior::Start {
        inspector: Arc::clone(&harness.inspector),
        probe: Arc::clone(&harness.probe),
        pid: 20,
        port: 4500,
        dir: PathBuf::from("/work"),
    }));

    let port = harness
        .resolver("/work", None, &launcher)
        .resolve(true)
        .await
        .expect("launched companion resolves");

    assert_eq!(port, 4500);
    assert_eq!(launcher.launches(), vec!["opencode --port".to_owned()]);
    assert_eq!(harness.inspector.list_calls(), 2);
}

#[tokio::test]
async fn launch_failure_is_propagated() {
    let harness = Harness::new();
    let launcher = Arc::new(FakeLauncher::new(LaunchBehavior::Fail));

    let result = harness.resolver("/work", None, &launcher).resolve(true).await;

    assert!(matches!(result, Err(AppError::LaunchFailed(_))));
    assert_eq!(harness.inspector.list_calls(), 1);
}

#[tokio::test]
async fn silent_launch_exhausts_poll_budget() {
    let harness = Harness::new();
    let launcher = idle_launcher();

    let result = harness.resolver("/work", None, &launcher).resolve(true).await;

    assert!(matches!(result, Err(AppError::NotFound(msg)) if msg.contains("after launch")));
    assert_eq!(launcher.launches().len(), 1);
    // One initial pass plus three polls.
    assert_eq!(harness.inspector.list_calls(), 4);
}

#[tokio::test]
async fn cancellation_stops_launch_polling() {
    let harness = Harness::new();
    let launcher = idle_launcher();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = harness
        .resolver("/work", None, &launcher)
        .with_cancellation(cancel)
        .resolve(true)
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert_eq!(harness.inspector.list_calls(), 1);
}
