//! End-to-end convergence scenarios against the scripted control plane.
//!
//! Validates:
//!   - One status fetch serves every watch of a wait
//!   - Queue sizing is checked before any connection is opened
//!   - A timeout cancels every outstanding watch and releases the model
//!   - Hard failures are aggregated and beat the timeout, on any runtime flavour
//!   - A single dropped connection is retried transparently

use std::sync::Arc;
use std::time::Duration;
use sunbeam_common::JujuError;
use sunbeam_common::config::WaitSettings;
use sunbeam_common::testing::init_global_test_logging;
use sunbeam_juju::status::{ApplicationStatus, StatusSnapshot, UnitStatus};
use sunbeam_juju::waiter::WatchState;
use sunbeam_juju::{
    ConnectionManager, ConvergenceWaiter, EventBus, JujuHelper, MockControlPlane,
    SharedStatusUpdater, UpdaterConfig, WaitSpec,
};
use tokio::sync::mpsc;

#[ctor::ctor]
fn setup() {
    init_global_test_logging();
}

const MODEL: &str = "openstack";

fn app(name: &str, workload: &str, agent: &str) -> ApplicationStatus {
    ApplicationStatus::new(name)
        .with_status(workload)
        .with_scale(1)
        .with_unit(format!("{name}/0"), UnitStatus::new(workload, agent))
}

fn plane(snapshot: StatusSnapshot) -> MockControlPlane {
    MockControlPlane::new("sunbeam-controller").with_model(MODEL, snapshot)
}

fn waiter(plane: &MockControlPlane) -> (Arc<ConnectionManager>, ConvergenceWaiter) {
    let manager = Arc::new(ConnectionManager::new(Arc::new(plane.clone())));
    let waiter = ConvergenceWaiter::new(Arc::clone(&manager), &WaitSettings::default());
    (manager, waiter)
}

// ===========================================================================
// Fan-out
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_one_fetch_serves_every_watch() {
    let snapshot = ["keystone", "glance", "nova", "placement", "cinder"]
        .into_iter()
        .fold(StatusSnapshot::new(MODEL), |snap, name| {
            snap.with_application(app(name, "active", "idle"))
        });
    let plane = plane(snapshot);
    let (manager, waiter) = waiter(&plane);

    let report = waiter
        .run(
            MODEL,
            WaitSpec::new(["keystone", "glance", "nova", "placement", "cinder"]),
        )
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.satisfied().len(), 5);
    assert_eq!(plane.fetches(MODEL), 1);
    assert_eq!(plane.opens(MODEL), 1);
    assert_eq!(manager.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_consumers_see_strictly_increasing_generations() {
    let plane = plane(StatusSnapshot::new(MODEL).with_application(app("k8s", "active", "idle")));
    let manager = Arc::new(ConnectionManager::new(Arc::new(plane.clone())));
    let guard = SharedStatusUpdater::start(manager, MODEL, UpdaterConfig::default())
        .await
        .unwrap();

    let mut ticker = guard.tick_status();
    let mut generations = Vec::new();
    for _ in 0..4 {
        ticker.next().await.unwrap().unwrap();
        generations.push(ticker.generation());
    }
    assert!(generations.windows(2).all(|w| w[0] < w[1]), "{generations:?}");
    assert_eq!(plane.fetches(MODEL) as u64, guard.updater().fetch_count());
    guard.shutdown().await;
}

// ===========================================================================
// Preconditions and timeouts
// ===========================================================================

#[tokio::test]
async fn test_undersized_queue_is_rejected_up_front() {
    let plane = plane(StatusSnapshot::new(MODEL));
    let (_manager, waiter) = waiter(&plane);
    let (tx, _rx) = mpsc::channel(2);

    let err = waiter
        .wait_until_desired_status(MODEL, WaitSpec::new(["a", "b", "c"]).queue(tx))
        .await
        .unwrap_err();
    assert!(matches!(err, JujuError::InvalidArgument(_)));
    assert_eq!(plane.opens(MODEL), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_every_watch() {
    let snapshot = StatusSnapshot::new(MODEL)
        .with_application(app("cinder", "waiting", "executing"))
        .with_application(app("cinder-ceph", "blocked", "idle"));
    let plane = plane(snapshot);
    let (manager, waiter) = waiter(&plane);

    let report = waiter
        .run(
            MODEL,
            WaitSpec::new(["cinder", "cinder-ceph"]).timeout(Duration::from_secs(120)),
        )
        .await
        .unwrap();

    assert!(report.timed_out);
    assert!(report.errors.is_empty());
    assert_eq!(report.cancelled().len(), 2);
    assert!(report.elapsed >= Duration::from_secs(120));
    assert_eq!(manager.open_connections(), 0);
    assert!(report.into_result().unwrap_err().is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_blocked_unit_holds_back_the_application() {
    let k8s = ApplicationStatus::new("k8s")
        .with_status("active")
        .with_scale(2)
        .with_unit("k8s/0", UnitStatus::new("active", "idle"))
        .with_unit("k8s/1", UnitStatus::new("blocked", "idle"));
    let plane = plane(StatusSnapshot::new(MODEL).with_application(k8s));
    let (_manager, waiter) = waiter(&plane);

    let err = waiter
        .wait_until_desired_status(
            MODEL,
            WaitSpec::new(["k8s"]).timeout(Duration::from_secs(60)),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("k8s"));
}

#[tokio::test(start_paused = true)]
async fn test_k8s_model_converges_once_units_settle() {
    let settling = StatusSnapshot::new("k8s-model")
        .with_application(app("k8s", "maintenance", "executing"));
    let settled = StatusSnapshot::new("k8s-model").with_application(app("k8s", "active", "idle"));
    let plane = MockControlPlane::new("ctrl").with_model("k8s-model", settled);
    plane.push_status("k8s-model", Ok(settling.clone()));
    plane.push_status("k8s-model", Ok(settling));

    let helper = JujuHelper::new(Arc::new(plane.clone()), WaitSettings::default());
    let spec = WaitSpec::new(["k8s"]).agent_status(["idle"]);
    helper
        .wait_until_desired_status("k8s-model", spec)
        .await
        .unwrap();
    assert_eq!(plane.fetches("k8s-model"), 3);
}

// ===========================================================================
// Failures
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_application_fails_fast_instead_of_timing_out() {
    let plane = plane(StatusSnapshot::new(MODEL).with_application(app("keystone", "active", "idle")));
    let (_manager, waiter) = waiter(&plane);

    let start = tokio::time::Instant::now();
    let err = waiter
        .wait_until_desired_status(MODEL, WaitSpec::new(["mysql"]))
        .await
        .unwrap_err();
    assert!(!err.is_timeout());
    assert!(start.elapsed() < Duration::from_secs(1));
    match err.wait_errors() {
        [JujuError::UnknownApplication { application, model }] => {
            assert_eq!(application, "mysql");
            assert_eq!(model, MODEL);
        }
        other => panic!("unexpected errors: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_aggregated_and_others_cancelled() {
    let plane = plane(StatusSnapshot::new(MODEL).with_application(app("glance", "waiting", "idle")));
    let (_manager, waiter) = waiter(&plane);
    let bus = EventBus::default();
    let mut events = bus.subscribe();

    let report = waiter
        .run(
            MODEL,
            WaitSpec::new(["mysql", "rabbitmq", "glance"]).events(bus),
        )
        .await
        .unwrap();

    assert!(!report.timed_out);
    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.states["mysql"], WatchState::Failed);
    assert_eq!(report.states["rabbitmq"], WatchState::Failed);
    assert_eq!(report.states["glance"], WatchState::Cancelled);

    let mut failed = 0;
    while let Ok(line) = events.try_recv() {
        let event: serde_json::Value = serde_json::from_str(&line).unwrap();
        if event["event"] == "application_failed" {
            assert!(event["data"]["code"].as_str().unwrap().starts_with("SB-E"));
            failed += 1;
        }
    }
    assert_eq!(failed, 2);

    let err = report.into_result().unwrap_err();
    assert_eq!(err.wait_errors().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_failure_is_reported_on_a_threaded_runtime() {
    for run in 0..200 {
        let plane =
            plane(StatusSnapshot::new(MODEL).with_application(app("glance", "waiting", "idle")));
        let (manager, waiter) = waiter(&plane);

        let report = waiter
            .run(MODEL, WaitSpec::new(["mysql", "rabbitmq", "glance"]))
            .await
            .unwrap();

        assert_eq!(report.errors.len(), 2, "run {run}: {:?}", report.errors);
        assert_eq!(report.states["mysql"], WatchState::Failed, "run {run}");
        assert_eq!(report.states["rabbitmq"], WatchState::Failed, "run {run}");
        assert_eq!(report.states["glance"], WatchState::Cancelled, "run {run}");
        assert_eq!(manager.open_connections(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_dropped_connection_is_retried_once() {
    let plane = plane(StatusSnapshot::new(MODEL).with_application(app("keystone", "active", "idle")));
    plane.push_status(MODEL, Err(JujuError::ConnectionClosed("EOF".into())));
    let (manager, waiter) = waiter(&plane);

    let report = waiter.run(MODEL, WaitSpec::new(["keystone"])).await.unwrap();
    assert!(report.is_success());
    assert_eq!(plane.fetches(MODEL), 2);
    assert_eq!(plane.opens(MODEL), 2);
    assert_eq!(manager.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_model_fails_before_waiting() {
    let plane = plane(StatusSnapshot::new(MODEL));
    let (_manager, waiter) = waiter(&plane);
    let err = waiter
        .wait_until_desired_status("ghost", WaitSpec::new(["keystone"]))
        .await
        .unwrap_err();
    assert!(matches!(err, JujuError::ModelNotFound(m) if m == "ghost"));
}
