//! The reparenting scenarios against a headless display
//!
//! These run the built-in tests through the runner with the simulated
//! window manager, so they need no X server.

use std::time::{Duration, Instant};

use wmprobe::assertions::{NOT_REPARENTED, PARENT_AT_START};
use wmprobe::backend::SimulatedManager;
use wmprobe::fixtures::{self, fast_manager_options, fast_poll, headless_session, session_with_windows};
use wmprobe::{inspect, make_window, start_wm, stop_wm, suite, HarnessError, ManagerSpec, ManagerState, RunReport, TestStatus};

#[test]
fn fresh_windows_have_no_parent() {
    let (_session, windows) = session_with_windows(3).unwrap();
    for window in &windows {
        assert_eq!(inspect::parent(window).unwrap(), None);
    }
}

#[test]
fn manager_reparents_existing_windows() {
    let (session, windows) = session_with_windows(2).unwrap();
    let manager = start_wm(
        &session,
        &ManagerSpec::Simulated(SimulatedManager::new()),
        &fast_manager_options(),
    )
    .unwrap();
    assert_eq!(manager.state(), ManagerState::Running);

    let policy = fast_poll(Duration::from_secs(2));
    let a = inspect::wait_for_parent(&windows[0], &policy).unwrap();
    let b = inspect::wait_for_parent(&windows[1], &policy).unwrap();
    assert!(a.is_some() && b.is_some());
    assert_ne!(a, b);

    // Stable while the manager runs
    assert_eq!(inspect::parent(&windows[0]).unwrap(), a);
}

#[test]
fn stopping_manager_returns_windows_to_root() {
    let (session, windows) = session_with_windows(1).unwrap();
    let manager = start_wm(
        &session,
        &ManagerSpec::Simulated(SimulatedManager::new()),
        &fast_manager_options(),
    )
    .unwrap();
    assert!(inspect::wait_for_parent(&windows[0], &fast_poll(Duration::from_secs(2)))
        .unwrap()
        .is_some());

    stop_wm(&manager, Duration::from_millis(100)).unwrap();
    assert_eq!(manager.state(), ManagerState::Stopped);
    assert_eq!(inspect::parent(&windows[0]).unwrap(), None);
}

#[test]
fn closing_windows_while_manager_runs_is_not_a_crash() {
    let session = headless_session();
    let manager = start_wm(
        &session,
        &ManagerSpec::Simulated(SimulatedManager::new()),
        &fast_manager_options(),
    )
    .unwrap();

    for _ in 0..200 {
        let window = make_window(&session).unwrap();
        window.close().unwrap();
    }

    let survivor = make_window(&session).unwrap();
    assert!(inspect::wait_for_parent(&survivor, &fast_poll(Duration::from_secs(2)))
        .unwrap()
        .is_some());
    assert_eq!(manager.state(), ManagerState::Running);

    stop_wm(&manager, Duration::from_millis(100)).unwrap();
    assert_eq!(inspect::parent(&survivor).unwrap(), None);
}

#[test]
fn reparent_test_passes() {
    let tests = suite::builtin();
    let runner = fixtures::headless_runner(SimulatedManager::new());
    let report: RunReport = runner.run(&tests).collect();

    assert!(report.all_passed(), "{}", report);
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn non_reparenting_manager_fails() {
    let tests = suite::builtin();
    let runner = fixtures::headless_runner(SimulatedManager::without_reparenting());
    let report: RunReport = runner.run(&tests).collect();

    assert_eq!(report.failed, 2, "{}", report);
    for result in &report.results {
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.message.as_deref(), Some(NOT_REPARENTED));
    }
}

#[test]
fn polluted_display_fails_before_launching_manager() {
    let manager = SimulatedManager::new();
    let tests = vec![suite::find(&suite::builtin(), "reparent").unwrap().clone()];
    let runner = fixtures::polluted_runner(manager.clone());

    let results: Vec<_> = runner.run(&tests).collect();

    assert_eq!(results[0].status, TestStatus::Fail);
    assert_eq!(results[0].message.as_deref(), Some(PARENT_AT_START));
    assert_eq!(manager.launch_count(), 0);
}

#[test]
fn manager_that_never_becomes_ready_times_out() {
    let session = headless_session();
    let options = fast_manager_options();
    let timeout = options.startup.timeout;

    let start = Instant::now();
    let result = start_wm(&session, &ManagerSpec::Simulated(SimulatedManager::never_ready()), &options);
    let elapsed = start.elapsed();

    match result {
        Err(HarnessError::StartupTimeout(t)) => assert_eq!(t, timeout),
        other => panic!("expected StartupTimeout, got {:?}", other),
    }
    assert!(elapsed >= timeout, "gave up early after {:?}", elapsed);
    assert!(elapsed < timeout + Duration::from_secs(2), "gave up late after {:?}", elapsed);
}

#[test]
fn never_ready_manager_is_an_error_result() {
    let tests = suite::builtin();
    let runner = fixtures::headless_runner(SimulatedManager::never_ready());
    let report: RunReport = runner.run(&tests).collect();

    assert_eq!(report.errored, 2, "{}", report);
    assert!(report.results[0]
        .message
        .as_deref()
        .unwrap()
        .contains("did not become ready"));
}

#[test]
fn slow_manager_still_passes() {
    let tests = suite::builtin();
    let runner = fixtures::headless_runner(SimulatedManager::new().ready_after(Duration::from_millis(300)));
    let report: RunReport = runner.run(&tests).collect();
    assert!(report.all_passed(), "{}", report);
}

#[test]
fn crashing_manager_is_an_error_result() {
    let mut manager = SimulatedManager::crashing_after(Duration::from_millis(5));
    manager.ready_after = None;
    let tests = suite::builtin();
    let report: RunReport = fixtures::headless_runner(manager).run(&tests).collect();

    assert_eq!(report.errored, 2, "{}", report);
    assert!(report.results[0]
        .message
        .as_deref()
        .unwrap()
        .contains("exited before becoming ready"));
}
