use crash_monitor::{
    DeadlockWatchdog, DirectoryPaths, HandlerPhase, Monitor, MonitorKind, OrchestratorBuilder,
};
use machine_context::{CurrentThreadOnly, ThreadControl};
use std::{
    sync::{Arc, mpsc},
    time::{Duration, Instant},
};

fn wait_for(mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn silent_thread_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DirectoryPaths::new(dir.path(), "deadlock").unwrap();
    let watchdog = Arc::new(DeadlockWatchdog::new(Duration::from_millis(100), false));

    let orchestrator = OrchestratorBuilder::new(paths)
        .thread_control(Box::new(CurrentThreadOnly))
        .debugger_check(|| false)
        .monitor(watchdog.clone())
        .build()
        .unwrap();

    let (tid_tx, tid_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let stuck = std::thread::spawn(move || {
        tid_tx.send(CurrentThreadOnly.current_thread()).unwrap();
        let _ = release_rx.recv();
    });

    watchdog.watch(tid_rx.recv().unwrap());
    assert_eq!(
        orchestrator.set_active_monitors(MonitorKind::ALL),
        MonitorKind::MAIN_THREAD_DEADLOCK
    );

    assert!(wait_for(
        || orchestrator.phase() == HandlerPhase::Disabled,
        Duration::from_secs(10)
    ));
    assert!(!watchdog.is_enabled());
    release_tx.send(()).unwrap();
    stuck.join().unwrap();

    let path = orchestrator.last_report_path().unwrap();
    let report: serde_json::Value =
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    let error = &report["crash"]["error"];
    assert_eq!(error["type"], "deadlock");
    assert_eq!(error["reason"], "Main thread deadlocked");
}

#[test]
fn heartbeats_keep_the_watchdog_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DirectoryPaths::new(dir.path(), "alive").unwrap();
    let watchdog = Arc::new(DeadlockWatchdog::new(Duration::from_millis(200), false));

    let orchestrator = OrchestratorBuilder::new(paths.clone())
        .thread_control(Box::new(CurrentThreadOnly))
        .debugger_check(|| false)
        .monitor(watchdog.clone())
        .build()
        .unwrap();

    watchdog.watch(CurrentThreadOnly.current_thread());
    orchestrator.set_active_monitors(MonitorKind::MAIN_THREAD_DEADLOCK);

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(700) {
        watchdog.heartbeat();
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(orchestrator.phase(), HandlerPhase::Idle);
    assert!(paths.reports().unwrap().is_empty());

    orchestrator.set_active_monitors(MonitorKind::empty());
    assert!(!watchdog.is_enabled());
}
