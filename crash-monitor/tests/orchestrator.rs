use crash_monitor::{
    DirectoryPaths, EnabledFlag, Error, HandlerPhase, Monitor, MonitorKind, MonitorOrchestrator,
    OrchestratorBuilder, ReportConfig, SystemMonitor, UserReport, UserReportedMonitor,
};
use crash_report::{CrashEvent, EventKind, SignalInfo};
use machine_context::{CurrentThreadOnly, MachineContext};
use std::sync::{
    Arc, OnceLock, Weak,
    atomic::{AtomicUsize, Ordering},
};

/// A monitor of any kind that can refuse to be enabled or fail to add its
/// information
struct Fake {
    kind: MonitorKind,
    available: bool,
    fails: bool,
    enabled: EnabledFlag,
    contributions: AtomicUsize,
}

impl Fake {
    fn new(kind: MonitorKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            available: true,
            fails: false,
            enabled: EnabledFlag::default(),
            contributions: AtomicUsize::new(0),
        })
    }

    fn unavailable(kind: MonitorKind) -> Arc<Self> {
        Arc::new(Self {
            available: false,
            ..Arc::into_inner(Self::new(kind)).unwrap()
        })
    }

    fn failing(kind: MonitorKind) -> Arc<Self> {
        Arc::new(Self {
            fails: true,
            ..Arc::into_inner(Self::new(kind)).unwrap()
        })
    }
}

impl Monitor for Fake {
    fn kind(&self) -> MonitorKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled && self.available);
    }

    fn add_contextual_info(&self, _event: &mut CrashEvent<'_>) -> Result<(), Error> {
        self.contributions.fetch_add(1, Ordering::Relaxed);
        if self.fails {
            return Err(Error::StateLocked(self.kind));
        }
        Ok(())
    }
}

struct Setup {
    _dir: tempfile::TempDir,
    paths: DirectoryPaths,
}

impl Setup {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = DirectoryPaths::new(dir.path().join("reports"), "orchestrator").unwrap();
        Self { _dir: dir, paths }
    }

    fn builder(&self) -> OrchestratorBuilder {
        OrchestratorBuilder::new(self.paths.clone())
            .thread_control(Box::new(CurrentThreadOnly))
            .debugger_check(|| false)
    }
}

fn read_report(orchestrator: &MonitorOrchestrator) -> serde_json::Value {
    let path = orchestrator.last_report_path().expect("no report was written");
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn marker_a() {}
fn marker_b() {}

#[test]
fn unavailable_monitors_are_not_active() {
    let setup = Setup::new();
    let signal = Fake::new(MonitorKind::SIGNAL);
    let mach = Fake::unavailable(MonitorKind::MACH_EXCEPTION);

    let orchestrator = setup.builder().monitor(signal.clone()).monitor(mach).build().unwrap();
    assert_eq!(orchestrator.active_monitors(), MonitorKind::empty());

    let active = orchestrator.set_active_monitors(MonitorKind::ALL);
    assert_eq!(active, MonitorKind::SIGNAL);
    assert_eq!(orchestrator.active_monitors(), MonitorKind::SIGNAL);

    assert_eq!(
        orchestrator.set_active_monitors(MonitorKind::USER_REPORTED),
        MonitorKind::empty()
    );
    assert!(!signal.is_enabled());
}

#[test]
fn debugger_masks_unsafe_monitors() {
    let setup = Setup::new();
    let signal = Fake::new(MonitorKind::SIGNAL);

    let orchestrator = setup
        .builder()
        .debugger_check(|| true)
        .monitor(signal.clone())
        .monitor(Arc::new(UserReportedMonitor::default()))
        .build()
        .unwrap();

    let active = orchestrator.set_active_monitors(MonitorKind::PRODUCTION_SAFE);
    assert_eq!(active, MonitorKind::USER_REPORTED);
    assert!(!signal.is_enabled());
}

#[test]
fn async_safety_masks_unsafe_monitors() {
    let setup = Setup::new();
    let orchestrator = setup
        .builder()
        .monitor(Fake::new(MonitorKind::SIGNAL))
        .monitor(Fake::new(MonitorKind::ZOMBIE))
        .build()
        .unwrap();

    assert_eq!(
        orchestrator.set_active_monitors(MonitorKind::ALL),
        MonitorKind::SIGNAL | MonitorKind::ZOMBIE
    );

    assert!(!orchestrator.notify_fatal_captured(true));
    assert_eq!(orchestrator.phase(), HandlerPhase::Handling);
    assert_eq!(
        orchestrator.set_active_monitors(MonitorKind::ALL),
        MonitorKind::SIGNAL
    );
    assert!(orchestrator.state().requires_async_safety());
}

#[test]
fn second_notification_disables_everything() {
    let setup = Setup::new();
    let orchestrator = setup
        .builder()
        .monitor(Fake::new(MonitorKind::SIGNAL))
        .monitor(Fake::new(MonitorKind::SYSTEM))
        .build()
        .unwrap();
    orchestrator.set_active_monitors(MonitorKind::ALL);

    assert!(!orchestrator.notify_fatal_captured(false));
    assert!(orchestrator.notify_fatal_captured(false));
    assert_eq!(orchestrator.phase(), HandlerPhase::Recrashed);
    assert_eq!(orchestrator.active_monitors(), MonitorKind::empty());

    let safety = orchestrator.state().safety();
    assert!(safety.handling_fatal && safety.crashed_during_handling);
    assert!(!safety.requires_async_safety);

    assert_eq!(
        orchestrator.set_active_monitors(MonitorKind::ALL),
        MonitorKind::empty()
    );
}

#[test]
fn fatal_event_is_reported_once() {
    let setup = Setup::new();
    let signal = Fake::new(MonitorKind::SIGNAL);
    let failing = Fake::failing(MonitorKind::ZOMBIE);
    let system = Arc::new(SystemMonitor::default());

    let orchestrator = setup
        .builder()
        .monitor(signal.clone())
        .monitor(failing.clone())
        .monitor(system)
        .build()
        .unwrap();
    orchestrator.set_active_monitors(MonitorKind::ALL);

    assert!(!orchestrator.notify_fatal_captured(false));

    let control = CurrentThreadOnly;
    let mut ctx = MachineContext::for_current_thread(&control, true);
    let backtrace = [marker_a as usize, marker_b as usize, 1];
    let mut event = CrashEvent::new(EventKind::Signal(SignalInfo {
        signum: libc::SIGSEGV,
        code: 1,
    }));
    event.context = Some(&mut ctx);
    event.backtrace = Some(&backtrace[..]);
    orchestrator.handle_exception(&mut event);

    // The failing monitor didn't stop the others from contributing
    assert_eq!(failing.contributions.load(Ordering::Relaxed), 1);
    assert_eq!(signal.contributions.load(Ordering::Relaxed), 1);
    assert!(event.system.is_some());

    assert_eq!(orchestrator.phase(), HandlerPhase::Disabled);
    assert_eq!(orchestrator.active_monitors(), MonitorKind::empty());
    assert!(!signal.is_enabled());
    assert_eq!(
        orchestrator.set_active_monitors(MonitorKind::ALL),
        MonitorKind::empty()
    );

    let report = read_report(&orchestrator);
    assert_eq!(report["report"]["type"], "standard");
    assert_eq!(report["crash"]["error"]["type"], "signal");
    assert_eq!(report["crash"]["error"]["signal"]["name"], "SIGSEGV");
    assert_eq!(
        report["system"]["process_id"],
        u64::from(std::process::id())
    );

    let threads = report["crash"]["threads"].as_array().unwrap();
    let frames = threads[0]["backtrace"]["contents"].as_array().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["instruction_addr"], marker_a as usize as u64);
    assert_eq!(frames[1]["instruction_addr"], marker_b as usize as u64);
}

#[test]
fn user_reports_keep_monitoring() {
    let setup = Setup::new();
    let signal = Fake::new(MonitorKind::SIGNAL);
    let orchestrator = setup
        .builder()
        .monitor(signal.clone())
        .monitor(Arc::new(UserReportedMonitor::default()))
        .build()
        .unwrap();

    let report = UserReport {
        name: "BadThing",
        language: Some("rust"),
        line_of_code: Some("let x = y?;"),
        custom_backtrace_json: Some(r#"["frame 1", "frame 2"]"#),
    };

    orchestrator.set_active_monitors(MonitorKind::SIGNAL);
    assert!(matches!(
        orchestrator.report_user_exception(report, Some("it broke"), false),
        Err(Error::MonitorInactive(MonitorKind::USER_REPORTED))
    ));
    assert!(orchestrator.last_report_path().is_none());

    orchestrator.set_active_monitors(MonitorKind::SIGNAL | MonitorKind::USER_REPORTED);
    for _ in 0..2 {
        orchestrator
            .report_user_exception(report, Some("it broke"), false)
            .unwrap();
        assert_eq!(orchestrator.phase(), HandlerPhase::Idle);
    }
    assert!(signal.is_enabled());
    assert_eq!(
        orchestrator.active_monitors(),
        MonitorKind::SIGNAL | MonitorKind::USER_REPORTED
    );

    let report = read_report(&orchestrator);
    let error = &report["crash"]["error"];
    assert_eq!(error["type"], "user");
    assert_eq!(error["reason"], "it broke");
    assert_eq!(error["user_reported"]["name"], "BadThing");
    assert_eq!(error["user_reported"]["language"], "rust");
    assert_eq!(
        error["user_reported"]["backtrace"],
        serde_json::json!(["frame 1", "frame 2"])
    );

    let threads = report["crash"]["threads"].as_array().unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0]["crashed"], true);
    assert!(!threads[0]["backtrace"]["contents"].as_array().unwrap().is_empty());

    assert_eq!(setup.paths.reports().unwrap().len(), 2);
}

#[test]
fn crash_while_writing_replaces_the_report() {
    let setup = Setup::new();
    let cell: Arc<OnceLock<Weak<MonitorOrchestrator>>> = Arc::new(OnceLock::new());

    let mut config = ReportConfig::default();
    config.user_section = Some({
        let cell = cell.clone();
        Box::new(move |_w: &mut dyn crash_report::ReportWriter| {
            let Some(orchestrator) = cell.get().and_then(Weak::upgrade) else {
                return;
            };

            // A second crash in the middle of writing the first report
            assert!(orchestrator.notify_fatal_captured(false));
            let control = CurrentThreadOnly;
            let mut ctx = MachineContext::for_current_thread(&control, true);
            let mut event = CrashEvent::signal(&mut ctx, libc::SIGBUS, 0, 0x10);
            orchestrator.handle_exception(&mut event);
        })
    });

    let signal = Fake::new(MonitorKind::SIGNAL);
    let orchestrator = setup
        .builder()
        .report_config(config)
        .monitor(signal.clone())
        .build()
        .unwrap();
    cell.set(Arc::downgrade(&orchestrator)).unwrap();
    orchestrator.set_active_monitors(MonitorKind::ALL);

    assert!(!orchestrator.notify_fatal_captured(false));
    let control = CurrentThreadOnly;
    let mut ctx = MachineContext::for_current_thread(&control, true);
    let mut event = CrashEvent::signal(&mut ctx, libc::SIGSEGV, 1, 0);
    orchestrator.handle_exception(&mut event);

    assert_eq!(orchestrator.phase(), HandlerPhase::Recrashed);
    assert!(!signal.is_enabled());
    // Only the first event contributed, the monitors were disabled by then
    assert_eq!(signal.contributions.load(Ordering::Relaxed), 1);

    let report = read_report(&orchestrator);
    assert_eq!(report["report"]["type"], "minimal");
    assert_eq!(report["recrash_report"]["incomplete"], true);
    assert_eq!(report["recrash_report"]["report"]["type"], "standard");
    assert_eq!(
        report["recrash_report"]["crash"]["error"]["signal"]["name"],
        "SIGSEGV"
    );
    assert_eq!(report["crash"]["error"]["signal"]["name"], "SIGBUS");
    assert!(report["crash"]["crashed_thread"].is_object());

    let path = orchestrator.last_report_path().unwrap();
    assert!(!path.with_extension("old").exists());
    assert_eq!(setup.paths.reports().unwrap(), [path]);
}
