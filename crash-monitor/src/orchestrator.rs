use crate::{
    DebuggerCheck, Error, HandlerPhase, HandlerState, Monitor, MonitorKind, ProcessDebuggerCheck,
    ReportPathProvider,
};
use crash_report::{CrashEvent, ReportConfig, ReportEnvironment, UserReport};
use machine_context::{
    MachineContext, ReservedThreads, SuspendedEnvironment, ThreadControl, ThreadId,
};
use parking_lot::Mutex;
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// The maximum number of frames captured for a user reported exception
pub const MAX_USER_FRAMES: usize = 100;

/// Owns the monitors of a process and turns the events they detect into
/// reports.
///
/// External fault sources (signal handlers, exception hooks) call
/// [`Self::notify_fatal_captured`] as soon as they detect a fatal event and
/// then [`Self::handle_exception`] with the event. Only the first fatal event
/// gets a full report, after which every monitor is disabled. A fatal event
/// while the first is being handled means the handler itself crashed, it
/// replaces the partially written report with a minimal one.
pub struct MonitorOrchestrator {
    monitors: Vec<Arc<dyn Monitor>>,
    state: Arc<HandlerState>,
    paths: Box<dyn ReportPathProvider>,
    debugger: Box<dyn DebuggerCheck>,
    threads: Box<dyn ThreadControl>,
    reserved: ReservedThreads,
    config: ReportConfig,
    last_report: Mutex<Option<PathBuf>>,
    warned_about_debugger: AtomicBool,
}

impl MonitorOrchestrator {
    /// Enables the monitors in `requested` and disables all others,
    /// returning the monitors that are actually active.
    ///
    /// Monitors that are unsafe under a debugger are masked out while one is
    /// attached, as are monitors that are not async-signal-safe once an event
    /// required async safety. Nothing can be enabled again after the handler
    /// has finished with a fatal event or crashed.
    pub fn set_active_monitors(&self, requested: MonitorKind) -> MonitorKind {
        let mut requested = requested;

        if matches!(
            self.state.phase(),
            HandlerPhase::Recrashed | HandlerPhase::Disabled
        ) {
            requested = MonitorKind::empty();
        }

        if requested.intersects(MonitorKind::DEBUGGER_UNSAFE) && self.debugger.is_being_traced() {
            if !self.warned_about_debugger.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "a debugger is attached, masking out {}, crashes will NOT be recorded while debugging",
                    requested & MonitorKind::DEBUGGER_UNSAFE
                );
            }
            requested &= MonitorKind::DEBUGGER_SAFE;
        }

        if self.state.requires_async_safety() && requested.intersects(MonitorKind::ASYNC_UNSAFE) {
            log::debug!("async safety is required, masking out unsafe monitors");
            requested &= MonitorKind::ASYNC_SAFE;
        }

        let previous = self.state.active();
        let mut active = MonitorKind::empty();
        for monitor in &self.monitors {
            let kind = monitor.kind();
            monitor.set_enabled(requested.intersects(kind));
            if monitor.is_enabled() {
                active |= kind;
            }
        }

        if previous != active {
            log::debug!("active monitors changed from {previous} to {active}");
        }
        self.state.set_active(active);
        active
    }

    #[inline]
    pub fn active_monitors(&self) -> MonitorKind {
        self.state.active()
    }

    /// Records that a fatal event was detected, before it is handled.
    ///
    /// `requires_async_safety` is set by fault sources that run in a context
    /// where only async-signal-safe work is allowed, it stays in effect for
    /// the rest of the process. Returns true if the event happened while
    /// another one was being handled, in which case every monitor is
    /// disabled to stop the faults from recursing.
    pub fn notify_fatal_captured(&self, requires_async_safety: bool) -> bool {
        let recrashed = self.state.notify_fatal(requires_async_safety);
        if recrashed {
            machine_context::debug_print!("crashed while handling a crash");
            log::info!("detected a crash in the crash handler, disabling all monitors");
            self.set_active_monitors(MonitorKind::empty());
        }
        recrashed
    }

    /// Gathers contextual information from every enabled monitor into
    /// `event` and writes the report for it.
    ///
    /// Every monitor is disabled afterwards unless the event was user
    /// reported.
    pub fn handle_exception(&self, event: &mut CrashEvent<'_>) {
        let safety = self.state.safety();
        event.requires_async_safety = safety.requires_async_safety;
        if safety.crashed_during_handling {
            event.crashed_during_handling = true;
        }

        for monitor in &self.monitors {
            if !monitor.is_enabled() {
                continue;
            }
            if let Err(err) = monitor.add_contextual_info(event) {
                log::warn!(
                    "the {} monitor did not add its information: {err}",
                    monitor.kind()
                );
            }
        }

        if let Err(err) = self.write_report(event) {
            log::error!("unable to write the crash report: {err}");
        }

        if self.state.finish(event.is_user_reported()) {
            log::debug!("the event is fatal, disabling all monitors");
            self.set_active_monitors(MonitorKind::empty());
        }
    }

    fn write_report(&self, event: &CrashEvent<'_>) -> Result<(), Error> {
        let env = ReportEnvironment::new(&*self.threads, &self.config);

        if event.crashed_during_handling {
            let last = self.last_report.try_lock().and_then(|last| last.clone());
            match last {
                Some(path) => {
                    crash_report::write_recrash_report(event, &env, &path)?;
                    return Ok(());
                }
                None => log::warn!("no report was being written, writing a full report instead"),
            }
        }

        let path = self.paths.next_report_path(event);
        match self.last_report.try_lock() {
            Some(mut last) => *last = Some(path.clone()),
            None => log::warn!("unable to remember the path of {}", path.display()),
        }

        crash_report::write_standard_report(event, &env, &path)?;
        Ok(())
    }

    /// Writes a report for an exception raised by user code.
    ///
    /// The calling thread's backtrace is captured and the rest of the
    /// process is suspended while the report is written. The process is
    /// aborted afterwards if `terminate` is set.
    pub fn report_user_exception(
        &self,
        report: UserReport<'_>,
        reason: Option<&str>,
        terminate: bool,
    ) -> Result<(), Error> {
        if !self.active_monitors().contains(MonitorKind::USER_REPORTED) {
            log::warn!(
                "the user reported exception '{}' was not recorded, the monitor is not active",
                report.name
            );
            return Err(Error::MonitorInactive(MonitorKind::USER_REPORTED));
        }

        let mut frames = [0usize; MAX_USER_FRAMES];
        let mut count = 0;
        backtrace::trace(|frame| {
            frames[count] = frame.ip() as usize;
            count += 1;
            count < frames.len()
        });

        self.notify_fatal_captured(false);

        let suspended = SuspendedEnvironment::suspend(&*self.threads, &self.reserved);
        let mut context = MachineContext::for_current_thread(&*self.threads, true);
        context.set_threads(suspended.threads());

        let mut event = CrashEvent::user(report, reason, &mut context, &frames[..count]);
        self.handle_exception(&mut event);
        drop(suspended);

        if terminate {
            log::info!("terminating the process after a user reported exception");
            self.set_active_monitors(MonitorKind::empty());
            std::process::abort();
        }

        Ok(())
    }

    /// Writes a report for a thread that stopped responding, with the rest
    /// of the process suspended
    pub fn handle_deadlock(&self, thread: ThreadId) {
        self.notify_fatal_captured(false);

        let suspended = SuspendedEnvironment::suspend(&*self.threads, &self.reserved);
        let mut context = MachineContext::for_thread(&*self.threads, thread, true);
        context.set_threads(suspended.threads());

        let mut event = CrashEvent::deadlock(&mut context, Some("Main thread deadlocked"));
        self.handle_exception(&mut event);
        drop(suspended);
    }

    #[inline]
    pub fn phase(&self) -> HandlerPhase {
        self.state.phase()
    }

    #[inline]
    pub fn state(&self) -> &HandlerState {
        &self.state
    }

    #[inline]
    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    #[inline]
    pub fn thread_control(&self) -> &dyn ThreadControl {
        &*self.threads
    }

    /// Threads that are not suspended while a report is written
    #[inline]
    pub fn reserved_threads(&self) -> &ReservedThreads {
        &self.reserved
    }

    /// The path of the last standard report that was started
    pub fn last_report_path(&self) -> Option<PathBuf> {
        self.last_report.lock().clone()
    }

    /// The registered monitor of `kind`
    pub fn monitor(&self, kind: MonitorKind) -> Option<&Arc<dyn Monitor>> {
        self.monitors.iter().find(|m| m.kind() == kind)
    }
}

/// Configures and creates a [`MonitorOrchestrator`]
pub struct OrchestratorBuilder {
    monitors: Vec<Arc<dyn Monitor>>,
    paths: Box<dyn ReportPathProvider>,
    state: Option<Arc<HandlerState>>,
    debugger: Box<dyn DebuggerCheck>,
    threads: Option<Box<dyn ThreadControl>>,
    config: ReportConfig,
}

impl OrchestratorBuilder {
    pub fn new(paths: impl ReportPathProvider + 'static) -> Self {
        Self {
            monitors: Vec::new(),
            paths: Box::new(paths),
            state: None,
            debugger: Box::new(ProcessDebuggerCheck),
            threads: None,
            config: ReportConfig::default(),
        }
    }

    /// Registers a monitor, only one monitor per kind is kept
    pub fn monitor<M: Monitor + 'static>(mut self, monitor: Arc<M>) -> Self {
        let kind = monitor.kind();
        if self.monitors.iter().any(|m| m.kind() == kind) {
            log::warn!("a {kind} monitor is already registered, ignoring another one");
            return self;
        }
        self.monitors.push(monitor);
        self
    }

    /// Shares an existing handler state rather than creating one
    pub fn state(mut self, state: Arc<HandlerState>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn debugger_check(mut self, check: impl DebuggerCheck + 'static) -> Self {
        self.debugger = Box::new(check);
        self
    }

    /// Overrides the platform's [`ThreadControl`]
    pub fn thread_control(mut self, threads: Box<dyn ThreadControl>) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn report_config(mut self, config: ReportConfig) -> Self {
        self.config = config;
        self
    }

    /// Creates the orchestrator with every monitor disabled, see
    /// [`MonitorOrchestrator::set_active_monitors`]
    pub fn build(self) -> Result<Arc<MonitorOrchestrator>, Error> {
        let threads = match self.threads {
            Some(threads) => threads,
            None => machine_context::platform_thread_control()?,
        };
        let monitors = self.monitors;

        Ok(Arc::new_cyclic(|weak| {
            for monitor in &monitors {
                monitor.attach(weak.clone());
            }

            MonitorOrchestrator {
                monitors,
                state: self.state.unwrap_or_default(),
                paths: self.paths,
                debugger: self.debugger,
                threads,
                reserved: ReservedThreads::new(),
                config: self.config,
                last_report: Mutex::new(None),
                warned_about_debugger: AtomicBool::new(false),
            }
        }))
    }
}
