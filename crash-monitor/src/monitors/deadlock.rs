use crate::{Monitor, MonitorKind, MonitorOrchestrator};
use machine_context::ThreadId;
use parking_lot::Mutex;
use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

struct Shared {
    enabled: AtomicBool,
    beats: AtomicU64,
    watched: AtomicU64,
    interval: Duration,
    terminate: bool,
    orchestrator: Mutex<Weak<MonitorOrchestrator>>,
}

/// Raises a [`MonitorKind::MAIN_THREAD_DEADLOCK`] event when a watched thread
/// stops sending heartbeats.
///
/// The watchdog runs on its own thread, which is reserved so that it keeps
/// running while the rest of the process is suspended for the report.
pub struct DeadlockWatchdog {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeadlockWatchdog {
    /// Creates a watchdog that fires after `interval` without a heartbeat,
    /// and aborts the process once the report is written if `terminate` is
    /// set
    pub fn new(interval: Duration, terminate: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                enabled: AtomicBool::new(false),
                beats: AtomicU64::new(0),
                watched: AtomicU64::new(0),
                interval,
                terminate,
                orchestrator: Mutex::new(Weak::new()),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Sets the thread whose heartbeats are expected
    pub fn watch(&self, thread: ThreadId) {
        self.shared.watched.store(thread, Ordering::Release);
        self.heartbeat();
    }

    /// Called periodically by the watched thread
    #[inline]
    pub fn heartbeat(&self) {
        self.shared.beats.fetch_add(1, Ordering::AcqRel);
    }

    fn start(&self) {
        let Some(mut handle) = self.handle.try_lock() else {
            return;
        };
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let shared = self.shared.clone();
        match std::thread::Builder::new()
            .name("deadlock-watchdog".to_owned())
            .spawn(move || watch_loop(&shared))
        {
            Ok(h) => *handle = Some(h),
            Err(err) => {
                log::error!("unable to start the deadlock watchdog: {err}");
                self.shared.enabled.store(false, Ordering::Release);
            }
        }
    }

    fn stop(&self) {
        // Only wake the thread, this can be called from a crashed context or
        // from the watchdog itself
        if let Some(handle) = self.handle.try_lock() {
            if let Some(h) = handle.as_ref() {
                h.thread().unpark();
            }
        }
    }
}

impl Drop for DeadlockWatchdog {
    fn drop(&mut self) {
        self.shared.enabled.store(false, Ordering::Release);
        if let Some(h) = self.handle.get_mut().take() {
            h.thread().unpark();
            if h.thread().id() != std::thread::current().id() {
                let _ = h.join();
            }
        }
    }
}

fn watch_loop(shared: &Shared) {
    let Some(orchestrator) = shared.orchestrator.lock().upgrade() else {
        log::warn!("deadlock watchdog started without an orchestrator");
        return;
    };
    let control = orchestrator.thread_control();
    let me = control.current_thread();
    orchestrator.reserved_threads().add(me);
    // Don't keep the orchestrator alive just because we are waiting
    drop(orchestrator);

    let mut last = shared.beats.load(Ordering::Acquire);
    'watch: loop {
        let deadline = Instant::now() + shared.interval;
        loop {
            if !shared.enabled.load(Ordering::Acquire) {
                break 'watch;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::park_timeout(deadline - now);
        }

        let beats = shared.beats.load(Ordering::Acquire);
        let watched = shared.watched.load(Ordering::Acquire);
        if beats != last || watched == 0 {
            last = beats;
            continue;
        }

        let Some(orchestrator) = shared.orchestrator.lock().upgrade() else {
            break;
        };

        log::error!("thread {watched} has not responded for {:?}", shared.interval);
        orchestrator.handle_deadlock(watched);

        if shared.terminate {
            std::process::abort();
        }
        break;
    }

    if let Some(orchestrator) = shared.orchestrator.lock().upgrade() {
        orchestrator.reserved_threads().remove(me);
    }
}

impl Monitor for DeadlockWatchdog {
    fn kind(&self) -> MonitorKind {
        MonitorKind::MAIN_THREAD_DEADLOCK
    }

    fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        let was = self.shared.enabled.swap(enabled, Ordering::AcqRel);
        match (was, enabled) {
            (false, true) => self.start(),
            (true, false) => self.stop(),
            _ => {}
        }
    }

    fn attach(&self, orchestrator: Weak<MonitorOrchestrator>) {
        *self.shared.orchestrator.lock() = orchestrator;
    }
}
