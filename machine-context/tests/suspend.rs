#![cfg(any(target_os = "linux", target_os = "android"))]

use machine_context::{
    MachineContext, ReservedThreads, SignalThreadControl, SuspendedEnvironment, ThreadControl,
    ThreadList,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc,
    },
    time::Duration,
};

/// Suspending the environment suspends the threads of concurrently running
/// tests too, which must not in turn try to suspend us
static SERIAL: parking_lot::Mutex<()> = parking_lot::const_mutex(());

struct Spinner {
    tid: u64,
    counter: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<()>,
}

fn spawn_spinner(name: &str) -> Spinner {
    let counter = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let handle = {
        let counter = counter.clone();
        let stop = stop.clone();
        std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                tx.send(machine_context::CurrentThreadOnly.current_thread())
                    .unwrap();
                while !stop.load(Ordering::Relaxed) {
                    counter.fetch_add(1, Ordering::Relaxed);
                    std::hint::spin_loop();
                }
            })
            .unwrap()
    };

    Spinner {
        tid: rx.recv().unwrap(),
        counter,
        stop,
        handle,
    }
}

impl Spinner {
    fn finish(self) {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().unwrap();
    }
}

#[test]
fn suspends_captures_and_resumes() {
    let _serial = SERIAL.lock();
    let control = SignalThreadControl::install(SignalThreadControl::DEFAULT_SIGNAL).unwrap();
    let spinner = spawn_spinner("spinner");

    let mut threads = ThreadList::new();
    control.enumerate(&mut threads).unwrap();
    assert!(threads.contains(spinner.tid));
    assert!(threads.contains(control.current_thread()));

    let mut name = [0u8; 32];
    assert_eq!(control.thread_name(spinner.tid, &mut name), Some("spinner"));

    {
        let reserved = ReservedThreads::new();
        let env = SuspendedEnvironment::suspend(&control, &reserved);
        assert!(env.suspended().contains(&spinner.tid));

        let before = spinner.counter.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(spinner.counter.load(Ordering::Relaxed), before);

        let ctx = MachineContext::for_thread(env.control(), spinner.tid, false);
        assert!(!ctx.is_current_thread);
        assert!(ctx.can_have_cpu_state());
        if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
            assert_ne!(ctx.cpu.instruction_address(), 0);
            assert_ne!(ctx.cpu.stack_pointer(), 0);
        }
    }

    let resumed_at = spinner.counter.load(Ordering::Relaxed);
    std::thread::sleep(Duration::from_millis(20));
    assert!(spinner.counter.load(Ordering::Relaxed) > resumed_at);

    assert!(control.resume(spinner.tid).is_err());
    spinner.finish();
}

#[test]
fn reserved_threads_keep_running() {
    let _serial = SERIAL.lock();
    let control = SignalThreadControl::install(SignalThreadControl::DEFAULT_SIGNAL).unwrap();
    let watchdog = spawn_spinner("watchdog");

    let reserved = ReservedThreads::new();
    assert!(reserved.add(watchdog.tid));

    {
        let env = SuspendedEnvironment::suspend(&control, &reserved);
        assert!(env.threads().contains(&watchdog.tid));
        assert!(!env.suspended().contains(&watchdog.tid));

        let before = watchdog.counter.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(20));
        assert!(watchdog.counter.load(Ordering::Relaxed) > before);
    }

    watchdog.finish();
}

#[test]
fn only_one_signal_at_a_time() {
    let first = SignalThreadControl::install(SignalThreadControl::DEFAULT_SIGNAL).unwrap();
    assert!(SignalThreadControl::install(libc::SIGUSR1).is_err());
    drop(first);
}
