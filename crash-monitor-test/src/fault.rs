//! A [`MonitorKind::SIGNAL`] fault source that hands the fatal signals it
//! catches to a [`MonitorOrchestrator`]

#![allow(unsafe_code)]

use crash_monitor::{CrashEvent, Monitor, MonitorKind, MonitorOrchestrator};
use machine_context::{MachineContext, SuspendedEnvironment};
use parking_lot::Mutex;
use std::{
    cell::Cell,
    io, mem, ptr,
    sync::{
        Weak,
        atomic::{AtomicBool, Ordering},
    },
};

/// The signals we attempt to handle
const FATAL_SIGNALS: [i32; 6] = [
    libc::SIGABRT,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGILL,
    libc::SIGSEGV,
    libc::SIGTRAP,
];

/// The size of the alternate stack the handler runs on, writing a report needs
/// a lot more than the minimum
const SIG_STACK_SIZE: usize = if libc::SIGSTKSZ > 256 * 1024 {
    libc::SIGSTKSZ
} else {
    256 * 1024
};

static ORCHESTRATOR: Mutex<Option<Weak<MonitorOrchestrator>>> = parking_lot::const_mutex(None);
static OLD_HANDLERS: Mutex<Option<[libc::sigaction; 6]>> = parking_lot::const_mutex(None);

/// Catches fatal signals while enabled, there can only be one per process
#[derive(Default)]
pub struct SignalSource {
    enabled: AtomicBool,
}

impl Monitor for SignalSource {
    fn kind(&self) -> MonitorKind {
        MonitorKind::SIGNAL
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }

        // SAFETY: syscalls
        unsafe {
            if enabled {
                if let Err(err) = install_sigaltstack() {
                    log::error!("unable to install an alternate signal stack: {err}");
                }
                if !install_handlers() {
                    log::error!("unable to install the fatal signal handlers");
                    restore_sigaltstack();
                    self.enabled.store(false, Ordering::Release);
                }
            } else {
                restore_handlers();
                restore_sigaltstack();
            }
        }
    }

    fn attach(&self, orchestrator: Weak<MonitorOrchestrator>) {
        *ORCHESTRATOR.lock() = Some(orchestrator);
    }
}

#[derive(Copy, Clone)]
struct StackSave {
    /// The stack that was enabled before ours, if any
    old: Option<libc::stack_t>,
    new: libc::stack_t,
    guard_size: usize,
}

thread_local! {
    static STACK_SAVE: Cell<Option<StackSave>> = const { Cell::new(None) };
}

/// Installs an alternate stack for the calling thread to run the signal
/// handler on, so that a stack overflow can still be reported.
///
/// Alternate stacks are per thread, any thread that should be able to report
/// a stack overflow needs to call this. Nothing is done if the thread already
/// has an alternate stack that is large enough.
///
/// # Safety
///
/// The stack must be removed with [`restore_sigaltstack`] on the same thread
/// before it exits, otherwise the mapping is leaked.
pub unsafe fn install_sigaltstack() -> io::Result<()> {
    if STACK_SAVE.get().is_some() {
        return Ok(());
    }

    unsafe {
        let mut old_stack: libc::stack_t = mem::zeroed();
        if libc::sigaltstack(ptr::null(), &mut old_stack) == -1 {
            return Err(io::Error::last_os_error());
        }

        if old_stack.ss_flags & libc::SS_DISABLE == 0 && old_stack.ss_size >= SIG_STACK_SIZE {
            return Ok(());
        }

        // A guard page below the stack turns an overflow of the handler into
        // a fault instead of silent corruption
        let guard_size = libc::sysconf(libc::_SC_PAGESIZE) as usize;
        let alloc_size = guard_size + SIG_STACK_SIZE;

        let mapping = libc::mmap(
            ptr::null_mut(),
            alloc_size,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        );
        if mapping == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let stack_ptr = mapping.cast::<u8>().add(guard_size).cast::<libc::c_void>();
        if libc::mprotect(stack_ptr, SIG_STACK_SIZE, libc::PROT_READ | libc::PROT_WRITE) == -1 {
            let err = io::Error::last_os_error();
            libc::munmap(mapping, alloc_size);
            return Err(err);
        }

        let new_stack = libc::stack_t {
            ss_sp: stack_ptr,
            ss_flags: 0,
            ss_size: SIG_STACK_SIZE,
        };
        if libc::sigaltstack(&new_stack, ptr::null_mut()) == -1 {
            let err = io::Error::last_os_error();
            libc::munmap(mapping, alloc_size);
            return Err(err);
        }

        STACK_SAVE.set(Some(StackSave {
            old: (old_stack.ss_flags & libc::SS_DISABLE == 0).then_some(old_stack),
            new: new_stack,
            guard_size,
        }));
    }

    Ok(())
}

/// Removes the alternate stack installed by [`install_sigaltstack`] on the
/// calling thread, restoring the one that was there before it
///
/// # Safety
///
/// Must not be called while the handler is running on the stack.
pub unsafe fn restore_sigaltstack() {
    let Some(save) = STACK_SAVE.get() else {
        return;
    };

    unsafe {
        let mut current: libc::stack_t = mem::zeroed();
        if libc::sigaltstack(ptr::null(), &mut current) == -1 {
            return;
        }

        // Someone else replaced our stack, it can't be unmapped while they
        // might be using it
        if current.ss_sp == save.new.ss_sp {
            let restored = match save.old {
                Some(old) => libc::sigaltstack(&old, ptr::null_mut()),
                None => {
                    let mut disable: libc::stack_t = mem::zeroed();
                    disable.ss_flags = libc::SS_DISABLE;
                    libc::sigaltstack(&disable, ptr::null_mut())
                }
            };
            if restored == -1 {
                return;
            }
        }

        let mapping = save.new.ss_sp.cast::<u8>().sub(save.guard_size);
        libc::munmap(mapping.cast(), save.guard_size + save.new.ss_size);
        STACK_SAVE.set(None);
    }
}

unsafe fn install_handlers() -> bool {
    let Some(mut ohl) = OLD_HANDLERS.try_lock() else {
        return false;
    };
    if ohl.is_some() {
        return true;
    }

    unsafe {
        let mut old_handlers: [libc::sigaction; 6] = mem::zeroed();
        for (sig, old) in FATAL_SIGNALS.iter().zip(old_handlers.iter_mut()) {
            if libc::sigaction(*sig, ptr::null(), old) == -1 {
                return false;
            }
        }

        let mut sa: libc::sigaction = mem::zeroed();
        libc::sigemptyset(&mut sa.sa_mask);
        // Mask all fatal signals while handling one of them
        for sig in FATAL_SIGNALS {
            libc::sigaddset(&mut sa.sa_mask, sig);
        }
        sa.sa_sigaction = signal_handler as usize;
        sa.sa_flags = libc::SA_ONSTACK | libc::SA_SIGINFO;

        for sig in FATAL_SIGNALS {
            let _ = libc::sigaction(sig, &sa, ptr::null_mut());
        }

        *ohl = Some(old_handlers);
    }

    true
}

/// Restores the handlers that were installed before ours, or the default
/// handler if that fails
unsafe fn restore_handlers() {
    let Some(mut ohl) = OLD_HANDLERS.try_lock() else {
        return;
    };

    if let Some(old) = ohl.take() {
        unsafe {
            for (sig, action) in FATAL_SIGNALS.iter().zip(old.iter()) {
                if libc::sigaction(*sig, action, ptr::null_mut()) == -1 {
                    libc::signal(*sig, libc::SIG_DFL);
                }
            }
        }
    }
}

unsafe extern "C" fn signal_handler(
    sig: libc::c_int,
    info: *mut libc::siginfo_t,
    uc: *mut libc::c_void,
) {
    unsafe {
        let info = &*info;

        let orchestrator = ORCHESTRATOR
            .try_lock()
            .and_then(|weak| weak.as_ref().and_then(Weak::upgrade));

        if let Some(orchestrator) = orchestrator {
            machine_context::debug_print!("handling a fatal signal");

            // A recrash disables every monitor, the event is still handled so
            // the interrupted report is replaced with a minimal one
            orchestrator.notify_fatal_captured(true);

            let control = orchestrator.thread_control();
            let mut context =
                MachineContext::from_signal(&*uc.cast::<libc::ucontext_t>(), control.current_thread());
            let suspended = SuspendedEnvironment::suspend(control, orchestrator.reserved_threads());
            context.set_threads(suspended.threads());

            let mut event =
                CrashEvent::signal(&mut context, sig, info.si_code, info.si_addr() as usize);
            orchestrator.handle_exception(&mut event);
            drop(suspended);
        }

        // Let the default action run when the signal is delivered again
        libc::signal(sig, libc::SIG_DFL);

        // Signals sent with kill() or raise() have to be sent again, as does a
        // trap since the breakpoint instruction is not executed again
        if info.si_code <= 0 || sig == libc::SIGABRT || sig == libc::SIGTRAP {
            let tid = libc::syscall(libc::SYS_gettid) as i32;
            if libc::syscall(libc::SYS_tgkill, std::process::id(), tid, sig) < 0 {
                libc::_exit(1);
            }
        }
    }
}
