//! Captures the state of the threads of the current process so that it can be
//! written into a crash report.
//!
//! The crate provides
//!
//! * [`CpuState`] with per-architecture register layouts
//! * [`MachineContext`], the captured state of one thread plus the list of
//!   every thread in the process at the time of capture
//! * [`StackCursor`] implementations that unwind either a list of addresses
//!   captured up front ([`BacktraceCursor`]) or a live stack by following
//!   frame pointers ([`FrameWalkCursor`])
//! * [`ThreadControl`], used to enumerate, suspend, resume, and capture the
//!   registers of other threads, along with [`SuspendedEnvironment`] which
//!   guarantees every suspended thread is resumed again
//! * [`MemoryReader`] for reading arbitrary addresses without faulting
//!
//! # Linux
//!
//! Linux has no way to suspend a thread of the current process from within
//! that process, so [`SignalThreadControl`] sends a dedicated signal to each
//! thread, whose handler records the thread's registers and then parks until
//! it is released.
//!
//! # Macos
//!
//! Threads are suspended and resumed with the mach thread APIs. Register
//! capture of other threads is not implemented, those threads are reported
//! without CPU state.

#![allow(unsafe_code)]

mod context;
pub mod cpu;
mod cursor;
mod error;
mod memory;
mod snapshot;
mod symbolicate;
mod threads;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod linux;
        pub use linux::SignalThreadControl;
    } else if #[cfg(target_os = "macos")] {
        mod mac;
        pub use mac::MachThreadControl;
    }
}

pub use context::{MAX_CAPTURED_THREADS, MachineContext, ThreadList};
pub use cpu::CpuState;
pub use cursor::{
    BacktraceCursor, FrameWalkCursor, MAX_STACK_DEPTH, StackCursor, StackEntry,
};
pub use error::Error;
pub use memory::{MemoryReader, SafeMemory};
pub use snapshot::SuspendedEnvironment;
pub use symbolicate::{DlSymbolicator, SymbolInfo, Symbolicator};
pub use threads::{
    CurrentThreadOnly, MAX_RESERVED_THREADS, ReservedThreads, ThreadControl,
    platform_thread_control,
};

/// The kernel identifier of a thread, a tid on Linux and a mach port on Macos
pub type ThreadId = u64;

#[cfg(feature = "debug-print")]
#[macro_export]
macro_rules! debug_print {
    ($s:literal) => {
        let cstr = concat!($s, "\n");
        $crate::write_stderr(cstr);
    };
}

#[cfg(not(feature = "debug-print"))]
#[macro_export]
macro_rules! debug_print {
    ($s:literal) => {};
}

/// Writes the specified string directly to stderr.
///
/// This is safe to be called from within a compromised context.
#[inline]
pub fn write_stderr(s: &'static str) {
    // SAFETY: syscall
    unsafe {
        libc::write(2, s.as_ptr().cast(), s.len());
    }
}
