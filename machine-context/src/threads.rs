use crate::{CpuState, Error, ThreadId, ThreadList};
use std::sync::atomic::{AtomicU64, Ordering};

/// Enumerates and controls the threads of the current process
pub trait ThreadControl: Send + Sync {
    /// The id of the calling thread
    fn current_thread(&self) -> ThreadId;
    /// Appends every thread of the process to `threads`
    fn enumerate(&self, threads: &mut ThreadList) -> Result<(), Error>;
    fn suspend(&self, thread: ThreadId) -> Result<(), Error>;
    fn resume(&self, thread: ThreadId) -> Result<(), Error>;
    /// Copies the registers of a suspended thread, returning false if they
    /// are not available
    fn capture(&self, thread: ThreadId, cpu: &mut CpuState) -> bool;
    /// Retrieves the name of a thread into `buf`
    fn thread_name<'b>(&self, thread: ThreadId, buf: &'b mut [u8]) -> Option<&'b str>;
    /// Retrieves the name of the dispatch queue a thread is servicing
    fn queue_name<'b>(&self, _thread: ThreadId, _buf: &'b mut [u8]) -> Option<&'b str> {
        None
    }
}

/// The id of the calling thread as the kernel knows it
#[inline]
pub fn current_thread_id() -> ThreadId {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            // SAFETY: syscall
            unsafe { libc::syscall(libc::SYS_gettid) as ThreadId }
        } else if #[cfg(target_os = "macos")] {
            // SAFETY: syscall
            unsafe { mach2::mach_init::mach_thread_self() as ThreadId }
        } else {
            1
        }
    }
}

/// The maximum number of threads that can be excluded from suspension
pub const MAX_RESERVED_THREADS: usize = 10;

/// Threads that must keep running while the process is suspended, eg. a
/// watchdog.
///
/// Thread id 0 marks a free slot.
pub struct ReservedThreads {
    threads: [AtomicU64; MAX_RESERVED_THREADS],
}

impl Default for ReservedThreads {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservedThreads {
    pub const fn new() -> Self {
        Self {
            threads: [const { AtomicU64::new(0) }; MAX_RESERVED_THREADS],
        }
    }

    /// Reserves a thread, returning false if there is no room for it
    pub fn add(&self, thread: ThreadId) -> bool {
        if thread == 0 {
            return false;
        }
        if self.contains(thread) {
            return true;
        }

        for slot in &self.threads {
            if slot
                .compare_exchange(0, thread, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }

        log::error!(
            "unable to reserve thread {thread}, all {MAX_RESERVED_THREADS} reserved slots are in use"
        );
        false
    }

    /// Releases a previously reserved thread
    pub fn remove(&self, thread: ThreadId) {
        for slot in &self.threads {
            let _ = slot.compare_exchange(thread, 0, Ordering::AcqRel, Ordering::Acquire);
        }
    }

    #[inline]
    pub fn contains(&self, thread: ThreadId) -> bool {
        thread != 0
            && self
                .threads
                .iter()
                .any(|slot| slot.load(Ordering::Acquire) == thread)
    }

    pub fn len(&self) -> usize {
        self.threads
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire) != 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Knows only about the calling thread, used where other threads can't be
/// controlled
#[derive(Copy, Clone, Default)]
pub struct CurrentThreadOnly;

impl ThreadControl for CurrentThreadOnly {
    fn current_thread(&self) -> ThreadId {
        current_thread_id()
    }

    fn enumerate(&self, threads: &mut ThreadList) -> Result<(), Error> {
        threads.push(self.current_thread());
        Ok(())
    }

    fn suspend(&self, _thread: ThreadId) -> Result<(), Error> {
        Err(Error::Unsupported)
    }

    fn resume(&self, thread: ThreadId) -> Result<(), Error> {
        Err(Error::NotSuspended(thread))
    }

    fn capture(&self, _thread: ThreadId, _cpu: &mut CpuState) -> bool {
        false
    }

    fn thread_name<'b>(&self, _thread: ThreadId, _buf: &'b mut [u8]) -> Option<&'b str> {
        None
    }
}

/// Creates the most capable [`ThreadControl`] for the current platform
pub fn platform_thread_control() -> Result<Box<dyn ThreadControl>, Error> {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            Ok(Box::new(crate::SignalThreadControl::install(
                crate::SignalThreadControl::DEFAULT_SIGNAL,
            )?))
        } else if #[cfg(target_os = "macos")] {
            Ok(Box::new(crate::MachThreadControl))
        } else {
            Ok(Box::new(CurrentThreadOnly))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reserved_capacity_is_bounded() {
        let reserved = ReservedThreads::new();
        assert!(!reserved.add(0));

        for thread in 1..=MAX_RESERVED_THREADS as u64 {
            assert!(reserved.add(thread));
        }
        // Re-adding is not an error
        assert!(reserved.add(3));
        assert!(!reserved.add(100));
        assert!(!reserved.contains(100));
        assert_eq!(reserved.len(), MAX_RESERVED_THREADS);

        reserved.remove(3);
        assert!(!reserved.contains(3));
        assert!(reserved.add(100));
        assert!(reserved.contains(100));
    }

    #[test]
    fn current_thread_only() {
        let control = CurrentThreadOnly;
        let mut threads = ThreadList::new();
        control.enumerate(&mut threads).unwrap();

        assert_eq!(threads.as_slice(), [current_thread_id()]);
        assert!(control.suspend(1).is_err());
    }
}
