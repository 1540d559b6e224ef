use crate::{ReservedThreads, ThreadControl, ThreadId, ThreadList};

/// Suspends every thread of the process except the calling thread and the
/// reserved threads for as long as it is alive.
///
/// Exactly the threads that were successfully suspended are resumed when the
/// guard is dropped, regardless of what happened in between.
pub struct SuspendedEnvironment<'a> {
    control: &'a dyn ThreadControl,
    threads: ThreadList,
    suspended: ThreadList,
}

impl<'a> SuspendedEnvironment<'a> {
    pub fn suspend(control: &'a dyn ThreadControl, reserved: &ReservedThreads) -> Self {
        crate::debug_print!("suspending environment");

        let mut threads = ThreadList::new();
        if let Err(err) = control.enumerate(&mut threads) {
            // Proceed with whatever was enumerated before the failure
            log::warn!("failed to enumerate threads: {err}");
        }

        let current = control.current_thread();
        if !threads.contains(current) && !threads.push(current) {
            log::warn!("thread list is full, the current thread is not part of it");
        }

        let mut suspended = ThreadList::new();
        for &thread in threads.as_slice() {
            if thread == current || reserved.contains(thread) {
                continue;
            }

            match control.suspend(thread) {
                Ok(()) => {
                    // Both lists have the same capacity
                    suspended.push(thread);
                }
                Err(err) => log::warn!("failed to suspend thread {thread}: {err}"),
            }
        }

        Self {
            control,
            threads,
            suspended,
        }
    }

    /// Every thread in the process at the time of suspension
    #[inline]
    pub fn threads(&self) -> &[ThreadId] {
        self.threads.as_slice()
    }

    /// The threads this guard suspended and will resume
    #[inline]
    pub fn suspended(&self) -> &[ThreadId] {
        self.suspended.as_slice()
    }

    #[inline]
    pub fn control(&self) -> &'a dyn ThreadControl {
        self.control
    }
}

impl Drop for SuspendedEnvironment<'_> {
    fn drop(&mut self) {
        for &thread in self.suspended.as_slice() {
            if let Err(err) = self.control.resume(thread) {
                log::error!("failed to resume thread {thread}: {err}");
            }
        }

        crate::debug_print!("resumed environment");
    }
}
