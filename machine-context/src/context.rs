use crate::{
    CpuState, DlSymbolicator, FrameWalkCursor, MemoryReader, StackCursor,
    ThreadControl, ThreadId,
};

/// The maximum number of threads recorded in a crashed context, any excess
/// is dropped
pub const MAX_CAPTURED_THREADS: usize = 256;

/// A fixed capacity list of thread ids, usable without allocating
#[derive(Clone)]
pub struct ThreadList {
    threads: [ThreadId; MAX_CAPTURED_THREADS],
    len: usize,
}

impl Default for ThreadList {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadList {
    pub const fn new() -> Self {
        Self {
            threads: [0; MAX_CAPTURED_THREADS],
            len: 0,
        }
    }

    /// Appends a thread, returning false if the list is full
    #[inline]
    pub fn push(&mut self, thread: ThreadId) -> bool {
        if self.len == MAX_CAPTURED_THREADS {
            return false;
        }

        self.threads[self.len] = thread;
        self.len += 1;
        true
    }

    #[inline]
    pub fn as_slice(&self) -> &[ThreadId] {
        &self.threads[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn contains(&self, thread: ThreadId) -> bool {
        self.as_slice().contains(&thread)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl std::fmt::Debug for ThreadList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// The captured state of a single thread.
///
/// The context of the thread that crashed additionally holds the list of every
/// thread in the process at the time of the crash.
#[derive(Clone, Debug)]
pub struct MachineContext {
    pub thread: ThreadId,
    /// This is the context of the thread that caused the event
    pub is_crashed_context: bool,
    /// The thread is the one writing the report
    pub is_current_thread: bool,
    /// The registers were delivered by the kernel, eg. to a signal handler
    pub is_signal_context: bool,
    /// Only determined for crashed contexts
    pub is_stack_overflow: bool,
    pub cpu: CpuState,
    pub threads: ThreadList,
}

impl MachineContext {
    fn new(thread: ThreadId, is_crashed_context: bool, is_current_thread: bool) -> Self {
        Self {
            thread,
            is_crashed_context,
            is_current_thread,
            is_signal_context: false,
            is_stack_overflow: false,
            cpu: CpuState::zeroed(),
            threads: ThreadList::new(),
        }
    }

    /// Creates the crashed context of a thread whose registers were handed
    /// to a signal handler
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn from_signal(uc: &libc::ucontext_t, thread: ThreadId) -> Self {
        Self::from_cpu_state(thread, CpuState::from_ucontext(uc), true)
    }

    /// Creates a context from registers obtained by some other means, which
    /// are treated the same as registers delivered by the kernel
    pub fn from_cpu_state(thread: ThreadId, cpu: CpuState, is_crashed_context: bool) -> Self {
        let mut ctx = Self::new(thread, is_crashed_context, true);
        ctx.is_signal_context = true;
        ctx.cpu = cpu;
        ctx
    }

    /// Creates the context of an arbitrary thread, which must already be
    /// suspended if it is not the calling thread
    pub fn for_thread(control: &dyn ThreadControl, thread: ThreadId, is_crashed: bool) -> Self {
        let is_current = thread == control.current_thread();
        let mut ctx = Self::new(thread, is_crashed, is_current);
        if !is_current {
            ctx.capture_cpu_state(control);
        }
        ctx
    }

    /// Creates the context of the calling thread, which has no usable CPU
    /// state as its registers change as the report is being written
    pub fn for_current_thread(control: &dyn ThreadControl, is_crashed: bool) -> Self {
        Self::new(control.current_thread(), is_crashed, true)
    }

    /// Fills in the registers of a suspended thread
    pub fn capture_cpu_state(&mut self, control: &dyn ThreadControl) -> bool {
        if control.capture(self.thread, &mut self.cpu) {
            return true;
        }

        log::debug!("unable to capture the registers of thread {}", self.thread);
        false
    }

    /// Whether the registers of this context reflect the thread's actual state
    #[inline]
    pub fn can_have_cpu_state(&self) -> bool {
        !self.is_current_thread || self.is_signal_context
    }

    #[inline]
    pub fn has_valid_exception_registers(&self) -> bool {
        self.can_have_cpu_state() && self.is_crashed_context
    }

    /// A stack is considered overflowed if a frame pointer walk doesn't reach
    /// the base of the stack before the maximum depth
    pub fn detect_stack_overflow(&mut self, memory: &dyn MemoryReader) -> bool {
        if !self.can_have_cpu_state() {
            return false;
        }

        let mut cursor = FrameWalkCursor::new(&self.cpu, memory, &DlSymbolicator);
        while cursor.advance() {}
        self.is_stack_overflow = cursor.has_given_up();
        self.is_stack_overflow
    }

    /// Records the threads of the process, threads past the capacity are
    /// dropped
    pub fn set_threads(&mut self, threads: &[ThreadId]) {
        self.threads.clear();
        for &thread in threads {
            if !self.threads.push(thread) {
                log::warn!(
                    "dropping {} threads past the capacity of {MAX_CAPTURED_THREADS}",
                    threads.len() - MAX_CAPTURED_THREADS
                );
                break;
            }
        }
    }

    #[inline]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    #[inline]
    pub fn index_of_thread(&self, thread: ThreadId) -> Option<usize> {
        self.threads.as_slice().iter().position(|t| *t == thread)
    }
}
