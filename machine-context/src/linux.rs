use crate::{CpuState, Error, ThreadControl, ThreadId, ThreadList, threads::current_thread_id};
use std::{
    cell::UnsafeCell,
    fmt::Write as _,
    mem, ptr,
    sync::atomic::{AtomicI32, AtomicU8, Ordering},
    time::{Duration, Instant},
};

/// The maximum number of threads that can be parked at the same time
const MAX_PARKED: usize = 256;

/// How long a thread has to acknowledge a suspension request
const SUSPEND_TIMEOUT: Duration = Duration::from_millis(100);

const FREE: u8 = 0;
/// A suspender owns the slot
const CLAIMED: u8 = 1;
/// The signal has been sent, waiting for the thread
const REQUESTED: u8 = 2;
/// The target thread owns the slot while it stores its registers
const CAPTURING: u8 = 3;
const PARKED: u8 = 4;
const RELEASED: u8 = 5;

struct Slot {
    tid: AtomicI32,
    state: AtomicU8,
    cpu: UnsafeCell<CpuState>,
}

// SAFETY: `cpu` is written only by the parked thread while the slot is in the
// `CAPTURING` state, and read only once it has moved to `PARKED`
unsafe impl Sync for Slot {}

impl Slot {
    const fn new() -> Self {
        Self {
            tid: AtomicI32::new(0),
            state: AtomicU8::new(FREE),
            cpu: UnsafeCell::new(CpuState::zeroed()),
        }
    }
}

static SLOTS: [Slot; MAX_PARKED] = [const { Slot::new() }; MAX_PARKED];

struct Installed {
    signal: i32,
    previous: libc::sigaction,
    users: usize,
}

unsafe impl Send for Installed {}

static INSTALLED: parking_lot::Mutex<Option<Installed>> = parking_lot::const_mutex(None);

/// Suspends threads by sending them a signal whose handler records the
/// thread's registers and then parks it until it is resumed.
///
/// The handler is shared by every instance and is uninstalled, restoring the
/// previous disposition, when the last instance is dropped.
pub struct SignalThreadControl {
    signal: i32,
}

impl SignalThreadControl {
    /// The signal used by [`crate::platform_thread_control`]
    pub const DEFAULT_SIGNAL: i32 = libc::SIGUSR2;

    /// Installs the park handler for `signal`
    pub fn install(signal: i32) -> Result<Self, Error> {
        let mut installed = INSTALLED.lock();

        match &mut *installed {
            Some(existing) if existing.signal == signal => {
                existing.users += 1;
                return Ok(Self { signal });
            }
            Some(existing) => return Err(Error::SignalInUse(existing.signal)),
            None => {}
        }

        // SAFETY: syscalls
        unsafe {
            let mut sa: libc::sigaction = mem::zeroed();
            libc::sigemptyset(&mut sa.sa_mask);
            sa.sa_sigaction = park_handler as usize;
            sa.sa_flags = libc::SA_ONSTACK | libc::SA_SIGINFO | libc::SA_RESTART;

            let mut previous = mem::zeroed();
            if libc::sigaction(signal, &sa, &mut previous) == -1 {
                return Err(std::io::Error::last_os_error().into());
            }

            *installed = Some(Installed {
                signal,
                previous,
                users: 1,
            });
        }

        Ok(Self { signal })
    }

    #[inline]
    pub fn signal(&self) -> i32 {
        self.signal
    }
}

impl Drop for SignalThreadControl {
    fn drop(&mut self) {
        let mut installed = INSTALLED.lock();
        let Some(existing) = &mut *installed else {
            return;
        };

        existing.users -= 1;
        if existing.users == 0 {
            // SAFETY: syscall
            unsafe {
                libc::sigaction(existing.signal, &existing.previous, ptr::null_mut());
            }
            *installed = None;
        }
    }
}

fn find_slot(thread: ThreadId, state: u8) -> Option<&'static Slot> {
    let tid = i32::try_from(thread).ok()?;
    SLOTS
        .iter()
        .find(|slot| slot.tid.load(Ordering::Acquire) == tid && slot.state.load(Ordering::Acquire) == state)
}

/// Returns a claimed slot to the free list
fn free_slot(slot: &Slot) {
    slot.tid.store(0, Ordering::Release);
    slot.state.store(FREE, Ordering::Release);
}

impl ThreadControl for SignalThreadControl {
    fn current_thread(&self) -> ThreadId {
        current_thread_id()
    }

    fn enumerate(&self, threads: &mut ThreadList) -> Result<(), Error> {
        // SAFETY: syscall
        let fd = unsafe {
            libc::open(
                c"/proc/self/task".as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let mut buf = [0u8; 4096];
        let mut dropped = 0;

        let result = loop {
            // SAFETY: syscall, the kernel writes at most `buf.len()` bytes
            let read = unsafe { libc::syscall(libc::SYS_getdents64, fd, buf.as_mut_ptr(), buf.len()) };
            if read < 0 {
                break Err(std::io::Error::last_os_error().into());
            }
            if read == 0 {
                break Ok(());
            }

            let entries = &buf[..read as usize];
            let mut offset = 0;

            // struct linux_dirent64 { u64 ino; i64 off; u16 reclen; u8 type; char name[]; }
            while offset + 19 <= entries.len() {
                let reclen = u16::from_ne_bytes([entries[offset + 16], entries[offset + 17]]) as usize;
                if reclen == 0 || offset + reclen > entries.len() {
                    break;
                }

                let name = &entries[offset + 19..offset + reclen];
                let name = name.split(|b| *b == 0).next().unwrap_or_default();

                // Skips . and ..
                if let Some(tid) = std::str::from_utf8(name).ok().and_then(|s| s.parse::<ThreadId>().ok()) {
                    if !threads.push(tid) {
                        dropped += 1;
                    }
                }

                offset += reclen;
            }
        };

        // SAFETY: syscall
        unsafe { libc::close(fd) };

        if dropped > 0 {
            log::warn!("thread list is full, dropped {dropped} threads");
        }

        result
    }

    fn suspend(&self, thread: ThreadId) -> Result<(), Error> {
        let tid = i32::try_from(thread).map_err(|_e| Error::Unsupported)?;
        if thread == self.current_thread() {
            return Err(Error::Unsupported);
        }

        let slot = SLOTS
            .iter()
            .find(|slot| {
                slot.state
                    .compare_exchange(FREE, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })
            .ok_or(Error::NoFreeSlot)?;

        slot.tid.store(tid, Ordering::Release);
        slot.state.store(REQUESTED, Ordering::Release);

        // SAFETY: syscalls
        let sent = unsafe { libc::syscall(libc::SYS_tgkill, libc::getpid(), tid, self.signal) };
        if sent != 0 {
            let err = std::io::Error::last_os_error();
            if slot
                .state
                .compare_exchange(REQUESTED, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                free_slot(slot);
            }
            return Err(err.into());
        }

        let start = Instant::now();
        loop {
            match slot.state.load(Ordering::Acquire) {
                PARKED => {
                    crate::debug_print!("thread parked");
                    return Ok(());
                }
                REQUESTED if start.elapsed() > SUSPEND_TIMEOUT => {
                    // Reclaim the slot unless the thread picked it up at the
                    // last moment, in which case it will park shortly
                    if slot
                        .state
                        .compare_exchange(REQUESTED, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        free_slot(slot);
                        return Err(Error::SuspendTimeout(thread));
                    }
                }
                _ => {}
            }

            std::thread::yield_now();
        }
    }

    fn resume(&self, thread: ThreadId) -> Result<(), Error> {
        let slot = find_slot(thread, PARKED).ok_or(Error::NotSuspended(thread))?;
        slot.state
            .compare_exchange(PARKED, RELEASED, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_state| Error::NotSuspended(thread))?;
        Ok(())
    }

    fn capture(&self, thread: ThreadId, cpu: &mut CpuState) -> bool {
        let Some(slot) = find_slot(thread, PARKED) else {
            return false;
        };

        // SAFETY: the registers are not written again while the thread is parked
        *cpu = unsafe { *slot.cpu.get() };
        true
    }

    fn thread_name<'b>(&self, thread: ThreadId, buf: &'b mut [u8]) -> Option<&'b str> {
        let mut path = StackPath::default();
        write!(&mut path, "/proc/self/task/{thread}/comm\0").ok()?;

        // SAFETY: syscalls, the path is NUL terminated
        let read = unsafe {
            let fd = libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC);
            if fd < 0 {
                return None;
            }
            let read = libc::read(fd, buf.as_mut_ptr().cast(), buf.len());
            libc::close(fd);
            read
        };

        if read <= 0 {
            return None;
        }

        let name = &buf[..read as usize];
        let name = name.strip_suffix(b"\n").unwrap_or(name);
        std::str::from_utf8(name).ok().filter(|name| !name.is_empty())
    }
}

/// A path formatted on the stack
struct StackPath {
    buf: [u8; 64],
    len: usize,
}

impl Default for StackPath {
    fn default() -> Self {
        Self {
            buf: [0; 64],
            len: 0,
        }
    }
}

impl StackPath {
    fn as_ptr(&self) -> *const libc::c_char {
        self.buf.as_ptr().cast()
    }
}

impl std::fmt::Write for StackPath {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let end = self.len + s.len();
        if end > self.buf.len() {
            return Err(std::fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

#[inline]
unsafe fn errno_location() -> *mut libc::c_int {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "android")] {
            unsafe { libc::__errno() }
        } else {
            unsafe { libc::__errno_location() }
        }
    }
}

unsafe extern "C" fn park_handler(_sig: libc::c_int, _info: *mut libc::siginfo_t, uc: *mut libc::c_void) {
    // SAFETY: we're in a signal handler, only async signal safe calls are made
    unsafe {
        let saved_errno = *errno_location();
        let tid = libc::syscall(libc::SYS_gettid) as i32;

        for slot in &SLOTS {
            if slot.tid.load(Ordering::Acquire) != tid {
                continue;
            }
            if slot
                .state
                .compare_exchange(REQUESTED, CAPTURING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            // The slot may have been recycled between the two checks
            if slot.tid.load(Ordering::Acquire) != tid {
                slot.state.store(REQUESTED, Ordering::Release);
                continue;
            }

            *slot.cpu.get() = capture_registers(uc);
            slot.state.store(PARKED, Ordering::Release);

            while slot.state.load(Ordering::Acquire) != RELEASED {
                libc::sched_yield();
            }

            free_slot(slot);
            break;
        }

        *errno_location() = saved_errno;
    }
}

unsafe fn capture_registers(uc: *mut libc::c_void) -> CpuState {
    if uc.is_null() {
        return CpuState::zeroed();
    }

    // SAFETY: the kernel passes a valid ucontext_t to SA_SIGINFO handlers
    unsafe { CpuState::from_ucontext(&*uc.cast::<libc::ucontext_t>()) }
}
