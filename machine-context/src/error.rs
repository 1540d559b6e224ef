use crate::ThreadId;

/// An error that can occur when enumerating or controlling threads
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O or other syscall failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The thread did not acknowledge the suspension request in time
    #[error("thread {0} did not park within the timeout")]
    SuspendTimeout(ThreadId),
    /// Resume or capture was requested for a thread that isn't suspended
    #[error("thread {0} is not suspended")]
    NotSuspended(ThreadId),
    /// Every suspension slot is occupied
    #[error("no free suspension slot is available")]
    NoFreeSlot,
    /// Thread suspension is already installed for a different signal
    #[error("thread suspension is already installed using signal {0}")]
    SignalInUse(i32),
    /// The operation is not possible on this platform or for this thread
    #[error("the operation is not supported")]
    Unsupported,
    /// A mach call failed
    #[cfg(target_os = "macos")]
    #[error("mach call failed with kern_return_t {0}")]
    Kern(i32),
}
