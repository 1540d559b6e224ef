use machine_context::MachineContext;
use std::sync::Arc;
use uuid::Uuid;

/// The signal that triggered an event
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SignalInfo {
    pub signum: i32,
    /// `si_code`
    pub code: i32,
}

/// The mach exception that triggered an event
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MachInfo {
    pub exception: i32,
    pub code: i64,
    pub subcode: i64,
}

/// An exception reported by user code rather than detected by a monitor
#[derive(Copy, Clone, Debug, Default)]
pub struct UserReport<'a> {
    pub name: &'a str,
    pub language: Option<&'a str>,
    pub line_of_code: Option<&'a str>,
    /// A JSON document describing the backtrace in terms of the reporting
    /// language, added verbatim
    pub custom_backtrace_json: Option<&'a str>,
}

/// What caused an event, each variant carrying only what is relevant to it
#[derive(Copy, Clone, Debug)]
pub enum EventKind<'a> {
    Signal(SignalInfo),
    /// A mach exception along with the signal it maps to
    Mach { mach: MachInfo, signal: SignalInfo },
    CppException { name: &'a str },
    /// An exception of a managed language runtime
    LanguageException {
        name: &'a str,
        user_info: Option<&'a str>,
    },
    Deadlock,
    User(UserReport<'a>),
    /// The remaining variants identify monitors that only contribute
    /// information and never raise events themselves
    System,
    ApplicationState,
    Zombie,
}

/// Facts about the system and process, gathered once before any crash
#[derive(Clone, Debug, Default)]
pub struct SystemFacts {
    pub system_name: Option<String>,
    pub system_version: Option<String>,
    pub machine: Option<String>,
    pub model: Option<String>,
    pub kernel_version: Option<String>,
    pub os_version: Option<String>,
    pub is_jailbroken: bool,
    pub boot_time: Option<String>,
    pub app_start_time: Option<String>,
    pub executable_path: Option<String>,
    pub executable_name: Option<String>,
    pub bundle_id: Option<String>,
    pub bundle_name: Option<String>,
    pub bundle_version: Option<String>,
    pub bundle_short_version: Option<String>,
    pub app_id: Option<String>,
    pub cpu_arch: Option<String>,
    pub cpu_type: i64,
    pub cpu_subtype: i64,
    pub binary_cpu_type: i64,
    pub binary_cpu_subtype: i64,
    pub time_zone: Option<String>,
    pub process_name: Option<String>,
    pub process_id: i64,
    pub parent_process_id: i64,
    pub device_app_hash: Option<String>,
    pub build_type: Option<String>,
    pub storage_size: u64,
    pub memory_size: u64,
}

/// Physical memory in bytes
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub size: u64,
    pub usable: u64,
    pub free: u64,
}

/// Application lifecycle counters, durations are in seconds
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AppStateSnapshot {
    pub is_active: bool,
    pub is_in_foreground: bool,
    pub launches_since_last_crash: i64,
    pub sessions_since_last_crash: i64,
    pub active_duration_since_last_crash: f64,
    pub background_duration_since_last_crash: f64,
    pub sessions_since_launch: i64,
    pub active_duration_since_launch: f64,
    pub background_duration_since_launch: f64,
}

/// The last exception object that was deallocated, as recorded by a runtime
/// integration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DanglingObject {
    pub address: usize,
    pub name: String,
    pub reason: String,
}

/// Everything that is written to a report about a single event.
///
/// The offending thread's context is borrowed exclusively for as long as the
/// event exists.
pub struct CrashEvent<'a> {
    pub id: Uuid,
    /// Seconds since the unix epoch
    pub timestamp: i64,
    pub kind: EventKind<'a>,
    /// The context of the thread that caused the event
    pub context: Option<&'a mut MachineContext>,
    /// Return addresses of the offending thread collected up front, used
    /// instead of walking the context's stack
    pub backtrace: Option<&'a [usize]>,
    pub fault_address: usize,
    pub reason: Option<&'a str>,
    pub requires_async_safety: bool,
    pub crashed_during_handling: bool,
    pub system: Option<Arc<SystemFacts>>,
    pub memory: MemoryStats,
    pub app_state: AppStateSnapshot,
    pub dangling: Option<Arc<DanglingObject>>,
}

impl<'a> CrashEvent<'a> {
    pub fn new(kind: EventKind<'a>) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64);

        Self {
            id: Uuid::new_v4(),
            timestamp,
            kind,
            context: None,
            backtrace: None,
            fault_address: 0,
            reason: None,
            requires_async_safety: false,
            crashed_during_handling: false,
            system: None,
            memory: MemoryStats::default(),
            app_state: AppStateSnapshot::default(),
            dangling: None,
        }
    }

    /// Creates an event for a fatal signal delivered to the thread of `context`
    pub fn signal(
        context: &'a mut MachineContext,
        signum: i32,
        code: i32,
        fault_address: usize,
    ) -> Self {
        let mut event = Self::new(EventKind::Signal(SignalInfo { signum, code }));
        event.context = Some(context);
        event.fault_address = fault_address;
        event
    }

    /// Creates an event for an exception reported by user code
    pub fn user(
        report: UserReport<'a>,
        reason: Option<&'a str>,
        context: &'a mut MachineContext,
        backtrace: &'a [usize],
    ) -> Self {
        let mut event = Self::new(EventKind::User(report));
        event.reason = reason;
        event.context = Some(context);
        event.backtrace = Some(backtrace);
        event
    }

    /// Creates an event for a thread that stopped responding
    pub fn deadlock(context: &'a mut MachineContext, reason: Option<&'a str>) -> Self {
        let mut event = Self::new(EventKind::Deadlock);
        event.context = Some(context);
        event.reason = reason;
        event
    }

    #[inline]
    pub fn with_reason(mut self, reason: &'a str) -> Self {
        self.reason = Some(reason);
        self
    }

    /// User reported events are not fatal to the process
    #[inline]
    pub fn is_user_reported(&self) -> bool {
        matches!(self.kind, EventKind::User(_))
    }

    #[inline]
    pub fn signal_info(&self) -> Option<SignalInfo> {
        match self.kind {
            EventKind::Signal(signal) | EventKind::Mach { signal, .. } => Some(signal),
            _ => None,
        }
    }

    #[inline]
    pub fn process_name(&self) -> Option<&str> {
        self.system.as_ref()?.process_name.as_deref()
    }
}
