use crate::{EnabledFlag, Error, Monitor, MonitorKind};
use crash_report::{CrashEvent, MemoryStats, SystemFacts};
use std::{
    ffi::CStr,
    sync::{Arc, OnceLock},
};

/// Identity of the application, which can't be discovered on every platform
#[derive(Clone, Debug, Default)]
pub struct AppIdentity {
    pub bundle_id: Option<String>,
    pub bundle_name: Option<String>,
    pub bundle_version: Option<String>,
    pub bundle_short_version: Option<String>,
    pub app_id: Option<String>,
}

/// Gathers facts about the system and process the first time it is enabled
/// and adds them to every event.
///
/// Only the memory statistics are refreshed when an event is handled.
#[derive(Debug, Default)]
pub struct SystemMonitor {
    enabled: EnabledFlag,
    identity: AppIdentity,
    facts: OnceLock<Arc<SystemFacts>>,
}

impl SystemMonitor {
    pub fn with_identity(identity: AppIdentity) -> Self {
        Self {
            identity,
            ..Default::default()
        }
    }

    /// The gathered facts, `None` until the monitor has been enabled
    pub fn facts(&self) -> Option<Arc<SystemFacts>> {
        self.facts.get().cloned()
    }
}

impl Monitor for SystemMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::SYSTEM
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.facts
                .get_or_init(|| Arc::new(gather(&self.identity)));
        }
        self.enabled.set(enabled);
    }

    fn add_contextual_info(&self, event: &mut CrashEvent<'_>) -> Result<(), Error> {
        event.system = self.facts.get().cloned();
        event.memory = memory_stats();
        Ok(())
    }
}

fn gather(identity: &AppIdentity) -> SystemFacts {
    let uname = Uname::read();
    let exe = std::env::current_exe().ok();
    let executable_name = exe
        .as_deref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned());
    let (cpu_type, cpu_subtype) = cpu_type();
    let memory = memory_stats();

    SystemFacts {
        system_name: uname.sysname,
        system_version: uname.release,
        machine: uname.machine,
        model: model(),
        kernel_version: uname.version,
        os_version: os_version(),
        is_jailbroken: false,
        boot_time: boot_time().and_then(format_time),
        app_start_time: format_time(chrono::Utc::now().timestamp()),
        executable_path: exe.as_deref().map(|p| p.display().to_string()),
        process_name: process_name().or_else(|| executable_name.clone()),
        executable_name,
        bundle_id: identity.bundle_id.clone(),
        bundle_name: identity.bundle_name.clone(),
        bundle_version: identity.bundle_version.clone(),
        bundle_short_version: identity.bundle_short_version.clone(),
        app_id: identity.app_id.clone(),
        cpu_arch: Some(std::env::consts::ARCH.to_owned()),
        cpu_type,
        cpu_subtype,
        // The binary always matches the process architecture
        binary_cpu_type: cpu_type,
        binary_cpu_subtype: cpu_subtype,
        time_zone: time_zone(),
        process_id: i64::from(std::process::id()),
        // SAFETY: syscall
        parent_process_id: i64::from(unsafe { libc::getppid() }),
        device_app_hash: None,
        build_type: Some(if cfg!(debug_assertions) { "debug" } else { "release" }.to_owned()),
        storage_size: storage_size(),
        memory_size: memory.size,
    }
}

/// Formats unix seconds as an ISO 8601 UTC timestamp
fn format_time(secs: i64) -> Option<String> {
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

fn time_zone() -> Option<String> {
    std::env::var("TZ")
        .ok()
        .filter(|tz| !tz.is_empty())
        .or_else(|| Some(chrono::Local::now().format("%:z").to_string()))
}

/// Mach cpu type and subtype of the running architecture
fn cpu_type() -> (i64, i64) {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            (0x0100_0007, 3)
        } else if #[cfg(target_arch = "aarch64")] {
            (0x0100_000c, 0)
        } else if #[cfg(target_arch = "x86")] {
            (7, 3)
        } else if #[cfg(target_arch = "arm")] {
            (12, 9)
        } else {
            (0, 0)
        }
    }
}

#[derive(Default)]
struct Uname {
    sysname: Option<String>,
    release: Option<String>,
    version: Option<String>,
    machine: Option<String>,
}

impl Uname {
    fn read() -> Self {
        // SAFETY: syscall, the fields are NUL terminated on success
        unsafe {
            let mut uts: libc::utsname = std::mem::zeroed();
            if libc::uname(&mut uts) != 0 {
                log::warn!("uname failed: {}", std::io::Error::last_os_error());
                return Self::default();
            }

            let field = |f: &[libc::c_char]| {
                Some(CStr::from_ptr(f.as_ptr()).to_string_lossy().into_owned())
            };

            Self {
                sysname: field(&uts.sysname),
                release: field(&uts.release),
                version: field(&uts.version),
                machine: field(&uts.machine),
            }
        }
    }
}

fn storage_size() -> u64 {
    // SAFETY: syscall
    unsafe {
        let mut stats: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c"/".as_ptr(), &mut stats) != 0 {
            return 0;
        }
        (stats.f_blocks as u64).saturating_mul(stats.f_frsize as u64)
    }
}

fn physical_memory() -> u64 {
    // SAFETY: syscalls
    let (pages, page_size) =
        unsafe { (libc::sysconf(libc::_SC_PHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };
    if pages < 0 || page_size < 0 {
        return 0;
    }
    (pages as u64).saturating_mul(page_size as u64)
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// Only does syscalls, so it can be used while handling an event
        fn memory_stats() -> MemoryStats {
            let mut stats = MemoryStats {
                size: physical_memory(),
                ..Default::default()
            };

            // SAFETY: syscall
            unsafe {
                let mut info: libc::sysinfo = std::mem::zeroed();
                if libc::sysinfo(&mut info) == 0 {
                    let unit = u64::from(info.mem_unit.max(1));
                    stats.free = (info.freeram as u64).saturating_mul(unit);
                    stats.usable = (info.freeram as u64)
                        .saturating_add(info.bufferram as u64)
                        .saturating_mul(unit);
                }
            }

            stats
        }

        fn boot_time() -> Option<i64> {
            let stat = std::fs::read_to_string("/proc/stat").ok()?;
            stat.lines()
                .find_map(|line| line.strip_prefix("btime "))
                .and_then(|secs| secs.trim().parse().ok())
        }

        fn os_version() -> Option<String> {
            let release = std::fs::read_to_string("/etc/os-release").ok()?;
            release
                .lines()
                .find_map(|line| line.strip_prefix("PRETTY_NAME="))
                .map(|name| name.trim_matches('"').to_owned())
        }

        fn process_name() -> Option<String> {
            std::fs::read_to_string("/proc/self/comm")
                .ok()
                .map(|comm| comm.trim_end().to_owned())
        }

        fn model() -> Option<String> {
            std::fs::read_to_string("/sys/devices/virtual/dmi/id/product_name")
                .ok()
                .map(|name| name.trim_end().to_owned())
                .filter(|name| !name.is_empty())
        }
    } else if #[cfg(target_os = "macos")] {
        #[allow(deprecated)]
        fn memory_stats() -> MemoryStats {
            let mut stats = MemoryStats {
                size: physical_memory(),
                ..Default::default()
            };

            // SAFETY: syscalls, the count is the size of the buffer in integers
            unsafe {
                let mut vm: libc::vm_statistics64 = std::mem::zeroed();
                let mut count = libc::HOST_VM_INFO64_COUNT;
                if libc::host_statistics64(
                    libc::mach_host_self(),
                    libc::HOST_VM_INFO64,
                    (&mut vm as *mut libc::vm_statistics64).cast(),
                    &mut count,
                ) == libc::KERN_SUCCESS
                {
                    let page_size = libc::sysconf(libc::_SC_PAGESIZE).max(0) as u64;
                    let pages = |n: u64| n.saturating_mul(page_size);
                    stats.free = pages(u64::from(vm.free_count));
                    stats.usable = pages(
                        u64::from(vm.free_count)
                            + u64::from(vm.active_count)
                            + u64::from(vm.inactive_count)
                            + u64::from(vm.wire_count),
                    );
                }
            }

            stats
        }

        fn sysctl_string(name: &CStr) -> Option<String> {
            let mut buf = [0u8; 256];
            let mut len = buf.len();
            // SAFETY: syscall, the buffer is the size we pass
            let res = unsafe {
                libc::sysctlbyname(
                    name.as_ptr(),
                    buf.as_mut_ptr().cast(),
                    &mut len,
                    std::ptr::null_mut(),
                    0,
                )
            };
            if res != 0 {
                return None;
            }
            CStr::from_bytes_until_nul(&buf[..len])
                .ok()
                .map(|s| s.to_string_lossy().into_owned())
        }

        fn boot_time() -> Option<i64> {
            let mut tv: libc::timeval = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<libc::timeval>();
            // SAFETY: syscall, the buffer is the size we pass
            let res = unsafe {
                libc::sysctlbyname(
                    c"kern.boottime".as_ptr(),
                    (&mut tv as *mut libc::timeval).cast(),
                    &mut len,
                    std::ptr::null_mut(),
                    0,
                )
            };
            (res == 0).then_some(tv.tv_sec)
        }

        fn os_version() -> Option<String> {
            sysctl_string(c"kern.osversion")
        }

        fn process_name() -> Option<String> {
            None
        }

        fn model() -> Option<String> {
            sysctl_string(c"hw.model")
        }
    } else {
        fn memory_stats() -> MemoryStats {
            MemoryStats {
                size: physical_memory(),
                ..Default::default()
            }
        }

        fn boot_time() -> Option<i64> {
            None
        }

        fn os_version() -> Option<String> {
            None
        }

        fn process_name() -> Option<String> {
            None
        }

        fn model() -> Option<String> {
            None
        }
    }
}
