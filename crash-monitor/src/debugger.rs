/// Determines whether a debugger is attached to the process
pub trait DebuggerCheck: Send + Sync {
    fn is_being_traced(&self) -> bool;
}

impl<F> DebuggerCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_being_traced(&self) -> bool {
        self()
    }
}

/// Asks the kernel whether the process is being traced
#[derive(Copy, Clone, Default)]
pub struct ProcessDebuggerCheck;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        impl DebuggerCheck for ProcessDebuggerCheck {
            fn is_being_traced(&self) -> bool {
                match std::fs::read_to_string("/proc/self/status") {
                    Ok(status) => tracer_pid(&status).is_some_and(|pid| pid != 0),
                    Err(err) => {
                        log::warn!("unable to read /proc/self/status: {err}");
                        false
                    }
                }
            }
        }

        fn tracer_pid(status: &str) -> Option<u32> {
            status
                .lines()
                .find_map(|line| line.strip_prefix("TracerPid:"))
                .and_then(|pid| pid.trim().parse().ok())
        }
    } else if #[cfg(target_os = "macos")] {
        impl DebuggerCheck for ProcessDebuggerCheck {
            fn is_being_traced(&self) -> bool {
                const P_TRACED: libc::c_int = 0x0000_0800;

                let mut mib = [
                    libc::CTL_KERN,
                    libc::KERN_PROC,
                    libc::KERN_PROC_PID,
                    std::process::id() as libc::c_int,
                ];

                // SAFETY: syscall, the buffer is the size we pass
                unsafe {
                    let mut info: libc::kinfo_proc = std::mem::zeroed();
                    let mut size = std::mem::size_of::<libc::kinfo_proc>();
                    if libc::sysctl(
                        mib.as_mut_ptr(),
                        mib.len() as u32,
                        (&mut info as *mut libc::kinfo_proc).cast(),
                        &mut size,
                        std::ptr::null_mut(),
                        0,
                    ) != 0
                    {
                        log::warn!(
                            "unable to query the process flags: {}",
                            std::io::Error::last_os_error()
                        );
                        return false;
                    }

                    info.kp_proc.p_flag & P_TRACED != 0
                }
            }
        }
    } else {
        impl DebuggerCheck for ProcessDebuggerCheck {
            fn is_being_traced(&self) -> bool {
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn closures_are_checks() {
        let check: Box<dyn DebuggerCheck> = Box::new(|| true);
        assert!(check.is_being_traced());
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn parses_tracer_pid() {
        let status = "Name:\ttest\nState:\tR (running)\nTracerPid:\t1234\nUid:\t0\n";
        assert_eq!(tracer_pid(status), Some(1234));
        assert_eq!(tracer_pid("TracerPid:\t0\n"), Some(0));
        assert_eq!(tracer_pid("Name:\ttest\n"), None);

        // Whatever the answer, asking must not fail
        let _ = ProcessDebuggerCheck.is_being_traced();
    }
}
