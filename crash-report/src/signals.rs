//! Human readable names for the signals and mach exceptions written in the
//! error section of a report.

/// The fatal signals a fault source is expected to deliver
pub const FATAL_SIGNALS: &[i32] = &[
    libc::SIGABRT,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGILL,
    libc::SIGPIPE,
    libc::SIGSEGV,
    libc::SIGSYS,
    libc::SIGTRAP,
];

pub fn signal_name(signum: i32) -> Option<&'static str> {
    Some(match signum {
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGILL => "SIGILL",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGSYS => "SIGSYS",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGKILL => "SIGKILL",
        libc::SIGTERM => "SIGTERM",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGUSR2 => "SIGUSR2",
        _ => return None,
    })
}

/// The name of a signal's `si_code`, which depends on the signal
pub fn signal_code_name(signum: i32, code: i32) -> Option<&'static str> {
    let name = match (signum, code) {
        (libc::SIGILL, 1) => "ILL_ILLOPC",
        (libc::SIGILL, 2) => "ILL_ILLOPN",
        (libc::SIGILL, 3) => "ILL_ILLADR",
        (libc::SIGILL, 4) => "ILL_ILLTRP",
        (libc::SIGILL, 5) => "ILL_PRVOPC",
        (libc::SIGILL, 6) => "ILL_PRVREG",
        (libc::SIGILL, 7) => "ILL_COPROC",
        (libc::SIGILL, 8) => "ILL_BADSTK",
        (libc::SIGFPE, 1..=8) => fpe_name(code),
        (libc::SIGSEGV, 1) => "SEGV_MAPERR",
        (libc::SIGSEGV, 2) => "SEGV_ACCERR",
        (libc::SIGBUS, 1) => "BUS_ADRALN",
        (libc::SIGBUS, 2) => "BUS_ADRERR",
        (libc::SIGBUS, 3) => "BUS_OBJERR",
        (libc::SIGTRAP, 1) => "TRAP_BRKPT",
        (libc::SIGTRAP, 2) => "TRAP_TRACE",
        _ => return generic_code_name(code),
    };
    Some(name)
}

// The integer and float codes are numbered differently on Apple platforms
fn fpe_name(code: i32) -> &'static str {
    cfg_if::cfg_if! {
        if #[cfg(target_vendor = "apple")] {
            match code {
                1 => "FPE_FLTDIV",
                2 => "FPE_FLTOVF",
                3 => "FPE_FLTUND",
                4 => "FPE_FLTRES",
                5 => "FPE_FLTINV",
                6 => "FPE_FLTSUB",
                7 => "FPE_INTDIV",
                _ => "FPE_INTOVF",
            }
        } else {
            match code {
                1 => "FPE_INTDIV",
                2 => "FPE_INTOVF",
                3 => "FPE_FLTDIV",
                4 => "FPE_FLTOVF",
                5 => "FPE_FLTUND",
                6 => "FPE_FLTRES",
                7 => "FPE_FLTINV",
                _ => "FPE_FLTSUB",
            }
        }
    }
}

fn generic_code_name(code: i32) -> Option<&'static str> {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            Some(match code {
                0 => "SI_USER",
                0x80 => "SI_KERNEL",
                -1 => "SI_QUEUE",
                -2 => "SI_TIMER",
                -3 => "SI_MESGQ",
                -4 => "SI_ASYNCIO",
                -6 => "SI_TKILL",
                _ => return None,
            })
        } else {
            Some(match code {
                0 | 0x10001 => "SI_USER",
                0x10002 => "SI_QUEUE",
                0x10003 => "SI_TIMER",
                0x10004 => "SI_ASYNCIO",
                0x10005 => "SI_MESGQ",
                _ => return None,
            })
        }
    }
}

pub fn mach_exception_name(exception: i32) -> Option<&'static str> {
    Some(match exception {
        1 => "EXC_BAD_ACCESS",
        2 => "EXC_BAD_INSTRUCTION",
        3 => "EXC_ARITHMETIC",
        4 => "EXC_EMULATION",
        5 => "EXC_SOFTWARE",
        6 => "EXC_BREAKPOINT",
        7 => "EXC_SYSCALL",
        8 => "EXC_MACH_SYSCALL",
        9 => "EXC_RPC_ALERT",
        10 => "EXC_CRASH",
        11 => "EXC_RESOURCE",
        12 => "EXC_GUARD",
        13 => "EXC_CORPSE_NOTIFY",
        _ => return None,
    })
}

/// The name of a `kern_return_t`, used for the code of bad access exceptions
pub fn kern_return_name(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "KERN_SUCCESS",
        1 => "KERN_INVALID_ADDRESS",
        2 => "KERN_PROTECTION_FAILURE",
        3 => "KERN_NO_SPACE",
        4 => "KERN_INVALID_ARGUMENT",
        5 => "KERN_FAILURE",
        6 => "KERN_RESOURCE_SHORTAGE",
        7 => "KERN_NOT_RECEIVER",
        8 => "KERN_NO_ACCESS",
        9 => "KERN_MEMORY_FAILURE",
        10 => "KERN_MEMORY_ERROR",
        11 => "KERN_ALREADY_IN_SET",
        12 => "KERN_NOT_IN_SET",
        13 => "KERN_NAME_EXISTS",
        14 => "KERN_ABORTED",
        15 => "KERN_INVALID_NAME",
        16 => "KERN_INVALID_TASK",
        17 => "KERN_INVALID_RIGHT",
        18 => "KERN_INVALID_VALUE",
        50 => "KERN_CODESIGN_ERROR",
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(signal_name(libc::SIGSEGV), Some("SIGSEGV"));
        assert_eq!(signal_name(0), None);
        assert_eq!(signal_code_name(libc::SIGSEGV, 1), Some("SEGV_MAPERR"));
        assert_eq!(signal_code_name(libc::SIGABRT, 0), Some("SI_USER"));
        assert_eq!(mach_exception_name(1), Some("EXC_BAD_ACCESS"));
        assert_eq!(kern_return_name(2), Some("KERN_PROTECTION_FAILURE"));

        for &sig in FATAL_SIGNALS {
            assert!(signal_name(sig).is_some());
        }
    }
}
