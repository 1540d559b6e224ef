//! Ways of crashing the current process, each one raising a specific signal
//! the way a real fault would

#![allow(unsafe_code)]

use std::arch::asm;

/// [`libc::SIGABRT`]
pub fn abort() -> ! {
    std::process::abort();
}

/// [`libc::SIGSEGV`] by reading address 0
///
/// The load is done in assembly, dereferencing a null pointer in Rust is
/// caught by debug assertions and panics instead of faulting.
///
/// # Safety
///
/// Not safe. It is intended to crash.
pub unsafe fn segfault() {
    let address = std::hint::black_box(0usize);
    let value: usize;

    unsafe {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "x86_64")] {
                asm!(
                    "mov {value}, qword ptr [{address}]",
                    address = in(reg) address,
                    value = out(reg) value,
                    options(nostack, readonly),
                );
            } else if #[cfg(target_arch = "aarch64")] {
                asm!(
                    "ldr {value}, [{address}]",
                    address = in(reg) address,
                    value = out(reg) value,
                    options(nostack, readonly),
                );
            } else {
                let _ = address;
                libc::raise(libc::SIGSEGV);
                value = 0;
            }
        }
    }

    println!("read address 0: {value}");
}

/// [`libc::SIGFPE`] by dividing by zero
///
/// # Safety
///
/// Not safe. It is intended to crash.
pub unsafe fn floating_point_exception() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            let quotient: u32;
            unsafe {
                asm!(
                    "mov eax, 1",
                    "cdq",
                    "mov {div:e}, 0",
                    "idiv {div:e}",
                    div = out(reg) _,
                    out("eax") quotient,
                    out("edx") _,
                );
            }
            println!("divided by zero: {quotient}");
        } else {
            // Integer division by zero doesn't trap on arm
            unsafe {
                libc::raise(libc::SIGFPE);
            }
        }
    }
}

/// [`libc::SIGILL`]
///
/// # Safety
///
/// Not safe. It is intended to crash.
pub unsafe fn illegal_instruction() {
    unsafe {
        cfg_if::cfg_if! {
            if #[cfg(any(target_arch = "x86_64", target_arch = "x86"))] {
                asm!("ud2");
            } else if #[cfg(target_arch = "aarch64")] {
                asm!("udf #0");
            } else {
                libc::raise(libc::SIGILL);
            }
        }
    }
}

/// [`libc::SIGTRAP`]
///
/// # Safety
///
/// Not safe. It is intended to crash.
pub unsafe fn trap() {
    unsafe {
        cfg_if::cfg_if! {
            if #[cfg(any(target_arch = "x86_64", target_arch = "x86"))] {
                asm!("int3");
            } else if #[cfg(target_arch = "aarch64")] {
                asm!("brk #1");
            } else {
                libc::raise(libc::SIGTRAP);
            }
        }
    }
}

/// [`libc::SIGBUS`] by reading past the end of an empty file mapped into
/// memory, `path` is truncated
///
/// # Safety
///
/// Not safe. It is intended to crash.
pub unsafe fn bus(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_nul| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;

    unsafe {
        let fd = libc::open(
            path.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
            0o666,
        );
        if fd == -1 {
            return Err(std::io::Error::last_os_error());
        }

        let mapping = libc::mmap(
            std::ptr::null_mut(),
            128,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );
        if mapping == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }

        let byte = std::ptr::read_volatile(mapping.cast::<u8>().add(1));
        println!("read past the end of the file: {byte}");
    }

    Ok(())
}
