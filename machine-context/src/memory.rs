const WORD: usize = std::mem::size_of::<usize>();

/// Granularity used when copying as much of a range as is readable
const COPY_CHUNK: usize = 4096;

/// Reads memory of the current process without faulting on bad addresses.
pub trait MemoryReader: Send + Sync {
    /// Copies `dst.len()` bytes starting at `src`, returning false if any
    /// part of the range could not be read
    fn copy(&self, src: usize, dst: &mut [u8]) -> bool;

    /// Reads a single pointer sized value
    fn read_word(&self, address: usize) -> Option<usize> {
        let mut word = [0u8; WORD];
        self.copy(address, &mut word)
            .then(|| usize::from_ne_bytes(word))
    }

    /// Copies the readable prefix of the range, returning the number of bytes
    /// copied
    fn copy_max_possible(&self, src: usize, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() {
            let Some(address) = src.checked_add(copied) else {
                break;
            };
            let chunk_end = (address / COPY_CHUNK + 1) * COPY_CHUNK;
            let len = (chunk_end - address).min(dst.len() - copied);
            if !self.copy(address, &mut dst[copied..copied + len]) {
                break;
            }
            copied += len;
        }
        copied
    }
}

/// Reads memory through the kernel so that invalid addresses produce an
/// error rather than a fault
#[derive(Copy, Clone, Default)]
pub struct SafeMemory;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        impl MemoryReader for SafeMemory {
            fn copy(&self, src: usize, dst: &mut [u8]) -> bool {
                if dst.is_empty() {
                    return true;
                }
                if src == 0 {
                    return false;
                }

                let local = libc::iovec {
                    iov_base: dst.as_mut_ptr().cast(),
                    iov_len: dst.len(),
                };
                let remote = libc::iovec {
                    iov_base: src as *mut libc::c_void,
                    iov_len: dst.len(),
                };

                // SAFETY: syscall, the kernel validates the remote range
                let read = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
                if read >= 0 {
                    return read as usize == dst.len();
                }

                // process_vm_readv can be disabled by seccomp or missing on
                // old kernels, in which case we fall back to having the kernel
                // copy the range through a pipe
                match std::io::Error::last_os_error().raw_os_error() {
                    Some(libc::ENOSYS | libc::EPERM) => copy_through_pipe(src, dst),
                    _ => false,
                }
            }
        }

        /// `write` fails with `EFAULT` rather than faulting if the source is
        /// not readable
        fn copy_through_pipe(src: usize, dst: &mut [u8]) -> bool {
            let mut fds = [0; 2];

            // SAFETY: syscalls
            unsafe {
                if libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) != 0 {
                    return false;
                }

                let mut ok = true;
                let mut offset = 0;
                while offset < dst.len() {
                    let len = (dst.len() - offset).min(COPY_CHUNK);
                    let written = libc::write(fds[1], (src + offset) as *const libc::c_void, len);
                    if written != len as isize {
                        ok = false;
                        break;
                    }
                    let read = libc::read(fds[0], dst[offset..].as_mut_ptr().cast(), len);
                    if read != len as isize {
                        ok = false;
                        break;
                    }
                    offset += len;
                }

                libc::close(fds[0]);
                libc::close(fds[1]);
                ok
            }
        }
    } else if #[cfg(target_os = "macos")] {
        impl MemoryReader for SafeMemory {
            fn copy(&self, src: usize, dst: &mut [u8]) -> bool {
                use mach2::{kern_return::KERN_SUCCESS, traps::mach_task_self, vm::mach_vm_read_overwrite};

                if dst.is_empty() {
                    return true;
                }

                let mut copied = 0;
                // SAFETY: syscall, the kernel validates the source range
                let kr = unsafe {
                    mach_vm_read_overwrite(
                        mach_task_self(),
                        src as u64,
                        dst.len() as u64,
                        dst.as_mut_ptr() as u64,
                        &mut copied,
                    )
                };
                kr == KERN_SUCCESS && copied as usize == dst.len()
            }
        }
    } else {
        impl MemoryReader for SafeMemory {
            fn copy(&self, _src: usize, dst: &mut [u8]) -> bool {
                dst.is_empty()
            }
        }
    }
}
