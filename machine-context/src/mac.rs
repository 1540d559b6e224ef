use crate::{CpuState, Error, ThreadControl, ThreadId, ThreadList, threads::current_thread_id};
use mach2::{
    kern_return::KERN_SUCCESS, mach_types::thread_act_t, task, thread_act, traps::mach_task_self,
};

/// Controls threads with the mach thread APIs.
///
/// Capturing the registers of other threads is not implemented, they are
/// reported without CPU state.
#[derive(Copy, Clone, Default)]
pub struct MachThreadControl;

impl ThreadControl for MachThreadControl {
    fn current_thread(&self) -> ThreadId {
        current_thread_id()
    }

    fn enumerate(&self, threads: &mut ThreadList) -> Result<(), Error> {
        // SAFETY: syscalls
        unsafe {
            let mut threads_for_task = std::ptr::null_mut();
            let mut thread_count = 0;

            let kr = task::task_threads(mach_task_self(), &mut threads_for_task, &mut thread_count);
            if kr != KERN_SUCCESS {
                return Err(Error::Kern(kr));
            }

            let task_threads = std::slice::from_raw_parts(threads_for_task, thread_count as usize);
            let mut dropped = 0;
            for thread in task_threads {
                if !threads.push(*thread as ThreadId) {
                    dropped += 1;
                }
            }

            if dropped > 0 {
                log::warn!("thread list is full, dropped {dropped} threads");
            }
        }

        Ok(())
    }

    fn suspend(&self, thread: ThreadId) -> Result<(), Error> {
        // SAFETY: syscall
        let kr = unsafe { thread_act::thread_suspend(thread as thread_act_t) };
        if kr == KERN_SUCCESS {
            Ok(())
        } else {
            Err(Error::Kern(kr))
        }
    }

    fn resume(&self, thread: ThreadId) -> Result<(), Error> {
        // SAFETY: syscall
        let kr = unsafe { thread_act::thread_resume(thread as thread_act_t) };
        if kr == KERN_SUCCESS {
            Ok(())
        } else {
            Err(Error::Kern(kr))
        }
    }

    fn capture(&self, _thread: ThreadId, _cpu: &mut CpuState) -> bool {
        false
    }

    fn thread_name<'b>(&self, thread: ThreadId, buf: &'b mut [u8]) -> Option<&'b str> {
        // SAFETY: syscalls, the name is NUL terminated within `buf`
        unsafe {
            let pthread = libc::pthread_from_mach_thread_np(thread as libc::mach_port_t);
            if pthread as usize == 0 || buf.is_empty() {
                return None;
            }

            if libc::pthread_getname_np(pthread, buf.as_mut_ptr().cast(), buf.len()) != 0 {
                return None;
            }
        }

        let len = buf.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&buf[..len]).ok().filter(|name| !name.is_empty())
    }
}
