//! Applies a nice-value offset to the calling thread for the lifetime of a
//! guard, restoring both its prior niceness and its prior name on drop.

use std::os::raw::c_char;

const NAME_BUF_LEN: usize = 16;

pub struct ThreadPriorityGuard {
    original_priority: i32,
    original_name: [u8; NAME_BUF_LEN],
}

impl ThreadPriorityGuard {
    /// Captures the calling thread's current nice value and name, then
    /// applies `delta` to its priority. Called once even when `delta` is
    /// `0`, so the name is still captured and restored on drop.
    pub fn apply(delta: i32) -> ThreadPriorityGuard {
        let original_priority = unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) };

        let mut original_name = [0u8; NAME_BUF_LEN];
        unsafe {
            libc::pthread_getname_np(libc::pthread_self(), original_name.as_mut_ptr() as *mut c_char, NAME_BUF_LEN);
        }

        if delta != 0 {
            unsafe {
                libc::setpriority(libc::PRIO_PROCESS, 0, original_priority + delta);
            }
        }

        ThreadPriorityGuard { original_priority, original_name }
    }
}

impl Drop for ThreadPriorityGuard {
    fn drop(&mut self) {
        unsafe {
            libc::setpriority(libc::PRIO_PROCESS, 0, self.original_priority);
            libc::pthread_setname_np(libc::pthread_self(), self.original_name.as_ptr() as *const c_char);
        }
    }
}
