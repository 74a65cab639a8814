/*
 * System Call Handlers
 *
 * This module implements the actual syscall handler functions that are
 * dispatched from the syscall entry point.
 *
 * Each handler:
 * - Validates arguments from userspace (pointers, file descriptors, etc.)
 * - Performs the requested operation
 * - Returns result or error code (negative for errors)
 *
 * Security considerations:
 * - All userspace pointers MUST be validated before dereferencing
 * - File descriptors must be checked for validity
 * - Integer overflows must be prevented
 * - Resources must be properly cleaned up on error paths
 */

use super::numbers::*;
use crate::error::KernelError;
use crate::scheduler::{self, credentials::Credentials, process::ProcessManager, session, signal};

/// Validate a user pointer
///
/// Checks that a pointer from userspace is:
/// - Not NULL
/// - Within userspace address range (< 0x0000_8000_0000_0000)
/// - Does not overflow when adding count
///
/// Returns Ok(()) if valid, Err(error_code) otherwise.
fn validate_user_ptr<T>(ptr: *const T, count: usize) -> Result<(), isize> {
    let addr = ptr as usize;

    // Check for NULL pointer
    if addr == 0 {
        return Err(-EFAULT);
    }

    // Check if address is in kernel space (high half)
    if addr >= 0x0000_8000_0000_0000 {
        return Err(-EFAULT);
    }

    // Check for overflow when computing end address
    if addr.checked_add(count * core::mem::size_of::<T>()).is_none() {
        return Err(-EFAULT);
    }

    Ok(())
}

// Syscall handlers will be implemented in Phase 5
// For now, they all return ENOSYS (not implemented)

pub fn sys_read(_fd: i32, _buf: *mut u8, _count: usize) -> isize {
    -ENOSYS
}

pub fn sys_write(_fd: i32, _buf: *const u8, _count: usize) -> isize {
    -ENOSYS
}

pub fn sys_close(_fd: i32) -> isize {
    -ENOSYS
}

pub fn sys_fstat(_fd: i32, _statbuf: *mut u8) -> isize {
    -ENOSYS
}

pub fn sys_lseek(_fd: i32, _offset: i64, _whence: i32) -> isize {
    -ENOSYS
}

pub fn sys_isatty(_fd: i32) -> isize {
    -ENOSYS
}

pub fn sys_brk(_addr: *mut u8) -> isize {
    -ENOSYS
}

pub fn sys_exit(_status: i32) -> ! {
    // Exit should terminate the current thread/process
    // For now, just loop forever
    loop {
        x86_64::instructions::hlt();
    }
}

pub fn sys_yield() -> isize {
    // Yield should call the scheduler's yield function
    // For now, return success
    0
}

pub fn sys_getpid() -> isize {
    ProcessManager::current_id()
        .map(|pid| pid.as_usize() as isize)
        .unwrap_or_else(|| KernelError::NoSuchResource.to_syscall_return())
}

pub fn sys_getppid() -> isize {
    ProcessManager::with_current(|p| p.parent_id.map(|p| p.as_usize() as isize).unwrap_or(0))
        .unwrap_or(0)
}

pub fn sys_kill(pid: i32, sig: u32) -> isize {
    if pid < 0 {
        return -EINVAL;
    }
    match signal::kill(scheduler::ProcessId(pid as usize), sig) {
        Ok(()) => 0,
        Err(e) => e.to_syscall_return(),
    }
}

/// `disposition` is 0 = SIG_DFL, 1 = SIG_IGN, anything else a handler
/// address. Returns the previous disposition encoded the same way.
pub fn sys_sigaction(sig: u32, disposition: usize) -> isize {
    let new = match disposition {
        0 => signal::Disposition::Default,
        1 => signal::Disposition::Ignore,
        addr => {
            if validate_user_ptr(addr as *const u8, 1).is_err() {
                return -EFAULT;
            }
            signal::Disposition::Handler(addr)
        }
    };
    match signal::set_disposition(sig, new) {
        Ok(signal::Disposition::Default) => 0,
        Ok(signal::Disposition::Ignore) => 1,
        Ok(signal::Disposition::Handler(addr)) => addr as isize,
        Err(e) => e.to_syscall_return(),
    }
}

const SIG_BLOCK: i32 = 0;
const SIG_UNBLOCK: i32 = 1;
const SIG_SETMASK: i32 = 2;

pub fn sys_sigprocmask(how: i32, mask: u64) -> isize {
    let current = ProcessManager::with_current(|p| p.signal_mask).unwrap_or(0);
    let new_mask = match how {
        SIG_BLOCK => current | mask,
        SIG_UNBLOCK => current & !mask,
        SIG_SETMASK => mask,
        _ => return -EINVAL,
    };
    match signal::set_mask(new_mask) {
        Ok(previous) => previous as isize,
        Err(e) => e.to_syscall_return(),
    }
}

pub fn sys_setsid() -> isize {
    let Some(pid) = ProcessManager::current_id() else {
        return KernelError::NoSuchResource.to_syscall_return();
    };
    match session::setsid(pid) {
        Ok(sid) => sid.0 as isize,
        Err(_) => -EPERM,
    }
}

pub fn sys_setpgid(pid: i32, pgid: i32) -> isize {
    let Some(current) = ProcessManager::current_id() else {
        return KernelError::NoSuchResource.to_syscall_return();
    };
    let target = if pid == 0 { current } else { scheduler::ProcessId(pid as usize) };
    let group = if pgid == 0 { target.as_usize() } else { pgid as usize };
    match session::setpgid(target, session::ProcessGroupId(group)) {
        Ok(()) => 0,
        Err(_) => -EPERM,
    }
}

pub fn sys_setuid(uid: u32) -> isize {
    with_current_credentials(|c| c.set_uid(uid))
}

pub fn sys_seteuid(euid: u32) -> isize {
    with_current_credentials(|c| c.set_euid(euid))
}

pub fn sys_setgid(gid: u32) -> isize {
    with_current_credentials(|c| c.set_gid(gid))
}

pub fn sys_setegid(egid: u32) -> isize {
    with_current_credentials(|c| c.set_egid(egid))
}

fn with_current_credentials(f: impl FnOnce(&mut Credentials) -> Result<(), &'static str>) -> isize {
    let result = ProcessManager::with_current_mut(|p| f(&mut p.credentials));
    match result {
        Some(Ok(())) => 0,
        Some(Err(_)) => -EPERM,
        None => KernelError::NoSuchResource.to_syscall_return(),
    }
}
