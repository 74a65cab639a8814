/*
 * Kernel Error Taxonomy
 *
 * Every fallible operation above the architecture-glue layer returns
 * `Result<T, KernelError>`. The variant set is closed and mirrors the
 * syscall ABI's negative-small-integer error convention: each variant
 * has a stable, small negative value so a syscall handler can return
 * `err.into()` directly in the accumulator register.
 *
 * Programming-fault conditions (null task id, lock-order violation,
 * exhausted critical table) are not represented here: those trip a
 * kernel panic instead, per the error-handling design.
 */

use core::fmt;

/// Closed error taxonomy for the kernel core.
///
/// Kinds, not names: callers match on the variant, never on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KernelError {
    /// A syscall or kernel API argument failed validation.
    InvalidArgument = 1,
    /// `wait`/`waitpid` found no child matching the selector.
    NoSuchChild = 2,
    /// Allocation of a kernel object (task, process, timer) failed.
    NoMemory = 3,
    /// Caller's credentials do not permit the requested operation.
    PermissionDenied = 4,
    /// Non-blocking operation had nothing to return yet (EAGAIN-class).
    WouldBlock = 5,
    /// A blocking wait was cancelled by signal delivery.
    Interrupted = 6,
    /// A bounded ring (work queue) was at capacity.
    QueueFull = 7,
    /// A handle (task, process, vector, queue) does not name a live object.
    NoSuchResource = 8,
    /// The target resource exists but is in use and cannot be operated on now.
    Busy = 9,
}

impl KernelError {
    /// The negative small integer a syscall handler returns for this error.
    pub const fn to_syscall_return(self) -> isize {
        -(self as i32 as isize)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::InvalidArgument => "invalid argument",
            KernelError::NoSuchChild => "no such child",
            KernelError::NoMemory => "no memory",
            KernelError::PermissionDenied => "permission denied",
            KernelError::WouldBlock => "would block",
            KernelError::Interrupted => "interrupted",
            KernelError::QueueFull => "queue full",
            KernelError::NoSuchResource => "no such resource",
            KernelError::Busy => "busy",
        };
        f.write_str(msg)
    }
}

impl From<KernelError> for isize {
    fn from(e: KernelError) -> isize {
        e.to_syscall_return()
    }
}

pub type KResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_return_values_are_negative_and_distinct() {
        let all = [
            KernelError::InvalidArgument,
            KernelError::NoSuchChild,
            KernelError::NoMemory,
            KernelError::PermissionDenied,
            KernelError::WouldBlock,
            KernelError::Interrupted,
            KernelError::QueueFull,
            KernelError::NoSuchResource,
            KernelError::Busy,
        ];
        for e in all {
            assert!(e.to_syscall_return() < 0);
        }
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i].to_syscall_return(), all[j].to_syscall_return());
            }
        }
    }
}
