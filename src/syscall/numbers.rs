/*
 * System Call Numbers
 *
 * This module defines the syscall numbers following the System V AMD64 ABI
 * convention used by Linux and most Unix-like systems.
 *
 * Syscall Mechanism:
 * - RAX register contains syscall number
 * - Arguments in RDI, RSI, RDX, R10, R8, R9 (6 args max)
 * - Return value in RAX (signed: negative = error code)
 *
 * Why these numbers:
 * - Compatibility with newlib C library expectations
 * - Standard Linux syscall numbers where applicable
 * - Custom numbers (>= 1000) for CLUU-specific syscalls
 */

/// Syscall error codes (negative values returned in RAX)
pub const ENOSYS: isize = 38;   // Function not implemented
pub const EBADF: isize = 9;     // Bad file descriptor
pub const EFAULT: isize = 14;   // Bad address (invalid pointer from userspace)
pub const EINVAL: isize = 22;   // Invalid argument
pub const ENOMEM: isize = 12;   // Out of memory
pub const ESPIPE: isize = 29;   // Illegal seek (e.g., seek on TTY)
pub const EPERM: isize = 1;     // Operation not permitted

/// Group A: Console I/O syscalls (required for basic userspace)
///
/// These syscalls provide the minimum I/O functionality needed for
/// newlib's stdio to work (printf, scanf, etc.)

/// Read from file descriptor
///
/// Arguments: (fd: i32, buf: *mut u8, count: usize) -> isize
/// Returns: number of bytes read, or negative error code
pub const SYS_READ: usize = 0;

/// Write to file descriptor
///
/// Arguments: (fd: i32, buf: *const u8, count: usize) -> isize
/// Returns: number of bytes written, or negative error code
pub const SYS_WRITE: usize = 1;

/// Close file descriptor
///
/// Arguments: (fd: i32) -> isize
/// Returns: 0 on success, or negative error code
pub const SYS_CLOSE: usize = 3;

/// Get file status
///
/// Arguments: (fd: i32, statbuf: *mut Stat) -> isize
/// Returns: 0 on success, or negative error code
pub const SYS_FSTAT: usize = 5;

/// Seek to position in file
///
/// Arguments: (fd: i32, offset: i64, whence: i32) -> isize
/// Returns: new file position, or negative error code
pub const SYS_LSEEK: usize = 8;

/// Check if file descriptor is a TTY
///
/// Arguments: (fd: i32) -> isize
/// Returns: 1 if TTY, 0 if not, or negative error code
pub const SYS_ISATTY: usize = 16;

/// Group B: Heap management syscall (required for malloc/new)

/// Set program break (heap boundary)
///
/// Arguments: (addr: *mut u8) -> isize
/// Returns: new break on success, or negative error code
///
/// Note: Physical pages are allocated lazily on first access (page fault)
pub const SYS_BRK: usize = 12;

/// Process control syscalls

/// Exit current process
///
/// Arguments: (status: i32) -> !
/// Does not return
pub const SYS_EXIT: usize = 60;

/// Yield CPU to scheduler
///
/// Arguments: () -> isize
/// Returns: 0 on success
pub const SYS_YIELD: usize = 158;  // sched_yield in Linux

/// Group C: Process/signal/job-control syscalls
///
/// Numbers below match their Linux x86_64 equivalents so a newlib-linked
/// userspace binary built against the usual headers calls the syscall it
/// expects to; `SYS_SETEUID`/`SYS_SETEGID` have no single-purpose Linux
/// syscall (glibc builds them from `setresuid`/`setresgid`) so CLUU gives
/// them its own numbers in the >= 1000 custom range.

/// Get current process ID
///
/// Arguments: () -> isize
/// Returns: the caller's PID
pub const SYS_GETPID: usize = 39;

/// Fork the calling process
///
/// Arguments: () -> isize
/// Returns (in the parent): the child's PID. The child's copy of this
/// syscall returns 0 instead of returning a second time through normal
/// control flow.
pub const SYS_FORK: usize = 57;

/// Replace the calling process's image with a binary from the initrd
///
/// Arguments: (path: *const u8, path_len: usize) -> isize
/// Does not return on success; returns a negative error code on failure.
pub const SYS_EXECVE: usize = 59;

/// Wait for a child process to exit
///
/// Arguments: (pid: i32) -> isize
/// `pid <= 0` waits for any child. Returns the reaped child's PID packed
/// with its exit status: `(pid << 8) | (exit_code as u8 as isize)`.
pub const SYS_WAIT4: usize = 61;

/// Send a signal to a process
///
/// Arguments: (pid: i32, sig: u32) -> isize
/// Returns: 0 on success, or negative error code
pub const SYS_KILL: usize = 62;

/// Get parent process ID
///
/// Arguments: () -> isize
/// Returns: the caller's parent PID, or 0 if it has none
pub const SYS_GETPPID: usize = 110;

/// Install a signal disposition (sigaction)
///
/// Arguments: (sig: u32, disposition: usize) -> isize
/// `disposition` is 0 for SIG_DFL, 1 for SIG_IGN, or a handler address.
/// Returns: the previous disposition encoded the same way, or negative
/// error code.
pub const SYS_SIGACTION: usize = 13; // rt_sigaction in Linux

/// Update the calling process's signal mask (sigprocmask)
///
/// Arguments: (how: i32, mask: u64) -> isize
/// `how` is 0 = SIG_BLOCK, 1 = SIG_UNBLOCK, 2 = SIG_SETMASK.
/// Returns: the previous mask, or negative error code.
pub const SYS_SIGPROCMASK: usize = 14; // rt_sigprocmask in Linux

/// Return from a signal handler (sigreturn)
///
/// Arguments: () -> !  (restores the pre-signal register file directly,
/// so the "return value" is whatever the interrupted syscall had)
pub const SYS_SIGRETURN: usize = 15; // rt_sigreturn in Linux

/// Start a new session (setsid)
///
/// Arguments: () -> isize
/// Returns: the new session id, or negative error code
pub const SYS_SETSID: usize = 112;

/// Join or create a process group (setpgid)
///
/// Arguments: (pid: i32, pgid: i32) -> isize
/// `pid == 0` means the caller; `pgid == 0` means "use pid's own id".
pub const SYS_SETPGID: usize = 109;

/// Set real (and, for root, effective) uid
pub const SYS_SETUID: usize = 105;

/// Set real (and, for root, effective) gid
pub const SYS_SETGID: usize = 106;

/// Set effective uid only
pub const SYS_SETEUID: usize = 1000;

/// Set effective gid only
pub const SYS_SETEGID: usize = 1001;
