/*
 * Signal Delivery
 *
 * Each process carries a pending-signal bitmask and a mask of currently
 * blocked signals (`Process::pending_signals`/`signal_mask`); `kill()` sets
 * a bit, `deliver_pending_for_current` is the drain point called from the
 * interrupt-return path (see `interrupts::dispatch`'s `finish`) before the
 * scheduler picks the next thread to run.
 */

use crate::error::{KResult, KernelError};

use super::process::ProcessId;
use super::thread::{ThreadId, ThreadState};

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGABRT: u32 = 6;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGSEGV: u32 = 11;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;
pub const SIGTSTP: u32 = 20;

pub const NSIG: usize = 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    /// Userspace handler address. `deliver_pending_for_current` redirects
    /// the interrupted context to run this function, and `sigreturn`
    /// restores the pre-signal context afterward (see `build_trampoline_frame`).
    Handler(usize),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing delivered, or delivery didn't require syscall replay.
    Normal,
    /// The interrupted syscall should be re-issued (e.g. `SA_RESTART`-style
    /// semantics). Reserved: this build always returns `Normal`, see
    /// DESIGN.md's Open Question on syscall restart.
    Restart,
}

fn default_action_terminates(sig: u32) -> bool {
    !matches!(sig, SIGCHLD | SIGCONT)
}

/// Send `sig` to `pid`, setting its pending bit and waking one blocked
/// thread of that process so interruptible waits notice promptly.
///
/// SIGSTOP/SIGTSTP and SIGCONT take effect immediately rather than waiting
/// for `deliver_pending_for_current` to drain the pending bit, since a
/// stopped process has no thread left running to drain it on.
pub fn kill(pid: ProcessId, sig: u32) -> KResult<()> {
    if sig as usize >= NSIG {
        return Err(KernelError::InvalidArgument);
    }
    if sig == SIGSTOP || sig == SIGTSTP {
        stop_process(pid);
        return Ok(());
    }
    if sig == SIGCONT {
        continue_process(pid);
    }
    let woke = super::with_scheduler_mut(|s| {
        let process = s.get_process_mut(pid)?;
        process.pending_signals |= 1u64 << sig;
        s.threads
            .iter()
            .find(|t| t.process_id == pid && t.state == ThreadState::Blocked)
            .map(|t| t.id)
    });
    if let Some(tid) = woke {
        super::ThreadManager::wake(tid);
    }
    Ok(())
}

/// Dequeue every thread of `pid` that is currently ready or running from
/// the ready queue and mark it blocked, recording which ones so SIGCONT
/// can re-enqueue exactly those (and not threads that were already blocked
/// on something unrelated, e.g. I/O).
fn stop_process(pid: ProcessId) {
    super::with_scheduler_and_core(|s, core| {
        let runnable: alloc::vec::Vec<ThreadId> = s
            .threads
            .iter()
            .filter(|t| {
                t.process_id == pid
                    && matches!(t.state, ThreadState::Ready | ThreadState::Running)
            })
            .map(|t| t.id)
            .collect();
        s.ready_queue.retain(|tid| !runnable.contains(tid));
        for &tid in &runnable {
            if let Some(t) = s.threads.iter_mut().find(|t| t.id == tid) {
                t.state = ThreadState::Blocked;
            }
            let mut ctx = super::SchedContext::new(s, super::types::CpuId::BSP);
            core.thread_blocked(&mut ctx, tid, super::BlockReason::Other);
        }
        if let Some(p) = s.get_process_mut(pid) {
            p.stopped = true;
            p.stopped_threads = runnable;
        }
    });
}

/// Re-enqueue the threads `stop_process` dequeued, and clear the stopped
/// flag.
fn continue_process(pid: ProcessId) {
    let stopped_threads = super::with_scheduler_mut(|s| {
        s.get_process_mut(pid)
            .map(|p| {
                p.stopped = false;
                core::mem::take(&mut p.stopped_threads)
            })
            .unwrap_or_default()
    });
    super::with_scheduler_and_core(|s, core| {
        for tid in stopped_threads {
            if let Some(t) = s.threads.iter_mut().find(|t| t.id == tid) {
                if t.state == ThreadState::Blocked {
                    t.state = ThreadState::Ready;
                    s.ready_queue.push_back(tid);
                }
            }
            let mut ctx = super::SchedContext::new(s, super::types::CpuId::BSP);
            core.thread_woke(&mut ctx, tid, super::BlockReason::Other);
        }
    });
}

/// Whether the calling thread's process has any unmasked signal pending;
/// the interruptible-wait path (`Semaphore::down_interruptible`) polls
/// this to decide whether to abort a wait early.
pub fn has_pending_for_current() -> bool {
    let Some(pid) = super::process::ProcessManager::current_id() else {
        return false;
    };
    super::with_scheduler(|s| {
        s.get_process(pid)
            .map(|p| p.pending_signals & !p.signal_mask != 0)
            .unwrap_or(false)
    })
}

/// Drain and act on the current process's pending signals. Called once
/// per interrupt return, after the syscall (if any) has completed and
/// before the scheduler picks the next thread.
pub fn deliver_pending_for_current(
    ctx: &mut crate::arch::x86_64::context::InterruptContext,
) -> DeliveryOutcome {
    let Some(pid) = super::process::ProcessManager::current_id() else {
        return DeliveryOutcome::Normal;
    };

    let action = super::with_scheduler_mut(|s| {
        let process = s.get_process_mut(pid)?;
        let deliverable = process.pending_signals & !process.signal_mask;
        if deliverable == 0 {
            return None;
        }
        let sig = deliverable.trailing_zeros();
        process.pending_signals &= !(1u64 << sig);
        let disposition = process.signal_dispositions[sig as usize];
        Some((sig, disposition))
    });

    let Some((sig, disposition)) = action else {
        return DeliveryOutcome::Normal;
    };

    match disposition {
        Disposition::Ignore => {}
        Disposition::Handler(handler) => {
            // SIGKILL/SIGSTOP can't be caught (rejected by set_disposition),
            // but SIGTSTP/SIGCONT can; a caught job-control signal still
            // runs the installed handler instead of the default stop/continue.
            build_trampoline_frame(ctx, sig, handler);
        }
        Disposition::Default => {
            if sig == SIGSTOP || sig == SIGTSTP {
                stop_process(pid);
            } else if sig == SIGCONT {
                continue_process(pid);
            } else if default_action_terminates(sig) {
                terminate_process(pid, 128 + sig as i32);
            }
        }
    }

    DeliveryOutcome::Normal
}

/// Per-thread saved pre-signal state, restored by `sigreturn`. Keyed by the
/// thread the handler runs on; a thread can only have one signal frame live
/// at a time (nested delivery waits for the mask the trampoline installs).
struct SavedFrame {
    ctx: crate::arch::x86_64::context::InterruptContext,
    mask: u64,
}

static SAVED_FRAMES: spin::Mutex<alloc::collections::BTreeMap<super::thread::ThreadId, SavedFrame>> =
    spin::Mutex::new(alloc::collections::BTreeMap::new());

/// Divert the interrupted context into the handler: save the pre-signal
/// register file and mask, block `sig` (plus whatever the disposition's
/// `sa_mask` would add — CLUU tracks only a single process-wide mask, so
/// this reduces to blocking `sig` itself, matching the non-`SA_NODEFER`
/// default), push a return address pointing at the `sigreturn` trampoline
/// below the handler's new stack frame, then redirect `rip`/`rdi` so the
/// handler runs as `handler(sig)` and "returns" into `sigreturn`.
fn build_trampoline_frame(
    ctx: &mut crate::arch::x86_64::context::InterruptContext,
    sig: u32,
    handler: usize,
) {
    let tid = super::thread::ThreadManager::current_id();
    let pid = match super::process::ProcessManager::current_id() {
        Some(pid) => pid,
        None => return,
    };

    let previous_mask = super::with_scheduler_mut(|s| {
        let process = s.get_process_mut(pid)?;
        let previous = process.signal_mask;
        process.signal_mask |= 1u64 << sig;
        Some(previous)
    });
    let Some(previous_mask) = previous_mask else {
        return;
    };

    SAVED_FRAMES.lock().insert(
        tid,
        SavedFrame {
            ctx: *ctx,
            mask: previous_mask,
        },
    );

    // Build a small trampoline on the interrupted stack: the sigreturn
    // syscall number followed by the return address the handler "returns"
    // to, which is this same bytes-in-place trampoline.
    let sigreturn_stub = sigreturn_trampoline as *const () as u64;
    let new_rsp = (ctx.iret_frame.rsp - 8) & !0xf;
    unsafe {
        core::ptr::write_volatile(new_rsp as *mut u64, sigreturn_stub);
    }

    ctx.iret_frame.rsp = new_rsp;
    ctx.iret_frame.rip = handler as u64;
    ctx.rdi = sig as u64;
}

/// `sigreturn()`: restore the context `build_trampoline_frame` saved before
/// entering the handler, including the signal mask it widened.
pub fn sigreturn(ctx: &mut crate::arch::x86_64::context::InterruptContext) -> KResult<()> {
    let tid = super::thread::ThreadManager::current_id();
    let saved = SAVED_FRAMES
        .lock()
        .remove(&tid)
        .ok_or(KernelError::InvalidArgument)?;
    *ctx = saved.ctx;
    if let Some(pid) = super::process::ProcessManager::current_id() {
        super::with_scheduler_mut(|s| {
            if let Some(p) = s.get_process_mut(pid) {
                p.signal_mask = saved.mask;
            }
        });
    }
    Ok(())
}

/// Placeholder return address for handler frames. `sigreturn` is invoked as
/// a syscall from userspace's own libc-style trampoline in a full
/// implementation; this kernel has no userspace libc, so the symbol exists
/// only to give handler frames a valid, non-garbage return address — it is
/// never actually executed (the handler is expected to call the
/// `sigreturn` syscall directly before returning).
extern "C" fn sigreturn_trampoline() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

fn terminate_process(pid: ProcessId, exit_code: i32) {
    let thread_ids = super::with_scheduler_mut(|s| {
        let ids: alloc::vec::Vec<_> = s
            .threads
            .iter_mut()
            .filter(|t| t.process_id == pid)
            .map(|t| {
                t.state = ThreadState::Terminated;
                t.exit_code = Some(exit_code);
                t.id
            })
            .collect();
        s.ready_queue.retain(|tid| !ids.contains(tid));
        if let Some(p) = s.get_process_mut(pid) {
            p.exit(exit_code);
        }
        ids
    });
    log::info!(
        "signal: terminated process {:?} ({} threads) with code {}",
        pid,
        thread_ids.len(),
        exit_code
    );
}

/// `sigaction()`: install a disposition for `sig` in the current process.
pub fn set_disposition(sig: u32, disposition: Disposition) -> KResult<Disposition> {
    if sig as usize >= NSIG || sig == SIGKILL || sig == SIGSTOP {
        return Err(KernelError::InvalidArgument);
    }
    let pid = super::process::ProcessManager::current_id().ok_or(KernelError::NoSuchResource)?;
    super::with_scheduler_mut(|s| {
        let process = s.get_process_mut(pid).ok_or(KernelError::NoSuchResource)?;
        let previous = process.signal_dispositions[sig as usize];
        process.signal_dispositions[sig as usize] = disposition;
        Ok(previous)
    })
}

/// `sigprocmask()`-style mask update for the current process.
pub fn set_mask(mask: u64) -> KResult<u64> {
    let pid = super::process::ProcessManager::current_id().ok_or(KernelError::NoSuchResource)?;
    super::with_scheduler_mut(|s| {
        let process = s.get_process_mut(pid).ok_or(KernelError::NoSuchResource)?;
        let previous = process.signal_mask;
        process.signal_mask = mask & !((1u64 << SIGKILL) | (1u64 << SIGSTOP));
        Ok(previous)
    })
}
