/*
 * Scheduler (component C) — Process Manager (component D)
 *
 * This module ties together the mechanism/policy split used throughout
 * the scheduling subsystem:
 *
 * - `scheduler::Scheduler`   the actual data store: threads, processes,
 *                            ready queue, boot/normal mode.
 * - `sched_core::SchedulerCore`  the mechanism: owns the active policy
 *                            (`Box<dyn Scheduler>`) and per-CPU state,
 *                            translates kernel operations into
 *                            `SchedEvent`s and executes dispatch decisions.
 * - `policies::PriorityQueuePolicy`  the default policy: 16 FIFO run
 *                            queues, one per priority level.
 * - `context::SchedContext`  the bridge a policy uses to query/mutate
 *                            kernel state without touching it directly.
 *
 * This file wires the pieces together: the global scheduler/core
 * singletons, the `KernelComponent`/`ProcessType`/`SchedulerMode` types
 * every sibling module references via `super::`, and the interrupt-level
 * entry points (`schedule_from_interrupt`, the naked INT 0x81 / IRQ0
 * handlers) that actually drive context switches.
 */

use alloc::string::String;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;

pub mod context;
pub mod credentials;
pub mod events;
pub mod io_wait;
pub mod policies;
pub mod process;
pub mod sched_core;
pub mod scheduler;
pub mod scheduler_manager;
pub mod session;
pub mod signal;
pub mod thread;
pub mod traits;
pub mod types;

pub use context::SchedContext;
pub use io_wait::{IoChannel, wait_for_io, wake_io_waiters};
pub use process::{Process, ProcessId};
pub use sched_core::SchedulerCore;
pub use scheduler_manager::SchedulerManager;
pub use thread::{Thread, ThreadId, ThreadManager, ThreadState};
pub use traits::{KernelSchedCtx, Scheduler};
pub use types::{BlockReason, CpuId, DispatchDecision, Priority, SchedClass, TimeSliceTicks};

pub use crate::arch::x86_64::context::{InterruptContext, InterruptFrame};
pub use policies::PriorityQueuePolicy;

/// Marker trait for subsystems started once at boot, in a fixed order
/// from `main::kstart()`. Implementors are zero-sized "manager" types
/// that namespace their associated functions rather than holding state
/// themselves (state lives in module-level statics).
pub trait KernelComponent {
    fn init();
}

/// Process classification. Determines default thread priority and,
/// during boot mode, whether the process's threads are eligible to run
/// at all (see `scheduler::Scheduler::get_next_thread`... actually
/// `policies::PriorityQueuePolicy::pick_next`, which is where the boot
/// filter now lives).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    /// Must finish initializing before the scheduler leaves boot mode.
    /// Only these (plus kernel/PID 0 threads) run while booting.
    Critical,
    /// Long-running system service, started after boot mode ends.
    System,
    /// Ordinary userspace process.
    User,
    /// Time-sensitive process; shares the top priority band with Critical.
    RealTime,
}

impl ProcessType {
    /// Default thread priority for processes of this type.
    pub fn priority(self) -> types::Priority {
        match self {
            ProcessType::Critical => types::Priority::CRITICAL,
            ProcessType::RealTime => types::Priority::REALTIME_BASE,
            ProcessType::System => types::Priority::SYSTEM,
            ProcessType::User => types::Priority::NORMAL,
        }
    }
}

/// Tracks whether a process has finished its own startup sequence.
/// Only meaningful for `ProcessType::Critical` processes during boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessInitState {
    Initializing,
    Ready,
}

/// Scheduler-wide operating mode.
///
/// `Boot` holds the bookkeeping needed to detect "all critical processes
/// are ready" (see `scheduler::Scheduler::signal_process_ready`); once
/// that condition is met the scheduler transitions to `Normal` and never
/// goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Boot {
        critical_count: usize,
        ready_count: usize,
    },
    Normal,
}

/// Global scheduler data store (threads, processes, ready queue, mode).
static SCHEDULER: Mutex<Option<scheduler::Scheduler>> = Mutex::new(None);

/// Global scheduler mechanism (active policy + per-CPU state).
static SCHEDULER_CORE: Mutex<Option<SchedulerCore>> = Mutex::new(None);

/// Currently running thread ID, per CPU 0 (CLUU is single-core). Atomic
/// so interrupt handlers can read/update it without taking the scheduler
/// lock.
static CURRENT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

/// Whether preemptive scheduling is active. False during early boot, so
/// timer/software interrupts return immediately without touching the
/// (possibly still-uninitialized) scheduler.
static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);

/// Whether the scheduler has been enabled. Used by subsystems (e.g. the
/// IRQ-safe log buffer) that behave differently before/after threads
/// exist.
pub fn is_scheduler_enabled() -> bool {
    SCHEDULER_ENABLED.load(Ordering::SeqCst)
}

/// Run `f` with shared access to the scheduler's data store.
///
/// # Panics
/// Panics if called before `SchedulerManager::init()`. Every caller in
/// this crate runs after boot-time scheduler init.
fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&scheduler::Scheduler) -> R,
{
    x86_64::instructions::interrupts::without_interrupts(|| {
        let guard = SCHEDULER.lock();
        let scheduler = guard.as_ref().expect("scheduler not initialized");
        f(scheduler)
    })
}

/// Run `f` with exclusive access to the scheduler's data store.
fn with_scheduler_mut<F, R>(f: F) -> R
where
    F: FnOnce(&mut scheduler::Scheduler) -> R,
{
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut guard = SCHEDULER.lock();
        let scheduler = guard.as_mut().expect("scheduler not initialized");
        f(scheduler)
    })
}

/// Run `f` with exclusive access to both the scheduler's data store and
/// the scheduler core (policy + per-CPU state). Used whenever an
/// operation needs to both mutate thread/process state and notify the
/// policy via a `SchedEvent`.
fn with_scheduler_and_core<F, R>(f: F) -> R
where
    F: FnOnce(&mut scheduler::Scheduler, &mut SchedulerCore) -> R,
{
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut sched_guard = SCHEDULER.lock();
        let mut core_guard = SCHEDULER_CORE.lock();
        let scheduler = sched_guard.as_mut().expect("scheduler not initialized");
        let core = core_guard.as_mut().expect("scheduler core not initialized");
        f(scheduler, core)
    })
}

/// Look up a thread's name by ID, for logging. Returns `None` if the
/// scheduler isn't initialized or the thread doesn't exist (e.g. it was
/// already reaped).
pub fn get_thread_name(tid: ThreadId) -> Option<String> {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let guard = SCHEDULER.lock();
        guard
            .as_ref()
            .and_then(|s| s.threads.iter().find(|t| t.id == tid))
            .map(|t| t.name.clone())
    })
}

/// Execute a closure with mutable access to the current thread's owning
/// process. Returns `None` if there is no current process (e.g. called
/// from the idle thread, or before any process exists).
pub fn with_current_process_mut<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut process::Process) -> R,
{
    process::ProcessManager::with_current_mut(f)
}

/// Thread statistics snapshot, used by `ps`-style shell commands.
#[derive(Debug, Clone)]
pub struct ThreadStats {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub cpu_time_ms: u64,
    pub cpu_percent: u64,
}

/// Get statistics for all threads. Thin wrapper kept at the crate root
/// since callers (shell commands) historically reach `scheduler::get_thread_stats()`
/// directly rather than through `ThreadManager`.
pub fn get_thread_stats() -> Vec<ThreadStats> {
    ThreadManager::stats()
}

/// Built-in idle thread. Runs only when no other thread is runnable;
/// halts the CPU between interrupts to save power.
fn idle_thread_main() {
    log::info!("Idle thread starting...");

    let mut idle_counter = 0u64;
    loop {
        if idle_counter % 10000 == 0 {
            log::debug!("Idle thread tick: {}", idle_counter);
        }
        idle_counter = idle_counter.wrapping_add(1);

        x86_64::instructions::hlt();
    }
}

/// Software interrupt handler for voluntary yielding (INT 0x81).
///
/// Identical to the timer handler except it carries no PIC EOI (software
/// interrupts never go through the PIC) and is triggered by
/// `SchedulerManager::yield_now()`'s `int 0x81` instead of hardware IRQ0.
#[unsafe(naked)]
pub unsafe extern "C" fn yield_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        "mov rdi, rsp",
        "call {schedule_fn}",

        "mov rsp, rax",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",

        "iretq",

        schedule_fn = sym schedule_from_interrupt,
    )
}

/// Preemptive timer interrupt handler (IRQ0, naked assembly wrapper).
///
/// Saves the full register file on the current thread's stack, calls
/// `schedule_from_interrupt` to pick (and possibly switch to) the next
/// thread, sends PIC EOI, then `iretq`s into whichever context was
/// returned.
#[unsafe(naked)]
pub unsafe extern "C" fn preemptive_timer_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        "mov rdi, rsp",
        "call {schedule_fn}",

        "mov rsp, rax",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",

        "push rax",
        "mov al, 0x20",
        "out 0x20, al",
        "pop rax",

        "iretq",

        schedule_fn = sym timer_tick_and_schedule,
    )
}

/// Timer-IRQ entry point: runs the periodic tick (scheduler quantum
/// decrement, wakeup sweep, ECB sweep, protocol-stack hooks) before
/// asking for a reschedule, unlike the voluntary-yield path which only
/// reschedules.
extern "C" fn timer_tick_and_schedule(
    ctx_ptr: *mut crate::arch::x86_64::context::InterruptContext,
) -> *const crate::arch::x86_64::context::InterruptContext {
    crate::timer::on_tick(crate::arch::x86_64::context::current_cpu_id());
    schedule_from_interrupt(ctx_ptr)
}

/// Policy-driven reschedule entry point, called from interrupt context
/// (both the naked handlers above and, on every non-nested interrupt
/// return, `interrupts::mod::finish`).
///
/// Wakes any threads whose sleep timer has expired, reports the outgoing
/// thread as yielded/blocked to the policy, asks `SchedulerCore::reschedule`
/// for the next thread, and returns a pointer to whichever
/// `InterruptContext` should be resumed (the same one passed in, if no
/// switch is needed).
///
/// # Safety
/// Runs with interrupts disabled, on the outgoing thread's kernel stack.
/// Must not block, allocate unboundedly, or panic.
#[unsafe(no_mangle)]
pub extern "C" fn schedule_from_interrupt(
    current_ctx_ptr: *mut InterruptContext,
) -> *const InterruptContext {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return current_ctx_ptr;
    }

    crate::utils::timer::on_timer_interrupt();

    let mut sched_guard = SCHEDULER.lock();
    let mut core_guard = SCHEDULER_CORE.lock();
    let (scheduler, core) = match (sched_guard.as_mut(), core_guard.as_mut()) {
        (Some(s), Some(c)) => (s, c),
        _ => return current_ctx_ptr,
    };

    let current_id = ThreadId(CURRENT_THREAD_ID.load(Ordering::SeqCst));
    let current_time = crate::utils::timer::uptime_ms();

    // Wake any threads whose sleep deadline has passed; tell the policy
    // so it re-inserts them into its ready structures.
    let expired: Vec<ThreadId> = scheduler
        .threads
        .iter()
        .filter(|t| {
            t.sleep_until_ms > 0
                && current_time >= t.sleep_until_ms
                && t.state == ThreadState::Ready
        })
        .map(|t| t.id)
        .collect();
    let now_tick = core.total_ticks(CpuId::BSP);
    for tid in expired {
        if let Some(thread) = scheduler.threads.iter_mut().find(|t| t.id == tid) {
            thread.sleep_until_ms = 0;
        }
        let mut ctx = SchedContext::new(scheduler, CpuId::BSP);
        core.thread_woke(&mut ctx, tid, BlockReason::Sleeping { until_tick: now_tick });
    }

    // Save the outgoing thread's context and tell the policy it gave up
    // the CPU (unless it blocked or terminated, which already reported
    // themselves via thread_blocked/thread_exited).
    let mut outgoing_still_runnable = false;
    if current_id.0 != 0 {
        if let Some(thread) = scheduler.threads.iter_mut().find(|t| t.id == current_id) {
            unsafe {
                thread.interrupt_context = *current_ctx_ptr;
            }

            if thread.last_scheduled_time > 0 {
                let elapsed = current_time.saturating_sub(thread.last_scheduled_time);
                thread.cpu_time_ms = thread.cpu_time_ms.saturating_add(elapsed);
            }

            outgoing_still_runnable = thread.state == ThreadState::Running;
            if outgoing_still_runnable {
                thread.state = ThreadState::Ready;
            }
        }

        if outgoing_still_runnable {
            let mut ctx = SchedContext::new(scheduler, CpuId::BSP);
            core.thread_yielded(&mut ctx, current_id);
        }
    }

    if !core.should_reschedule(CpuId::BSP) && current_id.0 != 0 {
        // Nothing forced a reschedule (timeslice not expired, no
        // higher-priority wakeup) and we already have a running thread;
        // resume it without consulting the policy again.
        if let Some(thread) = scheduler.threads.iter_mut().find(|t| t.id == current_id) {
            thread.state = ThreadState::Running;
        }
        scheduler.cleanup_terminated_threads(current_id, false);
        return current_ctx_ptr;
    }

    let next_id = {
        let mut ctx = SchedContext::new(scheduler, CpuId::BSP);
        core.reschedule(&mut ctx, CpuId::BSP)
    };

    let next_id = match next_id {
        Some(id) => id,
        None => {
            // No runnable thread (shouldn't happen once idle is spawned,
            // but don't crash on it): keep running whatever was current.
            scheduler.cleanup_terminated_threads(current_id, false);
            return current_ctx_ptr;
        }
    };

    let next_ctx_ptr = if let Some(next_thread) = scheduler.get_thread_mut(next_id) {
        next_thread.state = ThreadState::Running;
        next_thread.last_scheduled_time = current_time;
        &next_thread.interrupt_context as *const InterruptContext
    } else {
        return current_ctx_ptr;
    };

    CURRENT_THREAD_ID.store(next_id.0, Ordering::SeqCst);

    scheduler.cleanup_terminated_threads(next_id, false);

    next_ctx_ptr
}

/// Sleep for `ms` milliseconds (blocking, zero CPU usage while asleep).
///
/// Marks the current thread's sleep deadline and yields; the thread is
/// not rescheduled until `schedule_from_interrupt` observes the deadline
/// has passed.
pub fn sleep_ms(ms: u64) {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        let start = crate::utils::timer::uptime_ms();
        while crate::utils::timer::uptime_ms() - start < ms {
            x86_64::instructions::hlt();
        }
        return;
    }

    let current_id = ThreadId(CURRENT_THREAD_ID.load(Ordering::SeqCst));
    if current_id.0 == 0 {
        return;
    }

    with_scheduler_mut(|scheduler| {
        if let Some(thread) = scheduler.threads.iter_mut().find(|t| t.id == current_id) {
            thread.sleep_until_ms = crate::utils::timer::uptime_ms() + ms;
        }
    });

    SchedulerManager::yield_now();
}
