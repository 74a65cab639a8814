/*
 * Event Control Blocks (ECBs)
 *
 * A wait slot attached to a semaphore, with an optional tick-countdown
 * timeout. While a timeout is active the ECB sits on exactly one CPU's
 * timed-ECB list; the timer subsystem's step 6 (`timer::on_tick`, every
 * `SEM_CHECK` ticks) walks that list and fires expired entries.
 */

use alloc::vec::Vec;

use spin::Mutex;

use crate::arena::{Arena, Handle};
use crate::arch::x86_64::context::MAX_CPUS;
use crate::error::{KResult, KernelError};
use crate::sync::semaphore::Semaphore;

pub type EcbHandle = Handle;

struct Ecb {
    is_active: bool,
    remaining_ticks: u32,
    timed_out: bool,
    cpu: usize,
    sem: Semaphore,
}

struct PerCpuEcbs {
    arena: Arena<Ecb>,
    /// Handles currently on this CPU's timed list, for the sweep to walk
    /// without scanning dead slots in the arena.
    timed: Vec<EcbHandle>,
}

impl PerCpuEcbs {
    const fn new() -> Self {
        Self {
            arena: Arena::new(),
            timed: Vec::new(),
        }
    }
}

static CPUS: [Mutex<PerCpuEcbs>; MAX_CPUS] = [
    Mutex::new(PerCpuEcbs::new()),
    Mutex::new(PerCpuEcbs::new()),
    Mutex::new(PerCpuEcbs::new()),
    Mutex::new(PerCpuEcbs::new()),
];

/// Create an inactive ECB bound to a semaphore; the caller arms it (with
/// a timeout) separately via `arm`.
pub fn create(cpu: usize, sem: Semaphore) -> EcbHandle {
    let mut guard = CPUS[cpu].lock();
    guard.arena.insert(Ecb {
        is_active: false,
        remaining_ticks: 0,
        timed_out: false,
        cpu,
        sem,
    })
}

/// Arm (or re-arm) a timeout on an ECB, binding it to its owning CPU's
/// timed list. Invariant: an ECB is on the timed list of exactly one CPU
/// while `is_active`.
pub fn arm(handle: EcbHandle, ticks: u32) -> KResult<()> {
    for cpu_state in CPUS.iter() {
        let mut guard = cpu_state.lock();
        if let Some(ecb) = guard.arena.get_mut(handle) {
            ecb.remaining_ticks = ticks;
            ecb.timed_out = false;
            let already_listed = guard.timed.contains(&handle);
            if !already_listed {
                ecb.is_active = true;
                guard.timed.push(handle);
            }
            return Ok(());
        }
    }
    Err(KernelError::NoSuchResource)
}

/// Cancel a previously armed ECB timeout, removing it from its CPU's
/// timed list.
pub fn cancel(handle: EcbHandle) {
    for cpu_state in CPUS.iter() {
        let mut guard = cpu_state.lock();
        if let Some(ecb) = guard.arena.get_mut(handle) {
            ecb.is_active = false;
        }
        guard.timed.retain(|&h| h != handle);
    }
}

/// Tear down an ECB entirely, e.g. once its owning wait completes.
pub fn destroy(handle: EcbHandle) {
    cancel(handle);
    for cpu_state in CPUS.iter() {
        let mut guard = cpu_state.lock();
        guard.arena.remove(handle);
    }
}

pub fn timed_out(handle: EcbHandle) -> bool {
    for cpu_state in CPUS.iter() {
        let guard = cpu_state.lock();
        if let Some(ecb) = guard.arena.get(handle) {
            return ecb.timed_out;
        }
    }
    false
}

/// Step 6 of the tick handler, run on every CPU at `SEM_CHECK` cadence:
/// decrement remaining ticks for every active timed ECB on this CPU; when
/// one reaches zero, mark it timed out and wake its semaphore.
pub fn sweep(cpu: usize) {
    let mut expired = Vec::new();
    {
        let mut guard = CPUS[cpu].lock();
        let PerCpuEcbs { arena, timed } = &mut *guard;
        timed.retain(|&handle| {
            let Some(ecb) = arena.get_mut(handle) else {
                return false;
            };
            if !ecb.is_active {
                return false;
            }
            if ecb.remaining_ticks == 0 {
                return true;
            }
            ecb.remaining_ticks -= 1;
            if ecb.remaining_ticks == 0 {
                ecb.timed_out = true;
                ecb.is_active = false;
                expired.push(ecb.sem.clone());
                false
            } else {
                true
            }
        });
    }
    for sem in expired {
        sem.up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_then_sweeping_to_zero_marks_timed_out() {
        let sem = Semaphore::new(0);
        let handle = create(0, sem);
        arm(handle, 2).unwrap();
        sweep(0);
        assert!(!timed_out(handle));
        sweep(0);
        assert!(timed_out(handle));
        destroy(handle);
    }

    #[test]
    fn cancel_removes_from_timed_list_before_expiry() {
        let sem = Semaphore::new(0);
        let handle = create(0, sem);
        arm(handle, 5).unwrap();
        cancel(handle);
        sweep(0);
        assert!(!timed_out(handle));
        destroy(handle);
    }
}
