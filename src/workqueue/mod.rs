/*
 * Work-Queue Engine (component F)
 *
 * A fixed number of named, bounded-ring queues, each with a dedicated
 * per-CPU worker task at maximum priority. `schedule()` is the deferred-
 * work enqueue call everything else in the kernel uses for bottom-half
 * work; the worker loop's iteration marker is the fairness barrier that
 * keeps one saturated queue from starving the others forever.
 */

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use spin::Mutex;

use crate::arch::x86_64::context::MAX_CPUS;
use crate::error::{KResult, KernelError};
use crate::sync::semaphore::Semaphore;

/// Ring capacity per queue; must be a power of two per the bounded-ring
/// contract (head/tail counters are taken modulo this).
pub const CAPACITY: usize = 32;
/// Ticks an entry is allowed to wait before being delivered with
/// `expired = true`.
pub const TIMEOUT: u64 = crate::timer::HZ as u64 * 5;
/// Cadence at which the timer tick wakes idle workers.
pub const WQ_TICKS: u64 = (crate::timer::HZ / 10) as u64;

pub type WorkArg = Box<dyn core::any::Any + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkResult {
    Done,
    Again,
}

/// A handler consumes its `WorkArg` each call and must hand it back
/// alongside the result, even on `Done`, so a `Again` outcome can be
/// requeued with the same argument instead of losing it.
pub type Handler = Box<dyn FnMut(WorkArg, bool) -> (WorkResult, WorkArg) + Send>;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum RunWhen {
    Now,
    Later,
}

struct Entry {
    handler: Handler,
    arg: Option<WorkArg>,
    expires: u64,
    iteration: u64,
}

struct Queue {
    entries: VecDeque<Entry>,
    iteration: u64,
    owner_cpu: usize,
}

impl Queue {
    fn new(owner_cpu: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            iteration: 0,
            owner_cpu,
        }
    }
}

struct WorkerSems {
    sems: [Semaphore; MAX_CPUS],
}

static WORKER_SEMS: spin::Once<WorkerSems> = spin::Once::new();

fn worker_sems() -> &'static WorkerSems {
    WORKER_SEMS.call_once(|| WorkerSems {
        sems: core::array::from_fn(|_| Semaphore::new(0)),
    })
}

static QUEUE_REGISTRY: Mutex<Vec<Mutex<Queue>>> = Mutex::new(Vec::new());

/// Register a named queue owned by `owner_cpu`. Queues are created once
/// at boot, not dynamically, matching the "fixed number of named queues"
/// contract; returns the queue id to pass to `schedule`.
pub fn register_queue(owner_cpu: usize) -> usize {
    let mut guard = QUEUE_REGISTRY.lock();
    guard.push(Mutex::new(Queue::new(owner_cpu)));
    guard.len() - 1
}

/// `schedule(queue_id, handler, arg, run_when)`: push a deferred-work
/// entry onto the named queue. Fails with `QueueFull` once
/// `tail - head >= CAPACITY`.
pub fn schedule(
    queue_id: usize,
    handler: Handler,
    arg: WorkArg,
    run_when: RunWhen,
) -> KResult<()> {
    let registry = QUEUE_REGISTRY.lock();
    let queue_lock = registry.get(queue_id).ok_or(KernelError::NoSuchResource)?;
    let owner_cpu;
    {
        let mut queue = queue_lock.lock();
        if queue.entries.len() >= CAPACITY {
            return Err(KernelError::QueueFull);
        }
        owner_cpu = queue.owner_cpu;
        queue.entries.push_back(Entry {
            handler,
            arg: Some(arg),
            expires: crate::timer::ticks(owner_cpu) + TIMEOUT,
            iteration: 0,
        });
    }
    if run_when == RunWhen::Now {
        worker_sems().sems[owner_cpu].up();
    }
    Ok(())
}

/// Wake the worker for `cpu`; called by the timer tick hook every
/// `WQ_TICKS` so queues make progress without explicit triggers.
pub fn tick_wake(cpu: usize) {
    worker_sems().sems[cpu].up();
}

/// Per-CPU worker loop: block on the worker semaphore, then drain every
/// queue this CPU owns, applying the iteration-marker fairness barrier so
/// one perpetually-requeuing entry can't starve the rest of the queue.
pub fn worker_loop(cpu: usize) -> ! {
    loop {
        worker_sems().sems[cpu].down();
        drain_owned_queues(cpu);
    }
}

fn drain_owned_queues(cpu: usize) {
    let registry = QUEUE_REGISTRY.lock();
    for queue_lock in registry.iter() {
        let owner = queue_lock.lock().owner_cpu;
        if owner != cpu {
            continue;
        }
        drain_one_queue(queue_lock);
    }
}

fn drain_one_queue(queue_lock: &Mutex<Queue>) {
    let this_iteration = {
        let mut queue = queue_lock.lock();
        queue.iteration += 1;
        queue.iteration
    };

    loop {
        let mut entry = {
            let mut queue = queue_lock.lock();
            match queue.entries.pop_front() {
                Some(e) => e,
                None => return,
            }
        };

        if entry.iteration == this_iteration {
            // Seen this entry already this pass: requeue and stop, so
            // other queues on this CPU still get a turn.
            let mut queue = queue_lock.lock();
            queue.entries.push_front(entry);
            return;
        }

        let now = crate::timer::ticks(queue_lock.lock().owner_cpu);
        let expired = now >= entry.expires;
        let arg = entry.arg.take().expect("entry arg consumed twice");
        let (result, arg) = (entry.handler)(arg, expired);

        match result {
            WorkResult::Again if !expired => {
                entry.iteration = this_iteration;
                entry.arg = Some(arg);
                let mut queue = queue_lock.lock();
                queue.entries.push_back(entry);
            }
            _ => {
                // WorkResult::Done, or an expired entry that already ran
                // with expired=true: drop it either way.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    #[test]
    fn schedule_fails_once_capacity_is_exhausted() {
        let qid = register_queue(0);
        for _ in 0..CAPACITY {
            schedule(
                qid,
                Box::new(|arg: WorkArg, _expired| (WorkResult::Done, arg)),
                Box::new(()),
                RunWhen::Later,
            )
            .unwrap();
        }
        let result = schedule(
            qid,
            Box::new(|arg: WorkArg, _expired| (WorkResult::Done, arg)),
            Box::new(()),
            RunWhen::Later,
        );
        assert_eq!(result, Err(KernelError::QueueFull));
    }

    #[test]
    fn again_result_preserves_arg_across_retries() {
        let qid = register_queue(0);
        schedule(
            qid,
            Box::new(|arg: WorkArg, _expired| {
                let count = arg.downcast_ref::<u32>().copied().unwrap_or(0);
                if count < 2 {
                    (WorkResult::Again, Box::new(count + 1))
                } else {
                    (WorkResult::Done, arg)
                }
            }),
            Box::new(0u32),
            RunWhen::Later,
        )
        .unwrap();

        let queue_lock = &QUEUE_REGISTRY.lock()[qid];
        // Each call to drain_one_queue runs one fairness pass; the entry
        // keeps requeuing with its updated count until it reports Done.
        drain_one_queue(queue_lock);
        drain_one_queue(queue_lock);
        drain_one_queue(queue_lock);
        assert!(queue_lock.lock().entries.is_empty());
    }
}
