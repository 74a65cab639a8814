/*
 * Priority-Queue Scheduling Policy
 *
 * Sixteen FIFO run queues, one per priority level (0 lowest .. 15
 * highest, see `types::SCHED_MAX_PRIO`). `pick_next` always dispatches
 * from the highest non-empty queue; within a level, threads run in
 * FIFO order. A thread moved between levels by `set_thread_priority`
 * is found and relocated on its next `ThreadCreated`/`ThreadWoke`-style
 * re-insertion rather than tracked live, since the policy only stores
 * `ThreadId`s, not full thread state.
 *
 * Boot mode behaves as in the old round-robin policy: only threads
 * belonging to critical processes are dispatched, regardless of level.
 */

use alloc::collections::VecDeque;

use super::super::{
    SchedulerMode, ThreadId,
    events::SchedEvent,
    traits::{KernelSchedCtx, Scheduler},
    types::{CpuId, DispatchDecision, Priority, TimeSliceTicks, SCHED_MAX_PRIO},
};

const LEVELS: usize = SCHED_MAX_PRIO as usize + 1;

pub struct PriorityQueuePolicy {
    /// queues[p] holds ready threads at priority level p
    queues: [VecDeque<ThreadId>; LEVELS],
    mode: SchedulerMode,
    boot_ready_count: usize,
}

impl PriorityQueuePolicy {
    pub fn new() -> Self {
        Self {
            queues: core::array::from_fn(|_| VecDeque::new()),
            mode: SchedulerMode::Boot {
                critical_count: 0,
                ready_count: 0,
            },
            boot_ready_count: 0,
        }
    }

    fn remove(&mut self, tid: ThreadId) {
        for q in self.queues.iter_mut() {
            q.retain(|&id| id != tid);
        }
    }

    fn insert(&mut self, tid: ThreadId, priority: Priority) {
        self.remove(tid);
        self.queues[priority.as_usize()].push_back(tid);
    }

    fn contains(&self, tid: ThreadId) -> bool {
        self.queues.iter().any(|q| q.contains(&tid))
    }
}

impl Scheduler for PriorityQueuePolicy {
    fn on_event(&mut self, ctx: &mut dyn KernelSchedCtx, event: SchedEvent) {
        match event {
            SchedEvent::ThreadCreated { tid, priority } => {
                self.insert(tid, priority);
            }

            SchedEvent::ThreadWoke { tid, .. } => {
                if !self.contains(tid) {
                    let priority = ctx.thread_priority(tid).unwrap_or(Priority::NORMAL);
                    self.insert(tid, priority);
                }
            }

            SchedEvent::ThreadYielded { tid } => {
                if !self.contains(tid) {
                    let priority = ctx.thread_priority(tid).unwrap_or(Priority::NORMAL);
                    self.insert(tid, priority);
                }
            }

            SchedEvent::ThreadBlocked { tid, .. } | SchedEvent::ThreadExited { tid, .. } => {
                self.remove(tid);
            }

            SchedEvent::PriorityChanged { tid, new_priority, .. } => {
                if self.contains(tid) {
                    self.insert(tid, new_priority);
                }
            }

            SchedEvent::Tick { .. } => {}

            SchedEvent::ModeChanged { new_mode, .. } => {
                self.mode = new_mode;
            }

            SchedEvent::ProcessReady { pid } => {
                if matches!(self.mode, SchedulerMode::Boot { .. }) {
                    self.boot_ready_count += 1;
                    let _ = pid;
                }
            }

            _ => {}
        }
    }

    fn pick_next(&mut self, ctx: &mut dyn KernelSchedCtx, _cpu: CpuId) -> DispatchDecision {
        let boot = matches!(self.mode, SchedulerMode::Boot { .. });

        for level in (0..LEVELS).rev() {
            let len = self.queues[level].len();
            let mut checked = 0;
            while checked < len {
                let Some(tid) = self.queues[level].pop_front() else {
                    break;
                };
                checked += 1;

                if boot {
                    let is_critical = ctx
                        .thread_process(tid)
                        .map(|pid| ctx.is_critical_process(pid))
                        .unwrap_or(false);
                    if is_critical && ctx.is_runnable(tid) {
                        self.queues[level].push_back(tid);
                        return DispatchDecision::run_thread(tid, TimeSliceTicks::DEFAULT);
                    }
                    self.queues[level].push_back(tid);
                    continue;
                }

                if ctx.is_runnable(tid) {
                    self.queues[level].push_back(tid);
                    return DispatchDecision::run_thread(tid, TimeSliceTicks::DEFAULT);
                }
                // not runnable: drop, it re-enters via ThreadWoke
            }
        }

        DispatchDecision::idle()
    }

    fn on_switched(
        &mut self,
        _ctx: &mut dyn KernelSchedCtx,
        _cpu: CpuId,
        _prev: Option<ThreadId>,
        _next: Option<ThreadId>,
    ) {
    }

    fn name(&self) -> &'static str {
        "PriorityQueue"
    }
}

impl Default for PriorityQueuePolicy {
    fn default() -> Self {
        Self::new()
    }
}
