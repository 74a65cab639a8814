/*
 * Scheduling Policies Module
 *
 * This module contains different scheduling policy implementations.
 * Each policy implements the Scheduler trait and can be plugged into
 * the SchedulerCore at boot time.
 *
 * Available policies:
 * - PriorityQueue: 16-level FIFO run queues (current default)
 * - (Future) Cfs: Completely Fair Scheduler (like Linux)
 * - (Future) Edf: Earliest Deadline First (for real-time)
 */

pub mod priority_queue;

pub use priority_queue::PriorityQueuePolicy;
