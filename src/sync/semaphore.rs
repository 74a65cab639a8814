/*
 * Counting Semaphore
 *
 * The one blocking primitive every other suspension point (sleep, ECB
 * waits, work-queue workers) is built from. `down_interruptible` is the
 * path signal delivery needs to unwind out of: it returns `Err(())` if a
 * pending signal woke the task instead of an `up()`.
 */

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use spin::Mutex;

use crate::scheduler::thread::ThreadId;

struct Inner {
    count: i32,
    waiters: VecDeque<ThreadId>,
}

/// Cheap to clone: every clone shares the same counter and waiter queue.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<Mutex<Inner>>,
}

impl Semaphore {
    pub fn new(initial: i32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                count: initial,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Non-interruptible down: blocks until `up()` is called, ignoring
    /// pending signals. Used for short, bounded internal waits.
    pub fn down(&self) {
        loop {
            {
                let mut guard = self.inner.lock();
                if guard.count > 0 {
                    guard.count -= 1;
                    return;
                }
                guard.waiters.push_back(crate::scheduler::thread::ThreadManager::current_id());
            }
            crate::scheduler::thread::ThreadManager::block_current(
                crate::scheduler::types::BlockReason::WaitingForLock { lock_id: self.id() },
            );
        }
    }

    /// Interruptible down: as `down`, but returns `Err(())` if woken by a
    /// pending signal before the count became available.
    pub fn down_interruptible(&self) -> Result<(), ()> {
        loop {
            {
                let mut guard = self.inner.lock();
                if guard.count > 0 {
                    guard.count -= 1;
                    return Ok(());
                }
                guard.waiters.push_back(crate::scheduler::thread::ThreadManager::current_id());
            }
            if crate::scheduler::signal::has_pending_for_current() {
                self.remove_waiter(crate::scheduler::thread::ThreadManager::current_id());
                return Err(());
            }
            crate::scheduler::thread::ThreadManager::block_current(
                crate::scheduler::types::BlockReason::WaitingForLock { lock_id: self.id() },
            );
        }
    }

    /// Release one unit, waking the longest-waiting task if any.
    pub fn up(&self) {
        let woken = {
            let mut guard = self.inner.lock();
            guard.count += 1;
            guard.waiters.pop_front()
        };
        if let Some(tid) = woken {
            crate::scheduler::thread::ThreadManager::wake(tid);
        }
    }

    fn remove_waiter(&self, tid: ThreadId) {
        let mut guard = self.inner.lock();
        if let Some(pos) = guard.waiters.iter().position(|&w| w == tid) {
            guard.waiters.remove(pos);
        }
    }

    /// Stable identity for this semaphore, used only as a `BlockReason`
    /// tag for debugging/introspection.
    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_increments_count_when_no_waiters() {
        let sem = Semaphore::new(0);
        sem.up();
        assert_eq!(sem.inner.lock().count, 1);
    }

    #[test]
    fn clone_shares_the_same_counter() {
        let a = Semaphore::new(0);
        let b = a.clone();
        b.up();
        assert_eq!(a.inner.lock().count, 1);
    }
}
