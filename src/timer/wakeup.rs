/*
 * Sleep/Alarm Wakeup List
 *
 * One shared, lock-protected list of pending wakeups, each owned by a
 * process. `sleep()` and `alarm()` both insert entries here; the tick
 * handler's step 4 (see `timer::on_tick`) is the only reader, running on
 * the BSP every `HZ/2` ticks.
 */

use alloc::collections::VecDeque;

use spin::Mutex;

use crate::error::KResult;
use crate::scheduler::process::ProcessId;
use crate::sync::semaphore::Semaphore;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Sleep,
    Alarm,
}

struct WakeupEntry {
    kind: Kind,
    process: ProcessId,
    expiry_tick: u64,
    /// Only populated for `Kind::Sleep`: the semaphore the sleeper is
    /// blocked on, released when the entry expires.
    sem: Option<Semaphore>,
}

static WAKEUPS: Mutex<VecDeque<WakeupEntry>> = Mutex::new(VecDeque::new());

/// `sleep(s)`: insert a sleep record and block on an interruptible
/// semaphore until it's released by the tick handler or a signal arrives.
pub fn sleep(seconds: u32) -> KResult<u32> {
    let sem = Semaphore::new(0);
    let now = crate::timer::ticks(0);
    let expiry = now + (seconds as u64) * crate::timer::HZ as u64;
    let process = crate::scheduler::process::ProcessManager::current_id()
        .ok_or(crate::error::KernelError::NoSuchResource)?;

    {
        let mut list = WAKEUPS.lock();
        list.push_back(WakeupEntry {
            kind: Kind::Sleep,
            process,
            expiry_tick: expiry,
            sem: Some(sem.clone()),
        });
    }

    match sem.down_interruptible() {
        Ok(()) => {
            remove_entry(process, Kind::Sleep);
            Ok(0)
        }
        Err(_interrupted) => {
            let now = crate::timer::ticks(0);
            remove_entry(process, Kind::Sleep);
            let remaining_ticks = expiry.saturating_sub(now);
            Ok((remaining_ticks / crate::timer::HZ as u64) as u32)
        }
    }
}

fn remove_entry(process: ProcessId, kind: Kind) {
    let mut list = WAKEUPS.lock();
    if let Some(pos) = list
        .iter()
        .position(|e| e.process == process && e.kind == kind)
    {
        list.remove(pos);
    }
}

/// `alarm(s)`: install, replace, or (if `s == 0`) cancel the calling
/// process's SIGALRM wakeup. Returns the previous alarm's remaining
/// seconds, or 0 if none was pending.
pub fn alarm(seconds: u32) -> KResult<u32> {
    let process = crate::scheduler::process::ProcessManager::current_id()
        .ok_or(crate::error::KernelError::NoSuchResource)?;
    let now = crate::timer::ticks(0);
    let mut list = WAKEUPS.lock();

    let previous_remaining = if let Some(pos) = list
        .iter()
        .position(|e| e.process == process && e.kind == Kind::Alarm)
    {
        let entry = list.remove(pos).unwrap();
        (entry.expiry_tick.saturating_sub(now) / crate::timer::HZ as u64) as u32
    } else {
        0
    };

    if seconds > 0 {
        list.push_back(WakeupEntry {
            kind: Kind::Alarm,
            process,
            expiry_tick: now + (seconds as u64) * crate::timer::HZ as u64,
            sem: None,
        });
    }

    Ok(previous_remaining)
}

/// Step 4 of the tick handler: scan for expired entries. Runs on the BSP
/// only, at `HZ/2` cadence.
pub fn sweep(now: u64) {
    let mut expired_sems = alloc::vec::Vec::new();
    let mut expired_alarms = alloc::vec::Vec::new();

    {
        let mut list = WAKEUPS.lock();
        list.retain(|entry| {
            if entry.expiry_tick > now {
                return true;
            }
            match entry.kind {
                Kind::Sleep => {
                    if let Some(sem) = &entry.sem {
                        expired_sems.push(sem.clone());
                    }
                    // Left on the list; the sleeper removes it on wake.
                    true
                }
                Kind::Alarm => {
                    expired_alarms.push(entry.process);
                    false
                }
            }
        });
    }

    for sem in expired_sems {
        sem.up();
    }
    for process in expired_alarms {
        let _ = crate::scheduler::signal::kill(process, crate::scheduler::signal::SIGALRM);
    }
}
