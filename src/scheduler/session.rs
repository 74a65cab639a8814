/*
 * Sessions and Process Groups
 *
 * Minimal job-control bookkeeping: every process belongs to exactly one
 * process group, and every process group to exactly one session. A
 * session optionally owns a controlling terminal (`ctty` on `Process`),
 * acquired by the session leader and inherited by its descendants until
 * explicitly released.
 */

use super::process::ProcessId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessGroupId(pub usize);

/// `setsid()`: make `pid` the leader of a new session and a new process
/// group, detaching it from any controlling terminal. Fails if `pid` is
/// already a process group leader.
pub fn setsid(pid: ProcessId) -> Result<SessionId, &'static str> {
    super::with_scheduler_mut(|s| {
        let is_group_leader = s
            .processes
            .values()
            .any(|p| p.pgid == ProcessGroupId(pid.0) && p.id != pid);
        if is_group_leader {
            return Err("process is already a process group leader");
        }
        let process = s.get_process_mut(pid).ok_or("process not found")?;
        process.session_id = SessionId(pid.0);
        process.pgid = ProcessGroupId(pid.0);
        process.ctty = None;
        Ok(SessionId(pid.0))
    })
}

/// `setpgid()`: move `pid` into process group `pgid`, which must belong
/// to the same session as `pid`'s current group (or be `pid` itself,
/// creating a new group).
pub fn setpgid(pid: ProcessId, pgid: ProcessGroupId) -> Result<(), &'static str> {
    super::with_scheduler_mut(|s| {
        let session = s.get_process(pid).ok_or("process not found")?.session_id;
        if pgid.0 != pid.0 {
            let target_session = s
                .processes
                .values()
                .find(|p| p.pgid == pgid)
                .map(|p| p.session_id);
            if target_session.is_some_and(|sid| sid != session) {
                return Err("target process group is in a different session");
            }
        }
        s.get_process_mut(pid).ok_or("process not found")?.pgid = pgid;
        Ok(())
    })
}

/// Acquire `tty` as the controlling terminal for `pid`'s session. Only the
/// session leader of a session without a controlling terminal may do this.
pub fn acquire_ctty(pid: ProcessId, tty: u32) -> Result<(), &'static str> {
    super::with_scheduler_mut(|s| {
        let process = s.get_process(pid).ok_or("process not found")?;
        if process.session_id != SessionId(pid.0) {
            return Err("only a session leader may acquire a controlling terminal");
        }
        if process.ctty.is_some() {
            return Err("session already has a controlling terminal");
        }
        s.get_process_mut(pid).unwrap().ctty = Some(tty);
        Ok(())
    })
}
