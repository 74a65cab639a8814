/*
 * Process Credentials
 *
 * Real and effective uid/gid, the minimum needed for file-permission
 * checks and for `setuid`/`setgid` semantics. CLUU has no notion of a
 * user database; ids are opaque integers assigned by whoever creates the
 * process (usually inherited from the parent via `fork`).
 */

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
}

impl Credentials {
    pub const ROOT: Credentials = Credentials {
        uid: 0,
        gid: 0,
        euid: 0,
        egid: 0,
    };

    /// Credentials for kernel-owned processes: always root, never subject
    /// to permission checks.
    pub fn kernel() -> Self {
        Self::ROOT
    }

    pub fn is_root(&self) -> bool {
        self.euid == 0
    }

    /// `setuid()`: root may set both uid and euid to anything. A non-root
    /// process may only set uid to its own real uid, and doing so changes
    /// only the effective uid (the real uid never moves for a non-root
    /// caller).
    pub fn set_uid(&mut self, uid: u32) -> Result<(), &'static str> {
        if self.is_root() {
            self.uid = uid;
            self.euid = uid;
            return Ok(());
        }
        if uid != self.uid {
            return Err("permission denied");
        }
        self.euid = uid;
        Ok(())
    }

    /// `seteuid()`: root may set the effective uid to anything. A non-root
    /// process may only set it to its own real or effective uid.
    pub fn set_euid(&mut self, euid: u32) -> Result<(), &'static str> {
        if !self.is_root() && euid != self.uid && euid != self.euid {
            return Err("permission denied");
        }
        self.euid = euid;
        Ok(())
    }

    /// `setgid()`: symmetric with `set_uid`, but gated on the effective uid
    /// being root (there is no separate "is_root" notion for groups).
    pub fn set_gid(&mut self, gid: u32) -> Result<(), &'static str> {
        if self.is_root() {
            self.gid = gid;
            self.egid = gid;
            return Ok(());
        }
        if gid != self.gid {
            return Err("permission denied");
        }
        self.egid = gid;
        Ok(())
    }

    /// `setegid()`: symmetric with `set_euid`.
    pub fn set_egid(&mut self, egid: u32) -> Result<(), &'static str> {
        if !self.is_root() && egid != self.gid && egid != self.egid {
            return Err("permission denied");
        }
        self.egid = egid;
        Ok(())
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::ROOT
    }
}
