/*
 * Boot-Time Kernel Parameters
 *
 * Parses the whitespace-separated `key` / `key=value` blob handed to the
 * kernel by the bootloader into a `KernelConfig`. Consumed once during
 * early init, before the interrupt manager or scheduler start up, since
 * both read fields from it (`apic` governs routing mode, `irq_watch`
 * and `irq_log` govern interrupt-manager tracing).
 *
 * `vga` is parsed and retained only so startup ordering is observable;
 * its value is handed unmodified to the (out-of-scope) display driver.
 */

use alloc::string::String;
use alloc::vec::Vec;

/// Interrupt routing/delivery mode, selected by the `apic=` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApicMode {
    /// Legacy 8259 PIC, vectors fixed at `irq + 0x20`.
    LegacyPic,
    /// I/O APIC, redirection entries use physical destination mode to BSP.
    ApicPhysical,
    /// I/O APIC, redirection entries use logical fixed destination mode.
    ApicLogicalFixed,
    /// I/O APIC, redirection entries use logical lowest-priority mode.
    ApicLogicalLowestPriority,
}

impl ApicMode {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ApicMode::LegacyPic),
            1 => Some(ApicMode::ApicPhysical),
            2 => Some(ApicMode::ApicLogicalFixed),
            3 => Some(ApicMode::ApicLogicalLowestPriority),
            _ => None,
        }
    }
}

impl Default for ApicMode {
    fn default() -> Self {
        ApicMode::LegacyPic
    }
}

/// Parsed boot-time kernel configuration.
#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    pub apic_mode: ApicMode,
    /// Vector to trace verbosely, if `irq_watch=<vector>` was given.
    pub irq_watch: Option<u8>,
    /// Enable interrupt-manager debug logging.
    pub irq_log: bool,
    /// Video mode id, forwarded to the (external) display driver.
    pub vga: Option<String>,
}

impl KernelConfig {
    /// Parse a whitespace-separated `key` / `key=value` parameter blob.
    ///
    /// Unknown keys are ignored (forward-compatible with parameters meant
    /// for out-of-scope collaborators such as device drivers).
    pub fn parse(blob: &str) -> Self {
        let mut cfg = KernelConfig::default();
        for token in blob.split_whitespace() {
            let mut parts = token.splitn(2, '=');
            let key = parts.next().unwrap_or("");
            let value = parts.next();
            match key {
                "apic" => {
                    if let Some(v) = value.and_then(|v| v.parse::<u32>().ok()) {
                        if let Some(mode) = ApicMode::from_code(v) {
                            cfg.apic_mode = mode;
                        }
                    }
                }
                "irq_watch" => {
                    cfg.irq_watch = value.and_then(|v| v.parse::<u8>().ok());
                }
                "irq_log" => {
                    cfg.irq_log = true;
                }
                "vga" => {
                    cfg.vga = value.map(String::from);
                }
                _ => {}
            }
        }
        cfg
    }

    /// Split helper retained for callers that want the raw tokens (tests,
    /// diagnostic dumps) without re-parsing.
    pub fn tokens(blob: &str) -> Vec<&str> {
        blob.split_whitespace().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apic_mode() {
        let cfg = KernelConfig::parse("apic=2 irq_log");
        assert_eq!(cfg.apic_mode, ApicMode::ApicLogicalFixed);
        assert!(cfg.irq_log);
        assert_eq!(cfg.irq_watch, None);
    }

    #[test]
    fn defaults_to_legacy_pic() {
        let cfg = KernelConfig::parse("vga=800x600x32");
        assert_eq!(cfg.apic_mode, ApicMode::LegacyPic);
        assert_eq!(cfg.vga.as_deref(), Some("800x600x32"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = KernelConfig::parse("quiet nosmp=1 apic=1");
        assert_eq!(cfg.apic_mode, ApicMode::ApicPhysical);
    }

    #[test]
    fn irq_watch_vector_is_parsed() {
        let cfg = KernelConfig::parse("irq_watch=48");
        assert_eq!(cfg.irq_watch, Some(48));
    }
}
