/*
 * I/O APIC Redirection and Rebalancing
 *
 * Grounded on the local/IO-APIC redirection-entry model: each legacy IRQ
 * line has a redirection entry selecting a destination vector, delivery
 * mode, polarity and trigger mode, and destination CPU (or CPU set).
 * `rebalance()` rewrites those entries once all APs are online so work
 * can spread off the BSP — except for vectors pinned there (the timer).
 */

use alloc::vec::Vec;
use bitflags::bitflags;

/// `IA32_APIC_BASE` MSR: bits 12..=35 hold the local APIC's physical base
/// address (it is relocatable, though every board we run on leaves it at
/// the architectural default of `0xfee00000`).
const IA32_APIC_BASE_MSR: u32 = 0x1b;

fn local_apic_base() -> usize {
    let raw = unsafe { x86::msr::rdmsr(IA32_APIC_BASE_MSR) };
    (raw & 0xffff_f000) as usize
}

/// A PCI device identified by (bus, device, function), used as the key
/// for shared PCI interrupt-line registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PciDevice {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

bitflags! {
    /// I/O APIC redirection-entry flags (subset actually used here).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RedirFlags: u32 {
        const LEVEL_TRIGGERED = 1 << 0;
        const ACTIVE_LOW      = 1 << 1;
        const LOGICAL_DEST    = 1 << 2;
        const MASKED          = 1 << 3;
    }
}

/// One I/O APIC redirection table entry as the rebalancer understands it.
#[derive(Debug, Clone, Copy)]
pub struct RoutingEntry {
    pub irq: u8,
    pub vector: u8,
    pub dest_cpu: u8,
    pub flags: RedirFlags,
}

/// Redirection table for one I/O APIC. Real systems may have more than
/// one; this kernel's boot topology has exactly one, matching the single
/// `BusEntry` ISA bus BOOTBOOT hands us.
pub struct IoApicEntry {
    pub apic_id: u8,
    pub gsi_base: u32,
    pub entries: Vec<RoutingEntry>,
}

/// A bus on the system, carrying its own IRQ-to-GSI remap (identity for
/// ISA on this board).
pub struct BusEntry {
    pub bus_id: u8,
    pub is_pci: bool,
}

/// Global routing table: one ISA bus, one I/O APIC. Populated lazily by
/// `rebalance()`'s first call; reads of `local_apic_eoi` don't need it.
static ROUTING: spin::Mutex<Option<IoApicEntry>> = spin::Mutex::new(None);

/// Send EOI to the local APIC. Used for every vector >= 0x30 once a local
/// APIC is active; falls back to a no-op before `rebalance`/APIC bring-up
/// has run, since in legacy-PIC mode those vectors never reach here.
pub fn local_apic_eoi() {
    unsafe {
        // The EOI register is write-any-value-to-clear.
        let eoi_reg = (local_apic_base() + 0xb0) as *mut u32;
        core::ptr::write_volatile(eoi_reg, 0);
    }
}

/// Rewrite the I/O APIC redirection entries for the given (irq, vector)
/// pairs, spreading them round-robin across the online APs. Locked-to-BSP
/// vectors are filtered out by the caller before this runs.
pub fn rebalance(movable: &[(u8, u8)]) {
    if movable.is_empty() {
        return;
    }
    let cpu_count = crate::scheduler::scheduler_manager::online_cpu_count().max(1);
    let mut guard = ROUTING.lock();
    let table = guard.get_or_insert_with(|| IoApicEntry {
        apic_id: 0,
        gsi_base: 0,
        entries: Vec::new(),
    });
    table.entries.clear();
    for (i, &(irq, vector)) in movable.iter().enumerate() {
        let dest_cpu = (i % cpu_count) as u8;
        table.entries.push(RoutingEntry {
            irq,
            vector,
            dest_cpu,
            flags: RedirFlags::LOGICAL_DEST,
        });
        program_redirection(irq, vector, dest_cpu);
    }
    log::info!(
        "interrupt rebalance: {} vectors spread across {} cpus",
        movable.len(),
        cpu_count
    );
}

/// Program one I/O APIC redirection-table register pair. This board's
/// I/O APIC sits at the fixed MMIO window `0xfec00000`, matching the
/// BOOTBOOT-described ISA/IOAPIC topology.
fn program_redirection(irq: u8, vector: u8, dest_cpu: u8) {
    const IOAPIC_BASE: usize = 0xfec0_0000;
    const IOREGSEL: usize = 0x00;
    const IOWIN: usize = 0x10;
    let redir_index = 0x10 + (irq as usize) * 2;
    unsafe {
        let regsel = (IOAPIC_BASE + IOREGSEL) as *mut u32;
        let win = (IOAPIC_BASE + IOWIN) as *mut u32;
        core::ptr::write_volatile(regsel, redir_index as u32);
        core::ptr::write_volatile(win, vector as u32);
        core::ptr::write_volatile(regsel, (redir_index + 1) as u32);
        core::ptr::write_volatile(win, (dest_cpu as u32) << 24);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pci_device_ordering_is_by_bus_then_device_then_function() {
        let a = PciDevice { bus: 0, device: 1, function: 0 };
        let b = PciDevice { bus: 0, device: 2, function: 0 };
        assert!(a < b);
    }
}
