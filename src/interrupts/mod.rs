/*
 * Interrupt Manager (component B)
 *
 * Owns the dense 0..255 vector table: which IRQ (if any) a vector serves,
 * whether it is pinned to the BSP, and the list of callbacks to run when
 * it fires. Vector space is carved into bands per `SPEC_FULL.md` §4.1:
 *
 *   0x00-0x1F  CPU exceptions (handled directly by `arch::x86_64::idt`)
 *   0x20-0x2F  legacy-PIC IRQ vectors (irq + 0x20)
 *   0x30-0x7F  five APIC priority bands of 16 vectors each
 *   0x80       syscall gate
 *   0x81-0x8F  debug / scheduler IPIs
 *
 * Registration only happens at boot and during `rebalance()`; the vector
 * table is read-mostly after that, matching the "no locking needed after
 * boot because registrations stop there" discipline from §5 (the lock
 * below exists for the rebalance path, not for the hot dispatch path).
 */

pub mod routing;
pub mod stubs;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use spin::Mutex;

use crate::arch::x86_64::context::{self, ExecLevel, InterruptContext, MAX_CPUS};
use crate::config::ApicMode;
use crate::error::{KResult, KernelError};

/// `fn(ir_context&) -> bool` from §4.1: return value signals "enter the
/// in-kernel debugger", not "handled" — every registered handler on a
/// vector runs, shared-IRQ style.
pub type Isr = Box<dyn FnMut(&mut InterruptContext) -> bool + Send>;

pub const SYSCALL_VECTOR: u8 = 0x80;
pub const SCHED_IPI_VECTOR: u8 = 0x81;
pub const DEBUG_IPI_VECTOR: u8 = 0x82;

pub const PIC_BASE_VECTOR: u8 = 0x20;
pub const APIC_BAND_TOP: u8 = 0x80;
pub const APIC_BAND_BOTTOM: u8 = 0x30;
pub const BAND_WIDTH: u8 = 16;

/// Priority 1..=5 -> half-open vector window `[0x80-16p, 0x90-16p)`.
pub fn priority_band(priority: u8) -> (u8, u8) {
    debug_assert!((1..=5).contains(&priority));
    let high = 0x90u16 - (priority as u16) * 16;
    let low = 0x80u16 - (priority as u16) * 16;
    (low as u8, high as u8)
}

struct VectorSlot {
    handlers: Vec<Isr>,
    irq: Option<u8>,
    locked_to_bsp: bool,
}

impl VectorSlot {
    const fn empty() -> Self {
        Self {
            handlers: Vec::new(),
            irq: None,
            locked_to_bsp: false,
        }
    }

    fn is_free(&self) -> bool {
        self.irq.is_none() && self.handlers.is_empty()
    }
}

struct Manager {
    vectors: Vec<VectorSlot>,
    /// irq -> assigned vector, so repeat registrations are idempotent.
    isa_assignments: alloc::collections::BTreeMap<u8, u8>,
    pci_assignments: alloc::collections::BTreeMap<routing::PciDevice, u8>,
    mode: ApicMode,
}

impl Manager {
    fn new() -> Self {
        let mut vectors = Vec::with_capacity(256);
        for _ in 0..256u16 {
            vectors.push(VectorSlot::empty());
        }
        Self {
            vectors,
            isa_assignments: alloc::collections::BTreeMap::new(),
            pci_assignments: alloc::collections::BTreeMap::new(),
            mode: ApicMode::LegacyPic,
        }
    }

    fn assign_isa_vector(&mut self, irq: u8, priority: u8) -> KResult<u8> {
        if let Some(&v) = self.isa_assignments.get(&irq) {
            return Ok(v);
        }
        let vector = match self.mode {
            ApicMode::LegacyPic => {
                if irq > 0x0f {
                    return Err(KernelError::InvalidArgument);
                }
                PIC_BASE_VECTOR + irq
            }
            _ => self.find_free_in_band(priority)?,
        };
        self.isa_assignments.insert(irq, vector);
        self.vectors[vector as usize].irq = Some(irq);
        Ok(vector)
    }

    fn assign_pci_vector(&mut self, dev: routing::PciDevice, priority: u8) -> KResult<u8> {
        if let Some(&v) = self.pci_assignments.get(&dev) {
            return Ok(v);
        }
        let vector = self.find_free_in_band(priority)?;
        self.pci_assignments.insert(dev, vector);
        Ok(vector)
    }

    /// Scan from the top of the requested priority band downward for the
    /// first unused vector.
    fn find_free_in_band(&self, priority: u8) -> KResult<u8> {
        let (low, high) = priority_band(priority);
        for v in (low..high).rev() {
            if self.vectors[v as usize].is_free() {
                return Ok(v);
            }
        }
        Err(KernelError::NoMemory)
    }
}

static MANAGER: Mutex<Option<Manager>> = Mutex::new(None);

/// Per-(cpu, vector) dispatch counters, per §4.1's "increment a per-CPU,
/// per-vector counter".
static COUNTERS: [[AtomicU64; 256]; MAX_CPUS] = {
    const ZERO_ROW: [AtomicU64; 256] = {
        #[allow(clippy::declare_interior_mutable_const)]
        const Z: AtomicU64 = AtomicU64::new(0);
        [Z; 256]
    };
    [ZERO_ROW; MAX_CPUS]
};

static IRQ_DEPTH: [AtomicU8; MAX_CPUS] = [
    AtomicU8::new(0),
    AtomicU8::new(0),
    AtomicU8::new(0),
    AtomicU8::new(0),
];

pub fn init(apic_mode: ApicMode) {
    let mut guard = MANAGER.lock();
    let mut mgr = Manager::new();
    mgr.mode = apic_mode;
    *guard = Some(mgr);
    log::info!("interrupt manager initialized (mode = {:?})", apic_mode);
}

/// Register an ISA-sourced interrupt handler. `priority` is 1 (lowest) to
/// 5 (highest urgency, scanned from the band nearest 0x30).
pub fn add_handler_isa(
    isr: Isr,
    priority: u8,
    irq: u8,
    locked_to_bsp: bool,
) -> KResult<u8> {
    if !(1..=5).contains(&priority) {
        return Err(KernelError::InvalidArgument);
    }
    let mut guard = MANAGER.lock();
    let mgr = guard.as_mut().ok_or(KernelError::NoSuchResource)?;
    let vector = mgr.assign_isa_vector(irq, priority)?;
    mgr.vectors[vector as usize].locked_to_bsp = locked_to_bsp;
    mgr.vectors[vector as usize].handlers.push(isr);
    Ok(vector)
}

/// Register a PCI-sourced interrupt handler.
pub fn add_handler_pci(
    isr: Isr,
    priority: u8,
    pci_dev: routing::PciDevice,
) -> KResult<u8> {
    if !(1..=5).contains(&priority) {
        return Err(KernelError::InvalidArgument);
    }
    let mut guard = MANAGER.lock();
    let mgr = guard.as_mut().ok_or(KernelError::NoSuchResource)?;
    let vector = mgr.assign_pci_vector(pci_dev, priority)?;
    mgr.vectors[vector as usize].handlers.push(isr);
    Ok(vector)
}

/// Rewrite I/O APIC redirection entries for every non-locked vector to the
/// configured delivery mode, now that APs are online. Locked vectors (the
/// timer IRQ) never move off the BSP.
pub fn rebalance() {
    let guard = MANAGER.lock();
    let mgr = match guard.as_ref() {
        Some(m) => m,
        None => return,
    };
    if mgr.mode == ApicMode::LegacyPic {
        return;
    }
    let movable: Vec<(u8, u8)> = mgr
        .vectors
        .iter()
        .enumerate()
        .filter_map(|(v, slot)| slot.irq.map(|irq| (irq, v as u8)))
        .filter(|(_, v)| !mgr.vectors[*v as usize].locked_to_bsp)
        .collect();
    drop(guard);
    routing::rebalance(&movable);
}

fn send_eoi(vector: u8) {
    if vector < APIC_BAND_BOTTOM {
        unsafe {
            use x86_64::instructions::port::Port;
            let irq = vector - PIC_BASE_VECTOR;
            if irq >= 8 {
                Port::<u8>::new(0xA0).write(0x20u8);
            }
            Port::<u8>::new(0x20).write(0x20u8);
        }
    } else {
        routing::local_apic_eoi();
    }
}

/// The single entry point every generated vector stub (see `stubs.rs`)
/// calls. `ctx_ptr` points at the interrupted task's saved register file,
/// which the naked-asm stub built directly on the kernel stack. Returns a
/// pointer to the context that should actually be resumed: `ctx_ptr`
/// unchanged for no switch, or a different thread's saved context if the
/// scheduler decided to switch — the stub reloads `rsp` from the return
/// value before popping registers and `iretq`-ing, so the two cases are
/// handled identically by the caller.
#[unsafe(no_mangle)]
pub extern "C" fn dispatch(vector: u8, ctx_ptr: *mut InterruptContext) -> *const InterruptContext {
    let cpu = context::current_cpu_id();
    let nested = IRQ_DEPTH[cpu].fetch_add(1, Ordering::SeqCst) > 0;
    context::set_exec_level(cpu, ExecLevel::Irq);
    COUNTERS[cpu][vector as usize].fetch_add(1, Ordering::Relaxed);
    let ctx = unsafe { &mut *ctx_ptr };

    if vector == SYSCALL_VECTOR {
        context::set_exec_level(cpu, ExecLevel::Syscall);
        x86_64::instructions::interrupts::enable();
        crate::syscall::dispatch(ctx);
        x86_64::instructions::interrupts::disable();
        let next = finish(cpu, ctx_ptr, nested, false);
        IRQ_DEPTH[cpu].fetch_sub(1, Ordering::SeqCst);
        return next;
    }

    if vector == SCHED_IPI_VECTOR || vector == DEBUG_IPI_VECTOR {
        // No EOI for IPIs; the scheduler IPI exists purely to make the
        // target CPU re-enter its next scheduling decision.
        let next = finish(cpu, ctx_ptr, nested, false);
        IRQ_DEPTH[cpu].fetch_sub(1, Ordering::SeqCst);
        return next;
    }

    let mut debug_requested = false;
    {
        // Handlers must not re-enter the manager lock; pull the callbacks
        // out from under it for the duration of the call.
        let mut guard = MANAGER.lock();
        if let Some(mgr) = guard.as_mut() {
            if let Some(slot) = mgr.vectors.get_mut(vector as usize) {
                for isr in slot.handlers.iter_mut() {
                    if isr(ctx) {
                        debug_requested = true;
                    }
                }
            }
        }
    }
    send_eoi(vector);
    if debug_requested {
        // The in-kernel debugger console itself is out of scope; honor the
        // handler's request by at least surfacing it on the debug log.
        log::warn!("vector 0x{:02x} requested debugger entry", vector);
    }
    let next = finish(cpu, ctx_ptr, nested, true);
    IRQ_DEPTH[cpu].fetch_sub(1, Ordering::SeqCst);
    next
}

fn finish(
    cpu: usize,
    ctx_ptr: *mut InterruptContext,
    nested: bool,
    _was_hw_irq: bool,
) -> *const InterruptContext {
    let ctx = unsafe { &mut *ctx_ptr };
    if let crate::scheduler::signal::DeliveryOutcome::Restart =
        crate::scheduler::signal::deliver_pending_for_current(ctx)
    {
        crate::syscall::dispatch(ctx);
    }
    context::set_exec_level(cpu, ExecLevel::KThread);
    if nested {
        ctx_ptr
    } else {
        crate::scheduler::schedule_from_interrupt(ctx_ptr)
    }
}

/// Vector assignment count for a vector on a CPU; exposed for tests and
/// the debug console.
pub fn dispatch_count(cpu: usize, vector: u8) -> u64 {
    COUNTERS[cpu][vector as usize].load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bands_tile_030_07f_without_overlap() {
        for p in 1..=5u8 {
            let (low, high) = priority_band(p);
            assert_eq!(high - low, 16);
            assert!(low >= APIC_BAND_BOTTOM);
            assert!(high <= APIC_BAND_TOP);
        }
        // adjacent bands share an edge, none overlap
        let mut edges: Vec<u8> = (1..=5).map(|p| priority_band(p).0).collect();
        edges.sort_unstable();
        assert_eq!(edges, alloc::vec![0x30, 0x40, 0x50, 0x60, 0x70]);
    }

    #[test]
    fn legacy_pic_vector_is_irq_plus_0x20() {
        let mut mgr = Manager::new();
        mgr.mode = ApicMode::LegacyPic;
        let v = mgr.assign_isa_vector(1, 3).unwrap();
        assert_eq!(v, 0x21);
        // idempotent
        let v2 = mgr.assign_isa_vector(1, 3).unwrap();
        assert_eq!(v, v2);
    }

    #[test]
    fn apic_mode_scans_band_top_down() {
        let mut mgr = Manager::new();
        mgr.mode = ApicMode::ApicPhysical;
        let v = mgr.assign_isa_vector(5, 1).unwrap();
        assert_eq!(v, 0x7f, "first assignment takes the top of the band");
        let v2 = mgr.assign_isa_vector(6, 1).unwrap();
        assert_eq!(v2, 0x7e);
    }
}
