/*
 * CPU-Visible Interrupt Context
 *
 * The architectural pieces every other subsystem is built on top of:
 * the frame the CPU pushes on interrupt entry, the full register file a
 * preemptive context switch needs to save/restore, and the task's current
 * execution level. This is component A ("low-level CPU/arch glue") in the
 * system overview — everything above this module reaches the CPU only
 * through these types.
 */

use core::sync::atomic::{AtomicU8, Ordering};

/// Interrupt frame pushed by the CPU automatically on interrupt entry.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl Default for InterruptFrame {
    fn default() -> Self {
        Self {
            rip: 0,
            cs: 0x08,
            rflags: 0x202,
            rsp: 0,
            ss: 0x10,
        }
    }
}

/// Full saved register context for a task, used both for preemptive
/// context switches and as the mutable "ir_context&" handlers and signal
/// delivery patch eip/esp through.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptContext {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub iret_frame: InterruptFrame,
}

impl Default for InterruptContext {
    fn default() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            iret_frame: InterruptFrame::default(),
        }
    }
}

/// Task execution level, tracked per CPU and updated on every interrupt
/// entry per `SPEC_FULL.md` §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecLevel {
    User = 0,
    KThread = 1,
    Irq = 2,
    Syscall = 3,
}

impl ExecLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ExecLevel::User,
            1 => ExecLevel::KThread,
            2 => ExecLevel::Irq,
            _ => ExecLevel::Syscall,
        }
    }
}

/// Per-CPU current execution level. Single atomic per CPU is enough: it is
/// only ever read/written by code running on that CPU.
pub const MAX_CPUS: usize = 4;

static EXEC_LEVEL: [AtomicU8; MAX_CPUS] = [
    AtomicU8::new(ExecLevel::KThread as u8),
    AtomicU8::new(ExecLevel::KThread as u8),
    AtomicU8::new(ExecLevel::KThread as u8),
    AtomicU8::new(ExecLevel::KThread as u8),
];

/// Which CPU is "this" CPU. Until SMP bring-up this core only ever runs on
/// the BSP (cpu 0); the accessor exists so the rest of the kernel never
/// hardcodes the id.
pub fn current_cpu_id() -> usize {
    0
}

pub fn set_exec_level(cpu: usize, level: ExecLevel) {
    EXEC_LEVEL[cpu].store(level as u8, Ordering::SeqCst);
}

pub fn exec_level(cpu: usize) -> ExecLevel {
    ExecLevel::from_u8(EXEC_LEVEL[cpu].load(Ordering::SeqCst))
}
