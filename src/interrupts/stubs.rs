/*
 * Generated IDT Stubs for the Dynamic Vector Range
 *
 * Vectors 0x20-0x8F (legacy PIC IRQs, the five APIC priority bands,
 * syscall, and the two IPIs) all funnel through the same naked-asm shape:
 * build an `InterruptContext` on the interrupt stack, hand it to
 * `interrupts::dispatch`, then resume whatever context it returns — which
 * may belong to a different thread, the mechanism the preemptive
 * scheduler switch already relied on for the timer vector.
 *
 * `stub::<V>` is a const-generic naked function so the 112 distinct entry
 * points are monomorphized instead of hand-written; `install` just lists
 * the vectors once to both instantiate and wire them into the IDT.
 */

use x86_64::structures::idt::InterruptDescriptorTable;

use super::dispatch;

#[unsafe(naked)]
unsafe extern "C" fn stub<const VECTOR: u8>() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rsi, rsp",
        "mov dil, {v}",
        "call {dispatch_fn}",
        "mov rsp, rax",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
        v = const VECTOR,
        dispatch_fn = sym dispatch,
    )
}

/// Install the generated stubs for every vector in 0x20..=0x8F.
pub fn install(idt: &mut InterruptDescriptorTable) {
    macro_rules! install_vectors {
        ($($v:literal),* $(,)?) => {
            $(
                unsafe {
                    idt[$v].set_handler_addr(core::mem::transmute::<*const (), x86_64::VirtAddr>(
                        stub::<$v> as *const (),
                    ));
                }
            )*
        };
    }

    install_vectors!(
        0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e,
        0x2f, 0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d,
        0x3e, 0x3f, 0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4a, 0x4b, 0x4c,
        0x4d, 0x4e, 0x4f, 0x50, 0x51, 0x52, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x5b,
        0x5c, 0x5d, 0x5e, 0x5f, 0x60, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6a,
        0x6b, 0x6c, 0x6d, 0x6e, 0x6f, 0x70, 0x71, 0x72, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79,
        0x7a, 0x7b, 0x7c, 0x7d, 0x7e, 0x7f, 0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88,
        0x89, 0x8a, 0x8b, 0x8c, 0x8d, 0x8e, 0x8f,
    );
}
