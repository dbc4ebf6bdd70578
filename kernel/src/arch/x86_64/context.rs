//! Interrupt register context and the low-level entry stubs.
//!
//! [`PtRegs`] is the one canonical register frame layout in the kernel.
//! The assembly stubs push it on interrupt entry, the dispatcher reads
//! it, and the scheduler writes it into a new task's stack to bootstrap
//! the first switch. Field order mirrors the push sequence exactly; a
//! second layout anywhere would desynchronize dispatch from task
//! creation.

/// Saved register context, in stack order from low to high address:
/// the general-purpose registers pushed by the common entry, the vector
/// and error code pushed by the per-vector stub (a dummy zero when the
/// CPU supplies none), then the CPU's `iretq` frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PtRegs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// RFLAGS for a fresh kernel task: IF plus the always-one bit.
pub const RFLAGS_KERNEL_TASK: u64 = 0x202;

impl PtRegs {
    pub const fn zeroed() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rdi: 0,
            rsi: 0,
            rbp: 0,
            rbx: 0,
            rdx: 0,
            rcx: 0,
            rax: 0,
            vector: 0,
            error_code: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    /// Bootstrap frame for a new kernel task: restoring it "returns"
    /// into `entry` with interrupts enabled on the task's own stack.
    pub fn new_kernel_task(entry: u64, stack_ptr: u64, cs: u16, ss: u16) -> Self {
        Self {
            rip: entry,
            cs: cs as u64,
            rflags: RFLAGS_KERNEL_TASK,
            rsp: stack_ptr,
            ss: ss as u64,
            ..Self::zeroed()
        }
    }
}

// ---------------------------------------------------------------------------
// Entry stubs
// ---------------------------------------------------------------------------
//
// Exception vectors 0-20 and the 16 IRQ vectors each get a tiny stub
// that pushes a dummy error code (unless the CPU pushed a real one) and
// the vector number, then falls into the common entry. The common entry
// saves the general-purpose registers to complete a PtRegs frame, hands
// its address to `interrupt_dispatch`, and reloads RSP from the return
// value, which is how a context switch happens.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
core::arch::global_asm!(
    r#"
.macro EXC_NOERR num
exc_stub_\num:
    push 0
    push \num
    jmp interrupt_entry
.endm

.macro EXC_ERR num
exc_stub_\num:
    push \num
    jmp interrupt_entry
.endm

.macro IRQ_STUB num
irq_stub_\num:
    push 0
    push (0x20 + \num)
    jmp interrupt_entry
.endm

EXC_NOERR 0
EXC_NOERR 1
EXC_NOERR 2
EXC_NOERR 3
EXC_NOERR 4
EXC_NOERR 5
EXC_NOERR 6
EXC_NOERR 7
EXC_ERR 8
EXC_NOERR 9
EXC_ERR 10
EXC_ERR 11
EXC_ERR 12
EXC_ERR 13
EXC_ERR 14
EXC_NOERR 15
EXC_NOERR 16
EXC_ERR 17
EXC_NOERR 18
EXC_NOERR 19
EXC_NOERR 20

IRQ_STUB 0
IRQ_STUB 1
IRQ_STUB 2
IRQ_STUB 3
IRQ_STUB 4
IRQ_STUB 5
IRQ_STUB 6
IRQ_STUB 7
IRQ_STUB 8
IRQ_STUB 9
IRQ_STUB 10
IRQ_STUB 11
IRQ_STUB 12
IRQ_STUB 13
IRQ_STUB 14
IRQ_STUB 15

.global vector_ignore_stub
vector_ignore_stub:
    push 0
    push 0xff
    jmp interrupt_entry

interrupt_entry:
    push rax
    push rcx
    push rdx
    push rbx
    push rbp
    push rsi
    push rdi
    push r8
    push r9
    push r10
    push r11
    push r12
    push r13
    push r14
    push r15

    mov rdi, rsp
    call interrupt_dispatch
    mov rsp, rax

    pop r15
    pop r14
    pop r13
    pop r12
    pop r11
    pop r10
    pop r9
    pop r8
    pop rdi
    pop rsi
    pop rbp
    pop rbx
    pop rdx
    pop rcx
    pop rax

    add rsp, 16
    iretq

.balign 8
.global exception_stub_table
exception_stub_table:
    .quad exc_stub_0
    .quad exc_stub_1
    .quad exc_stub_2
    .quad exc_stub_3
    .quad exc_stub_4
    .quad exc_stub_5
    .quad exc_stub_6
    .quad exc_stub_7
    .quad exc_stub_8
    .quad exc_stub_9
    .quad exc_stub_10
    .quad exc_stub_11
    .quad exc_stub_12
    .quad exc_stub_13
    .quad exc_stub_14
    .quad exc_stub_15
    .quad exc_stub_16
    .quad exc_stub_17
    .quad exc_stub_18
    .quad exc_stub_19
    .quad exc_stub_20

.global irq_stub_table
irq_stub_table:
    .quad irq_stub_0
    .quad irq_stub_1
    .quad irq_stub_2
    .quad irq_stub_3
    .quad irq_stub_4
    .quad irq_stub_5
    .quad irq_stub_6
    .quad irq_stub_7
    .quad irq_stub_8
    .quad irq_stub_9
    .quad irq_stub_10
    .quad irq_stub_11
    .quad irq_stub_12
    .quad irq_stub_13
    .quad irq_stub_14
    .quad irq_stub_15
"#
);

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
extern "C" {
    /// Addresses of the exception stubs for vectors 0-20.
    pub static exception_stub_table: [usize; 21];
    /// Addresses of the IRQ stubs for vectors 0x20-0x2F.
    pub static irq_stub_table: [usize; 16];
    /// Stub installed on every vector nothing else claims.
    pub fn vector_ignore_stub();
}
