//! Fatal-error plumbing: the register-dumping `die` used by exception
//! dispatch. The actual `#[panic_handler]` lives with the kernel binary
//! (`main.rs`); on the host target the test harness's unwinding panic
//! is exactly what we want.

use crate::arch::x86_64::context::PtRegs;

/// Dump the interrupted register context and panic. Exceptions are
/// unrecoverable; this never returns.
pub fn die(msg: &str, regs: &PtRegs) -> ! {
    pr_emerg!("!! KERNEL EXCEPTION !!");
    pr_emerg!(
        "{} (vector {:#x}, error code {:#x})",
        msg,
        regs.vector,
        regs.error_code
    );
    pr_crit!("Registers:");
    pr_crit!(
        "  RIP: {:#018x}  RSP: {:#018x}  RFLAGS: {:#010x}",
        regs.rip,
        regs.rsp,
        regs.rflags
    );
    pr_crit!(
        "  RAX: {:#018x}  RBX: {:#018x}  RCX: {:#018x}  RDX: {:#018x}",
        regs.rax,
        regs.rbx,
        regs.rcx,
        regs.rdx
    );
    pr_crit!(
        "  RSI: {:#018x}  RDI: {:#018x}  RBP: {:#018x}",
        regs.rsi,
        regs.rdi,
        regs.rbp
    );
    pr_crit!(
        "  R8:  {:#018x}  R9:  {:#018x}  R10: {:#018x}  R11: {:#018x}",
        regs.r8,
        regs.r9,
        regs.r10,
        regs.r11
    );
    pr_crit!(
        "  R12: {:#018x}  R13: {:#018x}  R14: {:#018x}  R15: {:#018x}",
        regs.r12,
        regs.r13,
        regs.r14,
        regs.r15
    );
    pr_crit!("  CS:  {:#06x}  SS:  {:#06x}", regs.cs, regs.ss);

    panic!("{}", msg);
}
