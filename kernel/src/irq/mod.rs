//! Interrupt dispatch.
//!
//! Single entry point for every vector the entry stubs push: CPU
//! exceptions are fatal and die with a register dump; hardware
//! interrupts are acknowledged, routed to their registered handler and,
//! for the timer line, followed by a scheduling decision. The function
//! returns the stack pointer the assembly epilogue must reload, which
//! is how context switches happen.
//!
//! The hardware controller is reached through the [`IrqController`]
//! trait so the dispatch logic can be driven by a test double.

use crate::arch::x86_64::context::PtRegs;
use crate::config::{IRQ_BASE_VECTOR, NR_IRQS, TIMER_IRQ};
use crate::error::{KernelError, KernelResult};
use crate::sync::{IrqSpinLock, SpinLock};

/// A hardware interrupt handler. Runs with interrupts disabled, after
/// the controller has been acknowledged.
pub type IrqHandler = fn(&mut PtRegs);

/// Operations the dispatch needs from the interrupt controller.
pub trait IrqController: Sync {
    /// Inhibit delivery of an IRQ line. Out of range is a no-op.
    fn mask(&self, line: u8);
    /// Allow delivery of an IRQ line. Out of range is a no-op.
    fn unmask(&self, line: u8);
    /// Acknowledge an IRQ so the line can be raised again.
    fn end_of_interrupt(&self, line: u8);
    /// Master in-service register, for spurious-IRQ detection.
    fn in_service(&self) -> u8;
}

static CONTROLLER: SpinLock<Option<&'static dyn IrqController>> = SpinLock::new(None);

static IRQ_HANDLERS: IrqSpinLock<[Option<IrqHandler>; NR_IRQS]> =
    IrqSpinLock::new([None; NR_IRQS]);

/// Install the hardware controller behind the dispatch.
pub fn set_controller(controller: &'static dyn IrqController) {
    *CONTROLLER.lock() = Some(controller);
}

fn controller() -> Option<&'static dyn IrqController> {
    *CONTROLLER.lock()
}

/// Names for exception vectors 0-20; anything above is "Unknown".
const EXCEPTION_NAMES: [&str; 21] = [
    "Divide by Zero Error",
    "Debug",
    "Non-Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "Bound Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack-Segment Fault",
    "General Protection Fault",
    "Page Fault",
    "Reserved (15)",
    "x87 Floating-Point Exception",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point Exception",
    "Virtualization Exception",
];

fn exception_name(vector: u64) -> &'static str {
    EXCEPTION_NAMES
        .get(vector as usize)
        .copied()
        .unwrap_or("Unknown Exception")
}

/// Dispatch one interrupt frame. Returns the stack pointer to restore
/// from: the incoming frame, or another task's saved frame when the
/// timer decided to switch.
pub fn handle_interrupt(regs: &mut PtRegs) -> u64 {
    let entry_sp = regs as *mut PtRegs as u64;
    let vector = regs.vector;

    if vector < IRQ_BASE_VECTOR as u64 {
        // Exceptions are unrecoverable in this kernel.
        crate::panic::die(exception_name(vector), regs);
    }

    let line = vector - IRQ_BASE_VECTOR as u64;
    if line >= NR_IRQS as u64 {
        pr_warn!("irq: interrupt on unexpected vector {:#x}", vector);
        return entry_sp;
    }
    let irq = line as u8;

    let controller = controller();

    // A phantom IRQ 7 leaves the in-service bit clear: no handler, no
    // EOI, just go back.
    if irq == 7 {
        let isr = controller.map_or(0, |c| c.in_service());
        if isr & (1 << 7) == 0 {
            pr_debug!("irq: spurious IRQ7, ignoring");
            return entry_sp;
        }
    }

    // Acknowledge before running the handler so the line can be raised
    // again while it runs.
    if let Some(c) = controller {
        c.end_of_interrupt(irq);
    }

    let handler = IRQ_HANDLERS.lock()[irq as usize];
    match handler {
        Some(handler) => handler(regs),
        None => {
            pr_warn!("irq: unhandled IRQ {}", irq);
        }
    }

    if irq == TIMER_IRQ {
        return crate::sched::schedule(entry_sp);
    }
    entry_sp
}

/// C-ABI wrapper the common entry stub calls.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[no_mangle]
extern "C" fn interrupt_dispatch(regs: *mut PtRegs) -> u64 {
    // SAFETY: the entry stub passes the frame it just pushed on the
    // current stack.
    handle_interrupt(unsafe { &mut *regs })
}

/// Register `handler` for an IRQ line and unmask it.
///
/// Fails for an out-of-range line or when a handler is already
/// registered; registration is first come, first served.
pub fn request_irq(irq: u8, handler: IrqHandler) -> KernelResult<()> {
    if irq as usize >= NR_IRQS {
        return Err(KernelError::InvalidArgument {
            name: "irq",
            value: irq as u64,
        });
    }

    {
        let mut handlers = IRQ_HANDLERS.lock();
        if handlers[irq as usize].is_some() {
            return Err(KernelError::AlreadyExists {
                resource: "IRQ handler",
                id: irq as u64,
            });
        }
        handlers[irq as usize] = Some(handler);
    }

    if let Some(c) = controller() {
        c.unmask(irq);
    }
    pr_debug!("irq: registered handler for IRQ {}", irq);
    Ok(())
}

/// Mask an IRQ line and drop its handler.
pub fn free_irq(irq: u8) {
    if irq as usize >= NR_IRQS {
        return;
    }

    // Mask first so the handler cannot run between the two steps.
    if let Some(c) = controller() {
        c.mask(irq);
    }
    IRQ_HANDLERS.lock()[irq as usize] = None;
    pr_debug!("irq: unregistered handler for IRQ {}", irq);
}
