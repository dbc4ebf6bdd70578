//! x86_64 architecture support: descriptor tables, interrupt entry,
//! the legacy interrupt controller and the tick timer.

pub mod context;
pub mod gdt;
#[cfg(target_os = "none")]
pub mod idt;
#[cfg(target_os = "none")]
pub mod pic;
pub mod timer;

/// Saved local interrupt-enable state, as returned by [`local_irq_save`].
pub type IrqFlags = bool;

/// `arch` initcall: descriptor tables first, then the interrupt
/// controller. One initcall keeps the order explicit instead of relying
/// on link order within the level.
#[cfg(target_os = "none")]
fn arch_setup() -> crate::error::KernelResult<()> {
    gdt::init();
    idt::init();
    pic::init();
    Ok(())
}

#[cfg(target_os = "none")]
initcall!(arch, arch_setup);

/// Disable local interrupts and return the previous interrupt-enable flag.
#[cfg(target_os = "none")]
pub fn local_irq_save() -> IrqFlags {
    let enabled = x86_64::instructions::interrupts::are_enabled();
    x86_64::instructions::interrupts::disable();
    enabled
}

/// Restore the interrupt-enable flag saved by [`local_irq_save`].
#[cfg(target_os = "none")]
pub fn local_irq_restore(flags: IrqFlags) {
    if flags {
        x86_64::instructions::interrupts::enable();
    }
}

/// Enable local interrupts.
#[cfg(target_os = "none")]
pub fn local_irq_enable() {
    x86_64::instructions::interrupts::enable();
}

// Host builds run the test suite in ordinary user space, where the
// interrupt flag is not ours to touch.
#[cfg(not(target_os = "none"))]
pub fn local_irq_save() -> IrqFlags {
    true
}

#[cfg(not(target_os = "none"))]
pub fn local_irq_restore(_flags: IrqFlags) {}

#[cfg(not(target_os = "none"))]
pub fn local_irq_enable() {}

/// Stop the CPU for good: interrupts off, `hlt` in a loop.
#[cfg(target_os = "none")]
pub fn halt() -> ! {
    x86_64::instructions::interrupts::disable();
    loop {
        x86_64::instructions::hlt();
    }
}

#[cfg(not(target_os = "none"))]
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Park until the next interrupt fires.
#[cfg(target_os = "none")]
pub fn wait_for_interrupt() {
    x86_64::instructions::hlt();
}

#[cfg(not(target_os = "none"))]
pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}
