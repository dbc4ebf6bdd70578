//! Kernel configuration constants.
//!
//! Everything tunable at build time lives here so the rest of the tree
//! never hard-codes magic numbers.

/// Tick timer frequency. The PIT divisor is derived from this.
pub const TICK_HZ: u64 = 100;

/// Milliseconds per timer tick.
pub const MS_PER_TICK: u64 = 1000 / TICK_HZ;

/// Size of the fixed task table, including the idle task at PID 0.
pub const MAX_TASKS: usize = 32;

/// Number of legacy IRQ lines (two cascaded 8259s).
pub const NR_IRQS: usize = 16;

/// First IDT vector the master PIC is remapped to.
pub const IRQ_BASE_VECTOR: u8 = 0x20;

/// IRQ line of the tick timer.
pub const TIMER_IRQ: u8 = 0;

/// Physical address the kernel image is loaded at.
pub const KERNEL_PHYS_BASE: u64 = 0x10_0000;

/// Virtual base the kernel image is linked at.
pub const KERNEL_VIRT_BASE: u64 = 0xffff_ffff_8000_0000;

/// Size of the kernel log ring buffer. Must be a power of two.
pub const LOG_BUF_SIZE: usize = 16 * 1024;

/// Size of the printk formatting scratch buffer.
pub const PRINTK_BUF_SIZE: usize = 512;

/// Maximum number of registered consoles.
pub const MAX_CONSOLES: usize = 8;

/// Maximum number of boot memory map regions we record.
pub const MAX_MEM_REGIONS: usize = 64;
