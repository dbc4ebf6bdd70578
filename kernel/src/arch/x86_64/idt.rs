//! Interrupt Descriptor Table.
//!
//! All 256 gates are installed by hand: exception vectors 0-20 and the
//! 16 remapped IRQ vectors point at their per-vector entry stubs, and
//! every other vector gets the shared unexpected-vector stub. A
//! hand-rolled table (rather than typed per-exception handlers) keeps
//! one register-frame layout shared between dispatch and the scheduler's
//! task bootstrap.

use bitflags::bitflags;
use x86_64::structures::DescriptorTablePointer;
use x86_64::VirtAddr;

use crate::arch::x86_64::context::{exception_stub_table, irq_stub_table, vector_ignore_stub};
use crate::arch::x86_64::gdt::{self, DOUBLE_FAULT_IST_INDEX};
use crate::config::{IRQ_BASE_VECTOR, NR_IRQS};
use crate::sync::SpinLock;

const IDT_ENTRIES: usize = 256;

/// Vector of the double fault exception; its gate runs on the IST stack.
const DOUBLE_FAULT_VECTOR: usize = 8;

bitflags! {
    /// Gate descriptor attribute byte.
    #[derive(Clone, Copy)]
    struct GateAttributes: u8 {
        const PRESENT = 1 << 7;
        const RING3 = 3 << 5;
        const INTERRUPT_GATE = 0xE;
        const TRAP_GATE = 0xF;
    }
}

/// One 16-byte IDT gate descriptor.
#[repr(C)]
#[derive(Clone, Copy)]
struct IdtEntry {
    isr_low: u16,
    selector: u16,
    ist: u8,
    attributes: u8,
    isr_mid: u16,
    isr_high: u32,
    _reserved: u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            isr_low: 0,
            selector: 0,
            ist: 0,
            attributes: 0,
            isr_mid: 0,
            isr_high: 0,
            _reserved: 0,
        }
    }

    fn set(&mut self, isr: usize, selector: u16, attributes: GateAttributes, ist: u8) {
        let isr = isr as u64;
        self.isr_low = (isr & 0xFFFF) as u16;
        self.selector = selector;
        self.ist = ist;
        self.attributes = attributes.bits();
        self.isr_mid = ((isr >> 16) & 0xFFFF) as u16;
        self.isr_high = ((isr >> 32) & 0xFFFF_FFFF) as u32;
        self._reserved = 0;
    }
}

#[repr(C, align(16))]
struct Idt {
    entries: [IdtEntry; IDT_ENTRIES],
}

static IDT: SpinLock<Idt> = SpinLock::new(Idt {
    entries: [IdtEntry::missing(); IDT_ENTRIES],
});

/// Populate all 256 gates and load the table. The GDT must already be
/// loaded; interrupts stay disabled until the boot sequence finishes.
pub fn init() {
    let cs = gdt::kernel_code_selector();
    let gate = GateAttributes::PRESENT | GateAttributes::INTERRUPT_GATE;

    let mut idt = IDT.lock();

    for entry in idt.entries.iter_mut() {
        entry.set(vector_ignore_stub as usize, cs, gate, 0);
    }

    // SAFETY: the stub tables are emitted by the entry assembly and
    // cover exactly the documented vectors.
    unsafe {
        for (vector, &stub) in exception_stub_table.iter().enumerate() {
            let ist = if vector == DOUBLE_FAULT_VECTOR {
                DOUBLE_FAULT_IST_INDEX as u8 + 1
            } else {
                0
            };
            idt.entries[vector].set(stub, cs, gate, ist);
        }

        for (line, &stub) in irq_stub_table.iter().enumerate().take(NR_IRQS) {
            idt.entries[IRQ_BASE_VECTOR as usize + line].set(stub, cs, gate, 0);
        }
    }

    let pointer = DescriptorTablePointer {
        limit: (core::mem::size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
        base: VirtAddr::new(idt.entries.as_ptr() as u64),
    };
    // SAFETY: the table is a static, so the pointer stays valid for the
    // kernel's lifetime; every gate was just initialized.
    unsafe {
        x86_64::instructions::tables::lidt(&pointer);
    }

    pr_info!("idt: {} gates installed", IDT_ENTRIES);
}
