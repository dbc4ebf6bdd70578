//! Legacy 8259 interrupt controller.
//!
//! The cascaded pair is remapped so IRQs 0-15 land on vectors
//! 0x20-0x2F, clear of the CPU exception range. All lines start masked;
//! `request_irq` unmasks a line when a handler shows up.

use pic8259::ChainedPics;
use x86_64::instructions::port::Port;

use crate::config::IRQ_BASE_VECTOR;
use crate::irq::IrqController;
use crate::sync::SpinLock;

const PIC1_COMMAND_PORT: u16 = 0x20;

/// OCW3: next read from the command port returns the in-service register.
const OCW3_READ_ISR: u8 = 0x0B;

pub struct Pic8259 {
    chained: SpinLock<ChainedPics>,
}

impl Pic8259 {
    const fn new() -> Self {
        Self {
            // SAFETY: 0x20/0x28 avoid the CPU exception vectors.
            chained: SpinLock::new(unsafe {
                ChainedPics::new(IRQ_BASE_VECTOR, IRQ_BASE_VECTOR + 8)
            }),
        }
    }
}

impl IrqController for Pic8259 {
    fn mask(&self, line: u8) {
        if line >= 16 {
            return;
        }
        let mut pics = self.chained.lock();
        // SAFETY: read-modify-write of the interrupt mask registers.
        unsafe {
            let [master, slave] = pics.read_masks();
            if line < 8 {
                pics.write_masks(master | (1 << line), slave);
            } else {
                pics.write_masks(master, slave | (1 << (line - 8)));
            }
        }
    }

    fn unmask(&self, line: u8) {
        if line >= 16 {
            return;
        }
        let mut pics = self.chained.lock();
        // SAFETY: read-modify-write of the interrupt mask registers.
        unsafe {
            let [master, slave] = pics.read_masks();
            if line < 8 {
                pics.write_masks(master & !(1 << line), slave);
            } else {
                pics.write_masks(master, slave & !(1 << (line - 8)));
            }
        }
    }

    fn end_of_interrupt(&self, line: u8) {
        if line >= 16 {
            return;
        }
        let mut pics = self.chained.lock();
        // SAFETY: the vector belongs to this controller; for cascaded
        // lines the slave and the master are both acknowledged.
        unsafe {
            pics.notify_end_of_interrupt(IRQ_BASE_VECTOR + line);
        }
    }

    fn in_service(&self) -> u8 {
        let _guard = self.chained.lock();
        let mut cmd: Port<u8> = Port::new(PIC1_COMMAND_PORT);
        // SAFETY: OCW3 write followed by a command-port read returns the
        // master's in-service register.
        unsafe {
            cmd.write(OCW3_READ_ISR);
            cmd.read()
        }
    }
}

static PIC: Pic8259 = Pic8259::new();

/// Remap the cascaded pair, mask every line and hand the controller to
/// the dispatch layer. Must run after the descriptor tables are loaded.
pub fn init() {
    {
        let mut pics = PIC.chained.lock();
        // SAFETY: standard 8259 initialization sequence; masking all
        // lines keeps the controller quiet until handlers register.
        unsafe {
            pics.initialize();
            pics.write_masks(0xFF, 0xFF);
        }
    }
    crate::irq::set_controller(&PIC);

    pr_info!(
        "pic: remapped to vectors {:#04x}-{:#04x}, all lines masked",
        IRQ_BASE_VECTOR,
        IRQ_BASE_VECTOR + 15
    );
}
