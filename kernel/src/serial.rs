//! 16550 UART console on COM1.
//!
//! Registered as a printk console at the earliest initcall level, so
//! boot messages reach the serial line before anything else is up.

use lazy_static::lazy_static;
use uart_16550::SerialPort;

use crate::error::KernelResult;
use crate::printk::Console;
use crate::sync::IrqSpinLock;

const COM1_BASE: u16 = 0x3F8;

lazy_static! {
    static ref SERIAL1: IrqSpinLock<SerialPort> = {
        // SAFETY: COM1's standard I/O port base.
        let port = unsafe { SerialPort::new(COM1_BASE) };
        IrqSpinLock::new(port)
    };
}

struct SerialConsole;

impl Console for SerialConsole {
    fn write(&self, msg: &str) {
        use core::fmt::Write;
        let _ = SERIAL1.lock().write_str(msg);
    }
}

static CONSOLE: SerialConsole = SerialConsole;

fn serial_console_setup() -> KernelResult<()> {
    SERIAL1.lock().init();
    crate::printk::register_console(&CONSOLE);
    crate::printk::init_logger();
    Ok(())
}

initcall!(pure, serial_console_setup);
