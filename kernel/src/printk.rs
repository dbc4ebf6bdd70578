//! printk: format, commit to the kernel log, fan out to consoles.
//!
//! Messages are rendered with `core::fmt` into a fixed scratch buffer
//! (no heap involvement), so printk works from the earliest point of
//! boot and from interrupt context. An optional leading `<0>`..`<7>`
//! marker selects the severity; without one the message is INFO.
//!
//! Every message is committed to the log ring unconditionally; consoles
//! only see messages at or above the global console log level.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicU8, Ordering};

use crate::config::{MAX_CONSOLES, PRINTK_BUF_SIZE};
use crate::klog;
use crate::sync::IrqSpinLock;

pub const LOGLEVEL_EMERG: u8 = 0;
pub const LOGLEVEL_ALERT: u8 = 1;
pub const LOGLEVEL_CRIT: u8 = 2;
pub const LOGLEVEL_ERR: u8 = 3;
pub const LOGLEVEL_WARNING: u8 = 4;
pub const LOGLEVEL_NOTICE: u8 = 5;
pub const LOGLEVEL_INFO: u8 = 6;
pub const LOGLEVEL_DEBUG: u8 = 7;

/// Severity used when a message carries no `<n>` marker.
pub const LOGLEVEL_DEFAULT: u8 = LOGLEVEL_INFO;

/// Sink for rendered log lines. Implementations must tolerate being
/// called from interrupt context.
pub trait Console: Sync {
    fn write(&self, msg: &str);
}

struct ConsoleList {
    slots: [Option<&'static dyn Console>; MAX_CONSOLES],
    len: usize,
}

static CONSOLES: IrqSpinLock<ConsoleList> = IrqSpinLock::new(ConsoleList {
    slots: [None; MAX_CONSOLES],
    len: 0,
});

static CONSOLE_LOGLEVEL: AtomicU8 = AtomicU8::new(LOGLEVEL_DEBUG);

/// Register a console. Consoles cannot be unregistered; registration
/// beyond the fixed capacity is silently dropped.
pub fn register_console(con: &'static dyn Console) {
    let mut list = CONSOLES.lock();
    if list.len < MAX_CONSOLES {
        let idx = list.len;
        list.slots[idx] = Some(con);
        list.len += 1;
    }
}

/// Messages above this level are not emitted to consoles (they still
/// land in the log ring).
pub fn console_loglevel() -> u8 {
    CONSOLE_LOGLEVEL.load(Ordering::Relaxed)
}

pub fn set_console_loglevel(level: u8) {
    CONSOLE_LOGLEVEL.store(level, Ordering::Relaxed);
}

/// Fixed-size formatting target. Overflow truncates at a character
/// boundary rather than erroring, matching what a bounded vsnprintf
/// would do.
struct ScratchBuf {
    buf: [u8; PRINTK_BUF_SIZE],
    len: usize,
}

impl ScratchBuf {
    const fn new() -> Self {
        Self {
            buf: [0; PRINTK_BUF_SIZE],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        // Only whole UTF-8 fragments are ever copied in.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl fmt::Write for ScratchBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let avail = PRINTK_BUF_SIZE - self.len;
        let take = if s.len() <= avail {
            s.len()
        } else {
            let mut t = avail;
            while t > 0 && !s.is_char_boundary(t) {
                t -= 1;
            }
            t
        };
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Split a leading `<0>`..`<7>` marker off the message.
fn parse_level(msg: &str) -> (u8, &str) {
    let b = msg.as_bytes();
    if b.len() >= 3 && b[0] == b'<' && b[1].is_ascii_digit() && b[1] <= b'7' && b[2] == b'>' {
        (b[1] - b'0', &msg[3..])
    } else {
        (LOGLEVEL_DEFAULT, msg)
    }
}

fn emit(level: u8, body: &str) -> usize {
    let body = body.strip_suffix('\n').unwrap_or(body);
    if body.is_empty() {
        return 0;
    }

    let written = klog::klog_write(level, body);

    if level <= console_loglevel() {
        let list = CONSOLES.lock();
        for con in list.slots[..list.len].iter().flatten() {
            con.write(body);
            con.write("\n");
        }
    }

    written
}

/// Render and emit one message. Prefer the [`printk!`] and `pr_*!`
/// macros over calling this directly.
pub fn printk(args: fmt::Arguments) -> usize {
    let mut scratch = ScratchBuf::new();
    let _ = scratch.write_fmt(args);
    let (level, body) = parse_level(scratch.as_str());
    emit(level, body)
}

#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => ($crate::printk::printk(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! pr_emerg {
    ($fmt:expr $(, $($arg:tt)+)?) => ($crate::printk!(concat!("<0>", $fmt) $(, $($arg)+)?));
}

#[macro_export]
macro_rules! pr_crit {
    ($fmt:expr $(, $($arg:tt)+)?) => ($crate::printk!(concat!("<2>", $fmt) $(, $($arg)+)?));
}

#[macro_export]
macro_rules! pr_err {
    ($fmt:expr $(, $($arg:tt)+)?) => ($crate::printk!(concat!("<3>", $fmt) $(, $($arg)+)?));
}

#[macro_export]
macro_rules! pr_warn {
    ($fmt:expr $(, $($arg:tt)+)?) => ($crate::printk!(concat!("<4>", $fmt) $(, $($arg)+)?));
}

#[macro_export]
macro_rules! pr_info {
    ($fmt:expr $(, $($arg:tt)+)?) => ($crate::printk!(concat!("<6>", $fmt) $(, $($arg)+)?));
}

#[macro_export]
macro_rules! pr_debug {
    ($fmt:expr $(, $($arg:tt)+)?) => ($crate::printk!(concat!("<7>", $fmt) $(, $($arg)+)?));
}

// ---------------------------------------------------------------------------
// `log` crate facade
// ---------------------------------------------------------------------------

/// Routes the `log` crate macros into printk, so dependencies that log
/// through the facade share the ring and consoles.
struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let level = match record.level() {
            log::Level::Error => LOGLEVEL_ERR,
            log::Level::Warn => LOGLEVEL_WARNING,
            log::Level::Info => LOGLEVEL_INFO,
            log::Level::Debug | log::Level::Trace => LOGLEVEL_DEBUG,
        };
        let mut scratch = ScratchBuf::new();
        let _ = write!(scratch, "{}: {}", record.target(), record.args());
        emit(level, scratch.as_str());
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the `log` facade bridge. Safe to call more than once.
pub fn init_logger() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Debug);
    }
}
