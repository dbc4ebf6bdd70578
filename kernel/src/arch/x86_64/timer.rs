//! Tick timer on the legacy programmable interval timer.
//!
//! Channel 0 runs as a rate generator at [`TICK_HZ`]; every interrupt
//! bumps a monotonic tick counter. The dispatch layer acknowledges the
//! interrupt and invokes the scheduler after the handler, so the
//! handler itself only counts.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::x86_64::context::PtRegs;
use crate::config::{MS_PER_TICK, TICK_HZ, TIMER_IRQ};
use crate::error::KernelResult;

/// Base frequency of the interval timer in Hz.
const PIT_FREQUENCY: u32 = 1_193_182;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Monotonic tick count since boot.
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Milliseconds since boot, derived from the tick count.
pub fn uptime_ms() -> u64 {
    get_ticks() * MS_PER_TICK
}

/// Advance the tick counter. Called from the timer interrupt.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

fn timer_interrupt(_regs: &mut PtRegs) {
    tick();
}

/// Program channel 0: lobyte/hibyte access, rate generator, binary.
#[cfg(target_os = "none")]
fn program_pit() {
    let divisor = PIT_FREQUENCY / TICK_HZ as u32;

    use x86_64::instructions::port::Port;
    let mut command: Port<u8> = Port::new(0x43);
    let mut channel0: Port<u8> = Port::new(0x40);
    // SAFETY: standard PIT programming sequence on the dedicated ports.
    unsafe {
        command.write(0x36u8);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
}

fn timer_setup() -> KernelResult<()> {
    #[cfg(target_os = "none")]
    program_pit();

    crate::irq::request_irq(TIMER_IRQ, timer_interrupt)?;
    pr_info!("timer: {} Hz tick on IRQ {}", TICK_HZ, TIMER_IRQ);
    Ok(())
}

initcall!(device, timer_setup);

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_follows_ticks() {
        let before = get_ticks();
        tick();
        tick();
        let after = get_ticks();
        assert_eq!(after - before, 2);
        assert_eq!(uptime_ms(), get_ticks() * MS_PER_TICK);
        assert_eq!(MS_PER_TICK, 10, "100 Hz tick is 10 ms");
    }
}
