//! Programmable interval timer, channel 0.
//!
//! Rate-generator mode with a reload value derived from the scheduler
//! quantum. The interrupt handler is the scheduler's entry point; EOI is
//! issued inside the scheduler so that it lands before the kernel stack is
//! swapped out from under the interrupt frame.

use crate::arch::x86::io::outb;
use crate::config::SCHED_QUANTUM_MS;
use crate::drivers::pic;
use crate::irq::{self, IrqNumber, IRQ_PIT};

/// Input clock of PIT channel 0 in Hz.
pub const PIT_FREQ_HZ: u32 = 1_193_182;

const CHANNEL_0: u16 = 0x40;
const MODE_REGISTER: u16 = 0x43;

/// Command: channel 0, access lobyte/hibyte, mode 2 (rate generator),
/// binary counting.
const CMD_RATE_GEN: u8 = 0x34;

/// Reload value producing one interrupt per `quantum_ms` milliseconds.
fn reload_value(quantum_ms: u32) -> u16 {
    (PIT_FREQ_HZ * quantum_ms / 1000) as u16
}

/// Program channel 0 and unmask the timer line.
pub fn init() {
    let reload = reload_value(SCHED_QUANTUM_MS);

    // SAFETY: mode command then reload low/high bytes, the documented
    // channel 0 programming sequence.
    unsafe {
        outb(CMD_RATE_GEN, MODE_REGISTER);
        outb((reload & 0xFF) as u8, CHANNEL_0);
        outb((reload >> 8) as u8, CHANNEL_0);
    }

    if irq::register_handler(IrqNumber::new(IRQ_PIT), irqh_pit).is_err() {
        log::error!("PIT line already claimed");
    }
    pic::enable_irq(IRQ_PIT as u8);
    log::info!("PIT: {} ms quantum, reload {}", SCHED_QUANTUM_MS, reload);
}

/// Timer tick: hand control to the scheduler. May not return to this
/// frame until the round robin comes back to this terminal.
fn irqh_pit(_irq: IrqNumber) {
    crate::sched::tick();
}
