//! 32-bit x86 support: port I/O, interrupt flag control, segmentation,
//! interrupt descriptor table, ring transitions, and the COM1 UART.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod interrupts;
pub mod io;
pub mod serial;
pub mod usermode;

/// Bring up the segment tables and the IDT. Interrupts stay disabled; the
/// caller enables them once the device drivers are ready.
pub fn init() {
    gdt::init();
    idt::init();
}
