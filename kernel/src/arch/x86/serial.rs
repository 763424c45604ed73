//! COM1 16550 UART, polled, used only as the log sink.
//!
//! The console the user sees is the VGA text screen; serial output exists
//! so that bring-up and error traces survive a wedged display. 115200 8N1.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;

use super::interrupts;
use super::io::{inb, outb};

const COM1_BASE: u16 = 0x3F8;

const DATA: u16 = COM1_BASE;
const INT_ENABLE: u16 = COM1_BASE + 1;
const FIFO_CTRL: u16 = COM1_BASE + 2;
const LINE_CTRL: u16 = COM1_BASE + 3;
const MODEM_CTRL: u16 = COM1_BASE + 4;
const LINE_STATUS: u16 = COM1_BASE + 5;

/// LSR bit: transmit holding register empty.
const LSR_THR_EMPTY: u8 = 1 << 5;

pub struct SerialPort {
    initialized: bool,
}

impl SerialPort {
    const fn new() -> Self {
        SerialPort { initialized: false }
    }

    /// Program 115200 8N1 with FIFOs enabled, interrupts off (polled).
    pub fn init(&mut self) {
        // SAFETY: standard 16550 init sequence against the COM1 register
        // block; no other code touches these ports.
        unsafe {
            outb(0x00, INT_ENABLE); // all UART interrupts off
            outb(0x80, LINE_CTRL); // DLAB on
            outb(0x01, DATA); // divisor 1 -> 115200 baud
            outb(0x00, INT_ENABLE);
            outb(0x03, LINE_CTRL); // 8N1, DLAB off
            outb(0xC7, FIFO_CTRL); // FIFO on, clear, 14-byte threshold
            outb(0x0B, MODEM_CTRL); // DTR | RTS | OUT2
        }
        self.initialized = true;
    }

    fn write_byte(&mut self, byte: u8) {
        if !self.initialized {
            return;
        }
        // SAFETY: polls LSR then writes THR, the documented transmit
        // protocol for a 16550. The poll is skipped on hosted targets,
        // where the port stubs read 0 forever.
        unsafe {
            while cfg!(target_os = "none") && inb(LINE_STATUS) & LSR_THR_EMPTY == 0 {
                core::hint::spin_loop();
            }
            outb(byte, DATA);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

lazy_static! {
    static ref COM1: Mutex<SerialPort> = Mutex::new(SerialPort::new());
}

/// Initialize COM1. Safe to call once during early boot.
pub fn init() {
    COM1.lock().init();
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    interrupts::without_interrupts(|| {
        let _ = COM1.lock().write_fmt(args);
    });
}
