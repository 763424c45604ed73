//! 8259A programmable interrupt controller pair.
//!
//! Remaps the 16 ISA lines onto vectors 0x20..0x2F, keeps every line
//! masked until its driver asks for it, and issues specific EOIs. The mask
//! registers are mutated only here; drivers go through
//! [`enable_irq`]/[`disable_irq`].

use spin::Mutex;

use crate::arch::x86::io::{inb, outb};

const MASTER_CMD: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_CMD: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

/// ICW1: edge-triggered, cascade, ICW4 present.
const ICW1: u8 = 0x11;
/// ICW2: vector offsets for each chip.
const ICW2_MASTER: u8 = 0x20;
const ICW2_SLAVE: u8 = 0x28;
/// ICW3: slave on master line 2 / slave identity 2.
const ICW3_MASTER: u8 = 0x04;
const ICW3_SLAVE: u8 = 0x02;
/// ICW4: 8086 mode.
const ICW4: u8 = 0x01;

/// OCW2 specific-EOI base; OR in the line number.
const EOI_SPECIFIC: u8 = 0x60;

/// Software copy of the two mask registers, bit set = line masked.
struct PicState {
    master_mask: u8,
    slave_mask: u8,
}

static PIC: Mutex<PicState> = Mutex::new(PicState {
    master_mask: 0xFF,
    slave_mask: 0xFF,
});

/// Initialize both chips with all lines masked.
pub fn init() {
    let mut pic = PIC.lock();
    pic.master_mask = 0xFF;
    pic.slave_mask = 0xFF;

    // SAFETY: the documented ICW1..ICW4 init sequence; interrupts are
    // still disabled during kernel bring-up.
    unsafe {
        outb(ICW1, MASTER_CMD);
        outb(ICW1, SLAVE_CMD);
        outb(ICW2_MASTER, MASTER_DATA);
        outb(ICW2_SLAVE, SLAVE_DATA);
        outb(ICW3_MASTER, MASTER_DATA);
        outb(ICW3_SLAVE, SLAVE_DATA);
        outb(ICW4, MASTER_DATA);
        outb(ICW4, SLAVE_DATA);

        outb(pic.master_mask, MASTER_DATA);
        outb(pic.slave_mask, SLAVE_DATA);
    }
}

/// Unmask an IRQ line. Unmasking a slave line also unmasks the cascade.
pub fn enable_irq(irq: u8) {
    if irq >= 16 {
        return;
    }
    let mut pic = PIC.lock();
    if irq < 8 {
        pic.master_mask &= !(1 << irq);
        // SAFETY: writing the shadowed mask to the master's data port.
        unsafe { outb(pic.master_mask, MASTER_DATA) };
    } else {
        pic.slave_mask &= !(1 << (irq - 8));
        pic.master_mask &= !(1 << 2);
        // SAFETY: writing both shadowed masks; the cascade line must be
        // open for any slave interrupt to arrive.
        unsafe {
            outb(pic.slave_mask, SLAVE_DATA);
            outb(pic.master_mask, MASTER_DATA);
        }
    }
}

/// Mask an IRQ line.
pub fn disable_irq(irq: u8) {
    if irq >= 16 {
        return;
    }
    let mut pic = PIC.lock();
    if irq < 8 {
        pic.master_mask |= 1 << irq;
        // SAFETY: writing the shadowed mask to the master's data port.
        unsafe { outb(pic.master_mask, MASTER_DATA) };
    } else {
        pic.slave_mask |= 1 << (irq - 8);
        // SAFETY: writing the shadowed mask to the slave's data port.
        unsafe { outb(pic.slave_mask, SLAVE_DATA) };
    }
}

/// Signal end-of-interrupt for `irq`. Slave lines EOI both chips.
pub fn send_eoi(irq: u8) {
    if irq >= 16 {
        return;
    }
    // SAFETY: specific EOI writes to the command ports; for a slave line
    // the master is told the cascade line (2) completed.
    unsafe {
        if irq >= 8 {
            outb(EOI_SPECIFIC | (irq - 8), SLAVE_CMD);
            outb(EOI_SPECIFIC | 2, MASTER_CMD);
        } else {
            outb(EOI_SPECIFIC | irq, MASTER_CMD);
        }
    }
}

/// Read the in-service registers, master in the low byte.
fn read_isr() -> u16 {
    // SAFETY: OCW3 read-ISR command followed by a command-port read, per
    // the 8259 datasheet.
    unsafe {
        outb(0x0B, MASTER_CMD);
        outb(0x0B, SLAVE_CMD);
        ((inb(SLAVE_CMD) as u16) << 8) | inb(MASTER_CMD) as u16
    }
}

/// Whether this interrupt is a phantom on the lowest-priority line of
/// either chip. A real IRQ 7 or 15 has its in-service bit set; a glitch
/// on the request line does not.
pub fn is_spurious(irq: u8) -> bool {
    match irq {
        7 | 15 => read_isr() & (1 << irq) == 0,
        _ => false,
    }
}

/// Acknowledge a spurious interrupt. A spurious IRQ 7 needs no EOI at
/// all; a spurious IRQ 15 still left the cascade line in service on the
/// master, which must be cleared.
pub fn ack_spurious(irq: u8) {
    if irq == 15 {
        // SAFETY: specific EOI for the cascade line on the master.
        unsafe { outb(EOI_SPECIFIC | 2, MASTER_CMD) };
    }
}
