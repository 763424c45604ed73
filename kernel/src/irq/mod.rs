//! IRQ dispatch table.
//!
//! Maps each of the 16 PIC lines to a typed handler function. The
//! architecture stubs call [`dispatch`] with the line number; handlers are
//! responsible for their own device acknowledgement and EOI, because the
//! scheduler needs to EOI the PIT *before* it swaps kernel stacks.

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// Number of ISA IRQ lines behind the 8259 pair.
pub const IRQ_LINES: usize = 16;

/// PIC line numbers for the devices this kernel drives.
pub const IRQ_PIT: u32 = 0;
pub const IRQ_KEYBOARD: u32 = 1;
pub const IRQ_CASCADE: u32 = 2;
pub const IRQ_RTC: u32 = 8;

/// Newtype over a raw PIC line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IrqNumber(pub u32);

impl IrqNumber {
    /// Create a new IRQ number.
    pub const fn new(irq: u32) -> Self {
        Self(irq)
    }

    /// Get the raw line number.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for IrqNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "IRQ#{}", self.0)
    }
}

/// Type alias for IRQ handler functions.
pub type IrqHandler = fn(IrqNumber);

static HANDLERS: Mutex<[Option<IrqHandler>; IRQ_LINES]> = Mutex::new([None; IRQ_LINES]);

/// Interrupts with nobody to serve them: unregistered lines and 8259
/// phantoms.
static SPURIOUS_COUNT: AtomicU32 = AtomicU32::new(0);

/// Install `handler` for `irq`. Fails if the line already has one.
pub fn register_handler(irq: IrqNumber, handler: IrqHandler) -> KernelResult<()> {
    let index = irq.as_u32() as usize;
    if index >= IRQ_LINES {
        return Err(KernelError::InvalidArgument { name: "irq" });
    }
    let mut handlers = HANDLERS.lock();
    if handlers[index].is_some() {
        return Err(KernelError::ResourceExhausted {
            resource: "irq line",
        });
    }
    handlers[index] = Some(handler);
    Ok(())
}

/// Invoke the handler registered for `irq`, if any.
///
/// Phantom interrupts on the 8259 lowest-priority lines (IRQ 7 and 15)
/// are filtered out before any handler runs; they carry no in-service
/// bit and must not be EOI'd like a real interrupt.
pub fn dispatch(irq: IrqNumber) {
    let index = irq.as_u32() as usize;

    if index < IRQ_LINES && crate::drivers::pic::is_spurious(index as u8) {
        SPURIOUS_COUNT.fetch_add(1, Ordering::Relaxed);
        crate::drivers::pic::ack_spurious(index as u8);
        return;
    }

    let handler = if index < IRQ_LINES {
        HANDLERS.lock()[index]
    } else {
        None
    };

    match handler {
        Some(handler) => handler(irq),
        None => {
            SPURIOUS_COUNT.fetch_add(1, Ordering::Relaxed);
            // Still EOI so the line does not wedge.
            crate::drivers::pic::send_eoi(irq.as_u32() as u8);
        }
    }
}

/// Interrupts taken on a line nobody registered, plus filtered phantoms.
pub fn spurious_count() -> u32 {
    SPURIOUS_COUNT.load(Ordering::Relaxed)
}
