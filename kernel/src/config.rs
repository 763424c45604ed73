//! Compile-time kernel configuration.
//!
//! Everything tunable lives here as a `const` so the rest of the kernel
//! never hard-codes a magic number twice. Values outside their documented
//! range are rejected at compile time where possible.

/// Scheduler time slice in milliseconds.
///
/// The PIT reload value is derived from this. Must stay within [10, 50];
/// below that the context-switch overhead dominates, above it the
/// terminals become visibly jerky.
pub const SCHED_QUANTUM_MS: u32 = 10;

const _: () = assert!(
    SCHED_QUANTUM_MS >= 10 && SCHED_QUANTUM_MS <= 50,
    "scheduler quantum out of range"
);

/// Default virtual RTC frequency installed by `open("rtc")`, in Hz.
pub const RTC_DEFAULT_VIRT_FREQ: u32 = 2;

/// Hardware RTC rate value for register A (rate 6 = 1024 Hz).
///
/// The RTC runs at its maximum useful rate permanently; per-terminal
/// frequencies are synthesized by dividing in the interrupt handler.
pub const RTC_HW_RATE: u8 = 6;

/// Maximum serial log verbosity compiled into the kernel.
pub const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Info;

/// Command executed to populate a terminal with its root shell.
pub const SHELL_CMD: &[u8] = b"shell";

/// Prompt string the shell prints. The keyboard handler re-draws this
/// after Ctrl+L while a line read is pending.
pub const SHELL_PROMPT: &[u8] = b"391OS> ";
