//! TriadOS kernel library.
//!
//! A 32-bit protected-mode teaching kernel: three virtual terminals over
//! one VGA text screen, up to eight processes in round-robin time slices,
//! a read-only boot-module filesystem, and the `int 0x80` syscall ABI.
//!
//! The crate is `no_std` and targets bare x86; everything that touches an
//! instruction or port is gated on `target_os = "none"` with hosted
//! stubs, so the logic layer builds and runs under the standard test
//! harness on a development machine.

#![no_std]

// Host target (tests, tooling): the standard library exists and the test
// harness wants it.
#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod print;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod irq;
pub mod klog;
pub mod mm;
pub mod multiboot;
pub mod process;
pub mod sched;
pub mod syscall;
pub mod tty;

pub use error::{KernelError, KernelResult};

/// Bring the machine up, mount the boot module, and start terminal 0's
/// shell. Returns only if the handoff or the mount is unusable.
pub fn kernel_main(magic: u32, info_addr: u32) -> KernelResult<()> {
    arch::x86::serial::init();
    klog::init();
    log::info!("TriadOS v{}", env!("CARGO_PKG_VERSION"));

    arch::x86::init();
    drivers::pic::init();
    mm::paging::init();

    // SAFETY: magic/info_addr are the raw EAX/EBX values from the
    // bootloader; first_module validates them before dereferencing.
    let module = unsafe { multiboot::first_module(magic, info_addr)? };
    let start = module.as_ptr() as u32;
    mm::paging::ensure_identity_mapped(start, start + module.len() as u32);
    fs::init(module)?;

    drivers::rtc::init();
    drivers::keyboard::init();
    drivers::pit::init();

    println!("TriadOS v{}", env!("CARGO_PKG_VERSION"));
    log::info!("launching shell on terminal 0");

    // Never returns while the shell lineage lives; interrupts come up
    // with the first iret into ring 3.
    syscall::execute_command(config::SHELL_CMD, Some(0));
    Err(KernelError::NotFound { resource: "shell" })
}
