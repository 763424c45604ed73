//! Ring transitions.
//!
//! [`enter_user`] builds the five-word iret frame that drops the CPU into
//! ring 3 at a program's entry point. [`return_to_parent`] is the other
//! half of the `execute`/`halt` pact: it rewinds onto the parent's kernel
//! stack, fabricates `execute`'s C-ABI return value, and returns from it.

use super::gdt::{USER_CS, USER_DS};

/// EFLAGS with IF set and the mandatory bit 1.
const EFLAGS_USER: u32 = 0x202;

/// Enter ring 3 at `entry` with the given user stack pointer.
///
/// # Safety
/// `entry` and `user_stack` must lie inside the current process's mapped
/// user page, and `tss.esp0` must already point at this process's kernel
/// stack so the next trap lands somewhere sane.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub unsafe fn enter_user(entry: u32, user_stack: u32) -> ! {
    // SAFETY: the iret frame (SS, ESP, EFLAGS, CS, EIP) matches the user
    // segments installed in the GDT; data segments are switched first so
    // ring 3 never sees a kernel selector.
    unsafe {
        core::arch::asm!(
            "mov ds, {ds:x}",
            "mov es, {ds:x}",
            "mov fs, {ds:x}",
            "mov gs, {ds:x}",
            "push {ds:e}",
            "push {stack:e}",
            "push {eflags:e}",
            "push {cs:e}",
            "push {entry:e}",
            "iretd",
            ds = in(reg) USER_DS as u32,
            stack = in(reg) user_stack,
            eflags = in(reg) EFLAGS_USER,
            cs = in(reg) USER_CS as u32,
            entry = in(reg) entry,
            options(noreturn),
        );
    }
}

/// Hosted stub.
///
/// # Safety
/// Hosted builds must not call this.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub unsafe fn enter_user(_entry: u32, _user_stack: u32) -> ! {
    unreachable!("ring transitions are only meaningful on bare metal")
}

/// Resume the parent's `execute` frame with `status` as its return value.
///
/// `execute` captures its ESP/EBP right before dropping to ring 3; `halt`
/// hands that pair back here. Loading them and running `leave; ret`
/// returns from `execute`'s `extern "C"` frame, so placing `status` in EAX
/// makes it the value the parent's syscall observes.
///
/// # Safety
/// The pair must have been captured inside the parent's still-live
/// `execute` invocation, with the parent's page directory already active.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub unsafe fn return_to_parent(esp: u32, ebp: u32, status: u32) -> ! {
    // SAFETY: per the function contract the parent frame is intact and
    // expects a C-ABI return; EAX carries the status across `leave; ret`.
    unsafe {
        core::arch::asm!(
            "mov esp, {esp}",
            "mov ebp, {ebp}",
            "mov eax, {status}",
            "leave",
            "ret",
            esp = in(reg) esp,
            ebp = in(reg) ebp,
            status = in(reg) status,
            options(noreturn),
        );
    }
}

/// Hosted stub.
///
/// # Safety
/// Hosted builds must not call this.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub unsafe fn return_to_parent(_esp: u32, _ebp: u32, _status: u32) -> ! {
    unreachable!("ring transitions are only meaningful on bare metal")
}
