//! Multiboot (v1) handoff.
//!
//! The loader leaves `0x2BADB002` in EAX and a physical pointer to the
//! info structure in EBX. The only field this kernel interprets is the
//! module list: the first module is the filesystem image.

use bitflags::bitflags;

use crate::error::{KernelError, KernelResult};

/// Value the bootloader leaves in EAX.
pub const BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

bitflags! {
    /// `flags` bits of the info structure (the subset we look at).
    #[derive(Debug, Clone, Copy)]
    pub struct InfoFlags: u32 {
        const MEMORY   = 1 << 0;
        const BOOTDEV  = 1 << 1;
        const CMDLINE  = 1 << 2;
        const MODULES  = 1 << 3;
    }
}

/// Prefix of the multiboot info structure (through the module fields).
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
}

/// One entry of the module list.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ModuleEntry {
    pub start: u32,
    pub end: u32,
    pub string: u32,
    pub reserved: u32,
}

/// Check the register handoff before touching any pointer.
pub fn validate_handoff(magic: u32, info_addr: u32) -> KernelResult<()> {
    if magic != BOOTLOADER_MAGIC {
        return Err(KernelError::InvalidArgument { name: "boot magic" });
    }
    if info_addr == 0 {
        return Err(KernelError::InvalidArgument { name: "boot info" });
    }
    Ok(())
}

/// Check that the info structure advertises at least one module.
pub fn validate_modules(info: &MultibootInfo) -> KernelResult<()> {
    let flags = InfoFlags::from_bits_truncate(info.flags);
    if !flags.contains(InfoFlags::MODULES) || info.mods_count == 0 || info.mods_addr == 0 {
        return Err(KernelError::NotFound {
            resource: "boot module",
        });
    }
    Ok(())
}

/// A module's physical span as (start, length).
pub fn module_span(module: &ModuleEntry) -> KernelResult<(u32, usize)> {
    if module.end <= module.start {
        return Err(KernelError::InvalidArgument {
            name: "module range",
        });
    }
    Ok((module.start, (module.end - module.start) as usize))
}

/// Validate the handoff and return the first module's byte range.
///
/// # Safety
/// `info_addr` must point at a live multiboot info structure whose module
/// list is intact (the bootloader guarantees this for the real EBX
/// value), and physical addresses must be identity-mapped.
pub unsafe fn first_module(magic: u32, info_addr: u32) -> KernelResult<&'static [u8]> {
    validate_handoff(magic, info_addr)?;

    // SAFETY: per the function contract the structure is live; it is never
    // written, so a shared reference is sound.
    let info = unsafe { &*(info_addr as usize as *const MultibootInfo) };
    validate_modules(info)?;

    // SAFETY: validate_modules confirmed mods_addr points at at least one
    // entry.
    let module = unsafe { &*(info.mods_addr as usize as *const ModuleEntry) };
    let (start, len) = module_span(module)?;

    // SAFETY: the loader placed the module at [start, end) and nothing in
    // this kernel ever writes that region (P6).
    Ok(unsafe { core::slice::from_raw_parts(start as usize as *const u8, len) })
}
