//! Executable validation and image loading.
//!
//! The sanity check is deliberately thin: four magic bytes and the 32-bit
//! entry point at file offset 24. The image is copied in one piece to the
//! fixed load address inside the (already mapped) user page; the copy
//! stops at the file's length.

use crate::error::{KernelError, KernelResult};
use crate::fs::{FileType, Filesystem};
use crate::mm::paging::{ELF_LOAD_ADDR, PAGE_4M, USER_VADDR_BASE};

/// `\x7FELF`.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
/// File offset of the little-endian entry point.
pub const ENTRY_POINT_OFFSET: u32 = 24;

/// A validated executable, ready to load.
#[derive(Debug, Clone, Copy)]
pub struct Executable {
    pub inode: u32,
    pub size: u32,
    pub entry_point: u32,
}

/// Resolve `name` and check it is a loadable ELF image.
pub fn validate(fs: &Filesystem<'_>, name: &[u8]) -> KernelResult<Executable> {
    let entry = fs.read_dentry_by_name(name)?;
    if entry.file_type != FileType::Regular {
        return Err(KernelError::NotExecutable);
    }

    let mut header = [0u8; 28];
    let read = fs.read_data(entry.inode, 0, &mut header)?;
    if read < header.len() || header[..4] != ELF_MAGIC {
        return Err(KernelError::NotExecutable);
    }

    let offset = ENTRY_POINT_OFFSET as usize;
    let entry_point = u32::from_le_bytes([
        header[offset],
        header[offset + 1],
        header[offset + 2],
        header[offset + 3],
    ]);

    let size = fs.file_size(entry.inode)?;
    if size > PAGE_4M - (ELF_LOAD_ADDR - USER_VADDR_BASE) {
        return Err(KernelError::NotExecutable);
    }

    Ok(Executable {
        inode: entry.inode,
        size,
        entry_point,
    })
}

/// Copy the whole image to [`ELF_LOAD_ADDR`] in the active user page.
///
/// # Safety
/// The current page directory must map the user 4 MiB page for the
/// process being built; nothing else may alias that region.
pub unsafe fn load_image(fs: &Filesystem<'_>, exe: &Executable) -> KernelResult<usize> {
    // SAFETY: per the function contract the destination is the mapped,
    // exclusive user region, and `validate` bounded `size` to fit it.
    let dst =
        unsafe { core::slice::from_raw_parts_mut(ELF_LOAD_ADDR as *mut u8, exe.size as usize) };
    fs.read_data(exe.inode, 0, dst)
}
