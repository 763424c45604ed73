//! Read-only boot-module filesystem.
//!
//! The bootloader hands the kernel one module whose first block is the
//! superblock; everything below parses that image in place. All multi-byte
//! fields are little-endian, blocks are 4 KiB, and nothing here ever
//! writes to the image. The only mutable state a file has is the byte
//! offset stored in its descriptor.
//!
//! Layout:
//! - block 0: counts (direntries, inodes, data blocks), 52 reserved bytes,
//!   then up to 63 directory entries of 64 bytes;
//! - blocks `1 ..= inode_cnt`: one inode per block, a 32-bit length plus
//!   up to 1023 data-block indices;
//! - remaining blocks: raw 4 KiB data.

use spin::Once;

use crate::error::{KernelError, KernelResult};

/// Bytes per filesystem block.
pub const BLOCK_SIZE: usize = 4096;
/// Directory entries the superblock can hold.
pub const MAX_DENTRIES: usize = 63;
/// Bytes per directory entry.
pub const DENTRY_SIZE: usize = 64;
/// Filename field width. Names of exactly this length carry no NUL.
pub const FNAME_LEN: usize = 32;
/// Data-block indices per inode.
pub const INODE_INDICES: usize = 1023;
/// Offset of the first directory entry inside the superblock.
const DENTRY_TABLE_OFFSET: usize = 64;

/// File type tag stored in a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileType {
    /// Pseudo-file giving access to the virtual RTC.
    Rtc = 0,
    /// The (single, flat) directory.
    Directory = 1,
    /// Regular data file.
    Regular = 2,
}

impl TryFrom<u32> for FileType {
    type Error = KernelError;

    fn try_from(value: u32) -> KernelResult<Self> {
        match value {
            0 => Ok(FileType::Rtc),
            1 => Ok(FileType::Directory),
            2 => Ok(FileType::Regular),
            _ => Err(KernelError::FsCorrupted { what: "file type" }),
        }
    }
}

/// A parsed directory entry.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    /// Raw 32-byte name field, NUL-padded unless exactly 32 bytes long.
    pub name: [u8; FNAME_LEN],
    pub file_type: FileType,
    pub inode: u32,
}

impl DirEntry {
    /// The name as a byte slice, without NUL padding.
    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FNAME_LEN);
        &self.name[..len]
    }
}

/// Pad-or-truncate a lookup name into the fixed 32-byte field format, so
/// that comparison is a flat byte compare.
fn name_key(name: &[u8]) -> [u8; FNAME_LEN] {
    let mut key = [0u8; FNAME_LEN];
    let len = name.len().min(FNAME_LEN);
    key[..len].copy_from_slice(&name[..len]);
    key
}

/// An immutable view over a mounted filesystem image.
pub struct Filesystem<'a> {
    image: &'a [u8],
    dentry_cnt: u32,
    inode_cnt: u32,
    datablk_cnt: u32,
}

impl<'a> Filesystem<'a> {
    /// Parse and sanity-check the superblock.
    pub fn mount(image: &'a [u8]) -> KernelResult<Self> {
        if image.len() < BLOCK_SIZE {
            return Err(KernelError::FsCorrupted { what: "superblock" });
        }
        let dentry_cnt = read_u32(image, 0);
        let inode_cnt = read_u32(image, 4);
        let datablk_cnt = read_u32(image, 8);

        if dentry_cnt as usize > MAX_DENTRIES {
            return Err(KernelError::FsCorrupted {
                what: "direntry count",
            });
        }
        let total_blocks = 1 + inode_cnt as usize + datablk_cnt as usize;
        if image.len() < total_blocks * BLOCK_SIZE {
            return Err(KernelError::FsCorrupted {
                what: "image length",
            });
        }

        Ok(Filesystem {
            image,
            dentry_cnt,
            inode_cnt,
            datablk_cnt,
        })
    }

    pub fn dentry_count(&self) -> u32 {
        self.dentry_cnt
    }

    pub fn inode_count(&self) -> u32 {
        self.inode_cnt
    }

    pub fn datablk_count(&self) -> u32 {
        self.datablk_cnt
    }

    /// Linear name scan. Matches at most [`FNAME_LEN`] characters, so an
    /// exactly-32-byte name needs no terminator.
    pub fn read_dentry_by_name(&self, name: &[u8]) -> KernelResult<DirEntry> {
        let key = name_key(name);
        for index in 0..self.dentry_cnt {
            let entry = self.read_dentry_by_index(index)?;
            if entry.name == key {
                return Ok(entry);
            }
        }
        Err(KernelError::NotFound { resource: "file" })
    }

    /// Bounds-checked positional dentry read.
    pub fn read_dentry_by_index(&self, index: u32) -> KernelResult<DirEntry> {
        if index >= self.dentry_cnt {
            return Err(KernelError::InvalidArgument {
                name: "dentry index",
            });
        }
        let offset = DENTRY_TABLE_OFFSET + index as usize * DENTRY_SIZE;
        let mut name = [0u8; FNAME_LEN];
        name.copy_from_slice(&self.image[offset..offset + FNAME_LEN]);
        let file_type = FileType::try_from(read_u32(self.image, offset + FNAME_LEN))?;
        let inode = read_u32(self.image, offset + FNAME_LEN + 4);
        Ok(DirEntry {
            name,
            file_type,
            inode,
        })
    }

    /// Length in bytes of the file behind `inode`.
    pub fn file_size(&self, inode: u32) -> KernelResult<u32> {
        if inode >= self.inode_cnt {
            return Err(KernelError::InvalidArgument { name: "inode" });
        }
        Ok(read_u32(self.image, (1 + inode as usize) * BLOCK_SIZE))
    }

    /// Copy up to `buf.len()` bytes of the file starting at `offset`.
    ///
    /// Returns the number of bytes copied, which is
    /// `min(buf.len(), size - offset)`. An offset past end-of-file and any
    /// out-of-range data-block index are errors; an offset exactly at
    /// end-of-file reads zero bytes so sequential readers see a clean EOF.
    pub fn read_data(&self, inode: u32, offset: u32, buf: &mut [u8]) -> KernelResult<usize> {
        let size = self.file_size(inode)?;
        if offset > size {
            return Err(KernelError::InvalidArgument { name: "offset" });
        }

        let to_copy = buf.len().min((size - offset) as usize);
        let inode_base = (1 + inode as usize) * BLOCK_SIZE;
        let data_base = (1 + self.inode_cnt as usize) * BLOCK_SIZE;

        let mut copied = 0usize;
        while copied < to_copy {
            // The inode's index array is a flat logical address space:
            // crossing a 4 KiB boundary consults the next index.
            let logical = offset as usize + copied;
            let index_slot = logical / BLOCK_SIZE;
            let block_offset = logical % BLOCK_SIZE;

            if index_slot >= INODE_INDICES {
                return Err(KernelError::FsCorrupted { what: "file length" });
            }
            let datablk = read_u32(self.image, inode_base + 4 + index_slot * 4);
            if datablk >= self.datablk_cnt {
                return Err(KernelError::FsCorrupted {
                    what: "data-block index",
                });
            }

            let chunk = (BLOCK_SIZE - block_offset).min(to_copy - copied);
            let src = data_base + datablk as usize * BLOCK_SIZE + block_offset;
            buf[copied..copied + chunk].copy_from_slice(&self.image[src..src + chunk]);
            copied += chunk;
        }

        Ok(copied)
    }

    /// Resolve a name, then stream from the file it denotes.
    pub fn file_read_name(&self, name: &[u8], offset: u32, buf: &mut [u8]) -> KernelResult<usize> {
        let entry = self.read_dentry_by_name(name)?;
        if entry.file_type != FileType::Regular {
            return Err(KernelError::Unsupported {
                operation: "data read on non-regular file",
            });
        }
        self.read_data(entry.inode, offset, buf)
    }
}

#[inline]
fn read_u32(image: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&image[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

// ---------------------------------------------------------------------------
// Global mount
// ---------------------------------------------------------------------------

static FILESYSTEM: Once<Filesystem<'static>> = Once::new();

/// Mount the boot module. Called once from kernel init.
pub fn init(image: &'static [u8]) -> KernelResult<()> {
    let fs = Filesystem::mount(image)?;
    log::info!(
        "fs: {} dentries, {} inodes, {} data blocks",
        fs.dentry_count(),
        fs.inode_count(),
        fs.datablk_count()
    );
    FILESYSTEM.call_once(|| fs);
    Ok(())
}

/// The mounted filesystem, if `init` has run.
pub fn get() -> KernelResult<&'static Filesystem<'static>> {
    FILESYSTEM.get().ok_or(KernelError::NotFound {
        resource: "filesystem",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;

    /// Build a well-formed image: `files` become regular files with the
    /// given contents, plus a "." directory entry and an "rtc" entry.
    fn build_image(files: &[(&[u8], &[u8])]) -> Vec<u8> {
        let inode_cnt = files.len();
        let datablk_cnt: usize = files
            .iter()
            .map(|(_, data)| data.len().div_ceil(BLOCK_SIZE).max(1))
            .sum();
        let total_blocks = 1 + inode_cnt + datablk_cnt;
        let mut image = vec![0u8; total_blocks * BLOCK_SIZE];

        let dentry_cnt = files.len() + 2;
        image[0..4].copy_from_slice(&(dentry_cnt as u32).to_le_bytes());
        image[4..8].copy_from_slice(&(inode_cnt as u32).to_le_bytes());
        image[8..12].copy_from_slice(&(datablk_cnt as u32).to_le_bytes());

        let mut write_dentry = |slot: usize, name: &[u8], ftype: u32, inode: u32| {
            let base = DENTRY_TABLE_OFFSET + slot * DENTRY_SIZE;
            let len = name.len().min(FNAME_LEN);
            image[base..base + len].copy_from_slice(&name[..len]);
            image[base + 32..base + 36].copy_from_slice(&ftype.to_le_bytes());
            image[base + 36..base + 40].copy_from_slice(&inode.to_le_bytes());
        };

        write_dentry(0, b".", 1, 0);
        write_dentry(1, b"rtc", 0, 0);
        for (i, (name, _)) in files.iter().enumerate() {
            write_dentry(2 + i, name, 2, i as u32);
        }

        let mut next_block = 0u32;
        for (i, (_, data)) in files.iter().enumerate() {
            let inode_base = (1 + i) * BLOCK_SIZE;
            image[inode_base..inode_base + 4].copy_from_slice(&(data.len() as u32).to_le_bytes());
            let blocks = data.len().div_ceil(BLOCK_SIZE).max(1);
            for b in 0..blocks {
                let slot = inode_base + 4 + b * 4;
                image[slot..slot + 4].copy_from_slice(&next_block.to_le_bytes());
                let chunk_start = b * BLOCK_SIZE;
                let chunk = &data[chunk_start..data.len().min(chunk_start + BLOCK_SIZE)];
                let dst = (1 + inode_cnt + next_block as usize) * BLOCK_SIZE;
                image[dst..dst + chunk.len()].copy_from_slice(chunk);
                next_block += 1;
            }
        }

        image
    }

    #[test]
    fn mount_rejects_truncated_and_overfull_images() {
        assert!(Filesystem::mount(&[0u8; 64]).is_err());

        let mut image = vec![0u8; BLOCK_SIZE];
        image[0..4].copy_from_slice(&64u32.to_le_bytes());
        assert!(Filesystem::mount(&image).is_err());

        // Counts that claim more blocks than the image holds.
        let mut image = vec![0u8; BLOCK_SIZE];
        image[4..8].copy_from_slice(&4u32.to_le_bytes());
        assert!(Filesystem::mount(&image).is_err());
    }

    #[test]
    fn lookup_by_name_and_index_agree() {
        let image = build_image(&[(b"frame0.txt", b"fish\n")]);
        let fs = Filesystem::mount(&image).unwrap();

        let by_name = fs.read_dentry_by_name(b"frame0.txt").unwrap();
        assert_eq!(by_name.file_type, FileType::Regular);
        let by_index = fs.read_dentry_by_index(2).unwrap();
        assert_eq!(by_index.name_bytes(), b"frame0.txt");
        assert_eq!(by_index.inode, by_name.inode);

        assert!(fs.read_dentry_by_name(b"absent").is_err());
        assert!(fs.read_dentry_by_index(fs.dentry_count()).is_err());
    }

    #[test]
    fn exactly_32_char_names_match_without_a_terminator() {
        let name: &[u8] = b"verylargetextwithverylongname.tx";
        assert_eq!(name.len(), FNAME_LEN);
        let image = build_image(&[(name, b"data")]);
        let fs = Filesystem::mount(&image).unwrap();
        let entry = fs.read_dentry_by_name(name).unwrap();
        assert_eq!(entry.name_bytes(), name);
        // A longer lookup name matches on its first 32 characters.
        let entry = fs
            .read_dentry_by_name(b"verylargetextwithverylongname.txt")
            .unwrap();
        assert_eq!(entry.name_bytes(), name);
    }

    #[test]
    fn read_data_crosses_block_boundaries() {
        let mut data = Vec::new();
        for i in 0..9000usize {
            data.push((i % 251) as u8);
        }
        let image = build_image(&[(b"big", &data)]);
        let fs = Filesystem::mount(&image).unwrap();

        let mut buf = vec![0u8; 9000];
        assert_eq!(fs.read_data(0, 0, &mut buf).unwrap(), 9000);
        assert_eq!(buf, data);

        // A read straddling the 4096-byte boundary.
        let mut buf = vec![0u8; 200];
        assert_eq!(fs.read_data(0, 4000, &mut buf).unwrap(), 200);
        assert_eq!(buf[..], data[4000..4200]);
    }

    #[test]
    fn read_data_clamps_to_file_size() {
        let image = build_image(&[(b"small", b"hello")]);
        let fs = Filesystem::mount(&image).unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(fs.read_data(0, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");

        // At EOF: zero bytes, not an error.
        assert_eq!(fs.read_data(0, 5, &mut buf).unwrap(), 0);
        // Past EOF: an error.
        assert!(fs.read_data(0, 6, &mut buf).is_err());
        // Tail read.
        assert_eq!(fs.read_data(0, 3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
    }

    #[test]
    fn rereading_yields_identical_bytes() {
        let image = build_image(&[(b"stable", b"same bytes every time")]);
        let fs = Filesystem::mount(&image).unwrap();
        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        let a = fs.read_data(0, 0, &mut first).unwrap();
        let b = fs.read_data(0, 0, &mut second).unwrap();
        assert_eq!(a, b);
        assert_eq!(first, second);
    }

    #[test]
    fn corrupt_block_index_is_detected() {
        let mut image = build_image(&[(b"bad", b"abc")]);
        // Point the inode's first index outside the data region.
        let inode_base = BLOCK_SIZE;
        image[inode_base + 4..inode_base + 8].copy_from_slice(&999u32.to_le_bytes());
        let fs = Filesystem::mount(&image).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(
            fs.read_data(0, 0, &mut buf),
            Err(KernelError::FsCorrupted { .. })
        ));
    }

    #[test]
    fn bad_inode_is_rejected() {
        let image = build_image(&[(b"only", b"x")]);
        let fs = Filesystem::mount(&image).unwrap();
        let mut buf = [0u8; 8];
        assert!(fs.read_data(7, 0, &mut buf).is_err());
        assert!(fs.file_size(7).is_err());
    }

    #[test]
    fn file_read_name_streams_regular_files_only() {
        let image = build_image(&[(b"a.txt", b"alpha")]);
        let fs = Filesystem::mount(&image).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(fs.file_read_name(b"a.txt", 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"alpha");
        assert!(fs.file_read_name(b"rtc", 0, &mut buf).is_err());
        assert!(fs.file_read_name(b".", 0, &mut buf).is_err());
    }
}
