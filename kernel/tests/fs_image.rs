//! End-to-end filesystem flows against a synthetic boot-module image.

use triados_kernel::fs::{FileType, Filesystem, BLOCK_SIZE, DENTRY_SIZE, FNAME_LEN};
use triados_kernel::process::loader;

/// Assemble an image the way the build tooling would: superblock with a
/// directory entry table, one inode block per file, then data blocks.
struct ImageBuilder {
    files: Vec<(Vec<u8>, u32, Vec<u8>)>,
}

impl ImageBuilder {
    fn new() -> Self {
        ImageBuilder { files: Vec::new() }
    }

    fn add(&mut self, name: &[u8], file_type: u32, data: &[u8]) -> &mut Self {
        self.files.push((name.to_vec(), file_type, data.to_vec()));
        self
    }

    fn build(&self) -> Vec<u8> {
        let regular: Vec<&(Vec<u8>, u32, Vec<u8>)> =
            self.files.iter().filter(|(_, t, _)| *t == 2).collect();
        let inode_cnt = regular.len();
        let datablk_cnt: usize = regular
            .iter()
            .map(|(_, _, d)| d.len().div_ceil(BLOCK_SIZE).max(1))
            .sum();

        let mut image = vec![0u8; (1 + inode_cnt + datablk_cnt) * BLOCK_SIZE];
        image[0..4].copy_from_slice(&(self.files.len() as u32).to_le_bytes());
        image[4..8].copy_from_slice(&(inode_cnt as u32).to_le_bytes());
        image[8..12].copy_from_slice(&(datablk_cnt as u32).to_le_bytes());

        let mut inode = 0u32;
        for (slot, (name, file_type, _)) in self.files.iter().enumerate() {
            let base = 64 + slot * DENTRY_SIZE;
            let len = name.len().min(FNAME_LEN);
            image[base..base + len].copy_from_slice(&name[..len]);
            image[base + 32..base + 36].copy_from_slice(&file_type.to_le_bytes());
            if *file_type == 2 {
                image[base + 36..base + 40].copy_from_slice(&inode.to_le_bytes());
                inode += 1;
            }
        }

        let mut next_block = 0u32;
        for (i, (_, _, data)) in regular.iter().enumerate() {
            let inode_base = (1 + i) * BLOCK_SIZE;
            image[inode_base..inode_base + 4]
                .copy_from_slice(&(data.len() as u32).to_le_bytes());
            let blocks = data.len().div_ceil(BLOCK_SIZE).max(1);
            for b in 0..blocks {
                let slot = inode_base + 4 + b * 4;
                image[slot..slot + 4].copy_from_slice(&next_block.to_le_bytes());
                let start = b * BLOCK_SIZE;
                let chunk = &data[start..data.len().min(start + BLOCK_SIZE)];
                let dst = (1 + inode_cnt + next_block as usize) * BLOCK_SIZE;
                image[dst..dst + chunk.len()].copy_from_slice(chunk);
                next_block += 1;
            }
        }

        image
    }
}

fn frame0() -> Vec<u8> {
    let mut art = Vec::new();
    art.extend_from_slice(b"/\\ /\\\n");
    art.extend_from_slice(b"  o o\n");
    art.extend_from_slice(b" =   =\n");
    art.extend_from_slice(b"  ---\n");
    art
}

fn shell_elf() -> Vec<u8> {
    let mut body = vec![0u8; 5000];
    body[..4].copy_from_slice(&loader::ELF_MAGIC);
    body[24..28].copy_from_slice(&0x0804_80B4u32.to_le_bytes());
    body
}

fn standard_image() -> Vec<u8> {
    let mut builder = ImageBuilder::new();
    builder
        .add(b".", 1, b"")
        .add(b"rtc", 0, b"")
        .add(b"frame0.txt", 2, &frame0())
        .add(b"shell", 2, &shell_elf())
        .add(b"verylargetextwithverylongname.tx", 2, b"long name contents\n");
    builder.build()
}

#[test]
fn directory_listing_yields_each_entry_exactly_once() {
    let image = standard_image();
    let fs = Filesystem::mount(&image).unwrap();

    // Walk the directory the way the `ls` read loop does: one entry per
    // positional read until the count runs out.
    let mut seen: Vec<Vec<u8>> = Vec::new();
    for index in 0..fs.dentry_count() {
        let entry = fs.read_dentry_by_index(index).unwrap();
        seen.push(entry.name_bytes().to_vec());
    }
    assert_eq!(seen.len(), 5);
    for name in &seen {
        assert_eq!(seen.iter().filter(|n| *n == name).count(), 1);
    }
    assert!(fs.read_dentry_by_index(fs.dentry_count()).is_err());
}

#[test]
fn cat_flow_streams_the_whole_file() {
    let image = standard_image();
    let fs = Filesystem::mount(&image).unwrap();
    let expected = frame0();

    // open -> repeated reads with a moving offset -> clean EOF.
    let entry = fs.read_dentry_by_name(b"frame0.txt").unwrap();
    assert_eq!(entry.file_type, FileType::Regular);

    let mut collected = Vec::new();
    let mut offset = 0u32;
    loop {
        let mut chunk = [0u8; 7];
        let n = fs.read_data(entry.inode, offset, &mut chunk).unwrap();
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..n]);
        offset += n as u32;
    }
    assert_eq!(collected, expected);

    // A second pass over the same descriptor-style offsets is identical.
    let mut again = vec![0u8; expected.len()];
    assert_eq!(
        fs.read_data(entry.inode, 0, &mut again).unwrap(),
        expected.len()
    );
    assert_eq!(again, expected);
}

#[test]
fn shell_image_validates_and_long_names_resolve() {
    let image = standard_image();
    let fs = Filesystem::mount(&image).unwrap();

    let exe = loader::validate(&fs, b"shell").unwrap();
    assert_eq!(exe.entry_point, 0x0804_80B4);
    assert_eq!(exe.size, 5000);

    // Text files are not executable.
    assert!(loader::validate(&fs, b"frame0.txt").is_err());
    // The RTC pseudo-file is not executable either.
    assert!(loader::validate(&fs, b"rtc").is_err());

    let entry = fs
        .read_dentry_by_name(b"verylargetextwithverylongname.tx")
        .unwrap();
    let mut buf = [0u8; 64];
    let n = fs.read_data(entry.inode, 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"long name contents\n");
}

#[test]
fn multi_block_files_read_back_byte_for_byte() {
    let mut payload = Vec::with_capacity(3 * BLOCK_SIZE + 17);
    for i in 0..(3 * BLOCK_SIZE + 17) {
        payload.push((i * 31 % 253) as u8);
    }
    let mut builder = ImageBuilder::new();
    builder.add(b"big.bin", 2, &payload);
    let image = builder.build();
    let fs = Filesystem::mount(&image).unwrap();

    let mut back = vec![0u8; payload.len()];
    assert_eq!(
        fs.file_read_name(b"big.bin", 0, &mut back).unwrap(),
        payload.len()
    );
    assert_eq!(back, payload);

    // An unaligned window across two block boundaries.
    let mut window = vec![0u8; BLOCK_SIZE + 100];
    let n = fs
        .file_read_name(b"big.bin", (BLOCK_SIZE - 50) as u32, &mut window)
        .unwrap();
    assert_eq!(n, window.len());
    assert_eq!(window[..], payload[BLOCK_SIZE - 50..2 * BLOCK_SIZE + 50]);
}
